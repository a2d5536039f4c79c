//! Answering or declining a call announced by a push notification.
//!
//! The app is usually not connected when the push arrives. [`PushBootstrap`]
//! brings up a client just for that call: it connects with the push identity,
//! asks the server to re-deliver the call, waits for the matching invite and
//! then answers or rejects it.

use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use txcore::types::call::CallId;
use txcore::types::events::{Event, EventHandler};
use txcore::types::push::PushMetaData;

use crate::calls::CallHandle;
use crate::client::{Client, ClientError};
use crate::config::{ClientConfig, SessionConfig};
use crate::media::MediaEngineFactory;
use crate::transport::TransportFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    Accept,
    Reject,
}

#[derive(Debug)]
pub enum PushOutcome {
    /// The call is up. The client that carries it is handed over and stays
    /// connected.
    Answered {
        client: Arc<Client>,
        call: CallHandle,
    },
    Rejected,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("pushed call {0} was not delivered in time")]
    InviteTimeout(CallId),
    #[error("pushed call {0} ended before it was answered")]
    CallEnded(CallId),
    #[error("gateway registration did not complete")]
    Registration,
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Forwards client events into a channel the bootstrap can wait on.
struct EventForwarder(mpsc::UnboundedSender<Event>);

impl EventHandler for EventForwarder {
    fn handle_event(&self, event: &Event) {
        let _ = self.0.send(event.clone());
    }
}

pub struct PushBootstrap {
    config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    media_factory: Arc<dyn MediaEngineFactory>,
}

impl PushBootstrap {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media_factory: Arc<dyn MediaEngineFactory>,
    ) -> Self {
        Self {
            config,
            transport_factory,
            media_factory,
        }
    }

    /// Connects for the pushed call and applies `action` to it once its
    /// invite arrives. The temporary client is disconnected on every path
    /// except a successful answer.
    pub async fn handle(
        &self,
        metadata: PushMetaData,
        session: SessionConfig,
        action: PushAction,
    ) -> Result<PushOutcome, PushError> {
        let call_id = metadata.call_id;
        let caller_number = metadata.caller_number.clone();
        info!(target: "Push", "Handling push for call {call_id} ({action:?})");

        let client = Client::new(
            self.config.with_relay_hint(&metadata),
            self.transport_factory.clone(),
            self.media_factory.clone(),
        );
        let (tx, mut events) = mpsc::unbounded_channel();
        client.add_event_handler(Arc::new(EventForwarder(tx)));

        if let Err(e) = client.connect(Some(session), Some(metadata)).await {
            warn!(target: "Push", "Could not bring up a client for pushed call {call_id}: {e}");
            client.disconnect().await;
            return Err(e.into());
        }

        let deadline = Instant::now() + self.config.push_invite_timeout;
        if let Err(e) = wait_for_invite(&mut events, call_id, deadline).await {
            warn!(target: "Push", "Giving up on pushed call {call_id}: {e}");
            client.disconnect().await;
            return Err(e);
        }

        match action {
            PushAction::Reject => {
                let ended = client.end_call(call_id);
                client.disconnect().await;
                ended?;
                info!(target: "Push", "Rejected pushed call {call_id}");
                Ok(PushOutcome::Rejected)
            }
            PushAction::Accept => {
                let call = match client.accept_call(call_id, &caller_number, Vec::new()) {
                    Ok(call) => call,
                    Err(e) => {
                        client.disconnect().await;
                        return Err(e.into());
                    }
                };
                let deadline = Instant::now() + self.config.push_invite_timeout;
                if let Err(e) = wait_for_answer(&mut events, call_id, deadline).await {
                    client.disconnect().await;
                    return Err(e);
                }
                info!(target: "Push", "Answered pushed call {call_id}");
                Ok(PushOutcome::Answered { client, call })
            }
        }
    }
}

async fn wait_for_invite(
    events: &mut mpsc::UnboundedReceiver<Event>,
    call_id: CallId,
    deadline: Instant,
) -> Result<(), PushError> {
    loop {
        match timeout_at(deadline, events.recv()).await {
            Err(_) | Ok(None) => return Err(PushError::InviteTimeout(call_id)),
            Ok(Some(Event::IncomingCall(incoming))) if incoming.call_id == call_id => {
                return Ok(());
            }
            Ok(Some(Event::IncomingCall(other))) => {
                debug!(target: "Push", "Ignoring unrelated incoming call {}", other.call_id);
            }
            Ok(Some(Event::RegistrationTimeout | Event::RegistrationFailed { .. })) => {
                return Err(PushError::Registration);
            }
            Ok(Some(_)) => {}
        }
    }
}

async fn wait_for_answer(
    events: &mut mpsc::UnboundedReceiver<Event>,
    call_id: CallId,
    deadline: Instant,
) -> Result<(), PushError> {
    loop {
        match timeout_at(deadline, events.recv()).await {
            Err(_) | Ok(None) => return Err(PushError::CallEnded(call_id)),
            Ok(Some(Event::CallAnswered { call_id: id })) if id == call_id => return Ok(()),
            Ok(Some(Event::CallEnded { call_id: id, .. })) if id == call_id => {
                return Err(PushError::CallEnded(call_id));
            }
            Ok(Some(_)) => {}
        }
    }
}
