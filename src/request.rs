use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use txcore::protocol::{InboundMessage, OutboundRequest, RequestPayload, ServerError};

use crate::client::Client;
use crate::connection::ConnectionError;

/// Failures of a request that expects a response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("internal channel closed unexpectedly")]
    InternalChannelClosed,
}

/// A request on the wire whose response has not been collected yet.
pub(crate) struct PendingResponse {
    pub(crate) id: String,
    rx: oneshot::Receiver<InboundMessage>,
}

impl Client {
    /// Sends `payload` without tracking a response.
    pub(crate) fn send_request(&self, payload: RequestPayload) -> Result<String, ConnectionError> {
        let request = OutboundRequest::new(payload);
        self.connection.send(&request)?;
        Ok(request.id)
    }

    /// Sends `payload` and registers a waiter for its response.
    pub(crate) async fn send_tracked(
        &self,
        payload: RequestPayload,
    ) -> Result<PendingResponse, ConnectionError> {
        let request = OutboundRequest::new(payload);
        let (tx, rx) = oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(request.id.clone(), tx);

        if let Err(e) = self.connection.send(&request) {
            self.response_waiters.lock().await.remove(&request.id);
            return Err(e);
        }
        Ok(PendingResponse { id: request.id, rx })
    }

    /// Waits for the response of a tracked request.
    pub(crate) async fn await_response(
        &self,
        pending: PendingResponse,
        wait: Duration,
    ) -> Result<InboundMessage, RequestError> {
        let PendingResponse { id, rx } = pending;
        match timeout(wait, rx).await {
            Ok(Ok(InboundMessage::RequestError { error, .. })) => Err(RequestError::Server(error)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::InternalChannelClosed),
            Err(_) => {
                self.response_waiters.lock().await.remove(&id);
                warn!(target: "Client", "Request {id} timed out after {wait:?}");
                Err(RequestError::Timeout)
            }
        }
    }

    pub(crate) async fn request(&self, payload: RequestPayload) -> Result<InboundMessage, RequestError> {
        let pending = self.send_tracked(payload).await?;
        self.await_response(pending, self.config.request_timeout).await
    }

    /// Hands a response to whoever is waiting for it. Returns false when
    /// nobody was.
    pub(crate) async fn resolve_waiter(&self, message: &InboundMessage) -> bool {
        let Some(id) = message.response_id() else {
            return false;
        };
        let waiter = self.response_waiters.lock().await.remove(id);
        match waiter {
            Some(tx) => {
                if tx.send(message.clone()).is_err() {
                    debug!(target: "Client", "Waiter for {id} went away before the response");
                }
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding waiter, used when the socket goes away.
    pub(crate) async fn clear_waiters(&self) {
        self.response_waiters.lock().await.clear();
    }
}
