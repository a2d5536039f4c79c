use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::AbortHandle;
use txcore::health::{ConnectionMetrics, ConnectionQuality};
use txcore::protocol::{InboundMessage, ProtocolError};
use txcore::types::call::CallId;
use txcore::types::events::{CoreEventBus, Event, EventHandler};
use txcore::types::push::PushMetaData;

use crate::calls::{CallError, CallInfo, CallRegistry};
use crate::config::{ClientConfig, SessionConfig};
use crate::connection::{ConnectOutcome, Connection, ConnectionError, lock};
use crate::media::{MediaEngineFactory, MediaError};
use crate::reconnect::RecoveryTasks;
use crate::request::RequestError;
use crate::session::SessionState;
use crate::transport::{TransportEvent, TransportFactory};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("no session configured")]
    NoSession,
    #[error("request timed out")]
    Timeout,
    #[error("client has been dropped")]
    Shutdown,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The session engine: owns the connection, the login session and the calls,
/// and routes every inbound frame.
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) connection: Connection,
    pub(crate) media_factory: Arc<dyn MediaEngineFactory>,
    pub(crate) core_events: CoreEventBus,
    pub(crate) calls: CallRegistry,
    pub(crate) session: Mutex<SessionState>,

    pub(crate) response_waiters:
        tokio::sync::Mutex<HashMap<String, oneshot::Sender<InboundMessage>>>,

    pub(crate) expected_disconnect: AtomicBool,
    /// Reconnect even without calls (gateway asked us to come back).
    pub(crate) forced_reconnect: AtomicBool,
    pub(crate) shutdown_notifier: Notify,

    /// Incremented on each new socket. Loops of older sockets see a
    /// mismatch and stand down.
    pub(crate) connection_generation: AtomicU64,

    pub(crate) background_tasks: Mutex<Vec<AbortHandle>>,
    pub(crate) recovery: Mutex<RecoveryTasks>,
    pub(crate) last_quality: Mutex<Option<ConnectionQuality>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("connected", &self.is_connected())
            .field("calls", &self.calls.len())
            .finish()
    }
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media_factory: Arc<dyn MediaEngineFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connection: Connection::new(transport_factory),
            media_factory,
            core_events: CoreEventBus::new(),
            calls: CallRegistry::new(),
            session: Mutex::new(SessionState::default()),
            response_waiters: tokio::sync::Mutex::new(HashMap::new()),
            expected_disconnect: AtomicBool::new(false),
            forced_reconnect: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            connection_generation: AtomicU64::new(0),
            background_tasks: Mutex::new(Vec::new()),
            recovery: Mutex::new(RecoveryTasks::default()),
            last_quality: Mutex::new(None),
        })
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.core_events.add_handler(handler);
    }

    /// Opens the socket and, when a session is given, logs in. With push
    /// metadata the server is asked to re-deliver the pushed call once the
    /// gateway is registered. Calling this while connected is a no-op.
    pub async fn connect(
        self: &Arc<Self>,
        session: Option<SessionConfig>,
        push: Option<PushMetaData>,
    ) -> Result<(), ClientError> {
        let url = self.config.server_url(push.as_ref());

        info!(target: "Client", "Connecting to {url}");
        match self.open_connection(&url).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => {
                warn!(target: "Client", "Failed to connect: {e}");
                self.core_events.dispatch(&Event::ConnectionError {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }
        // Only a socket this call opened may replace the session's context.
        {
            let mut state = lock(&self.session);
            state.pending_push_attach = push.is_some();
            state.push = push;
            state.server_url = Some(url);
        }
        self.expected_disconnect.store(false, Ordering::SeqCst);
        self.core_events.dispatch(&Event::Connected);

        if let Some(session) = session {
            self.login(session)?;
        }
        Ok(())
    }

    /// Dials `url` and starts the receive loop. `Ok(false)` when a socket
    /// was already open.
    pub(crate) async fn open_connection(self: &Arc<Self>, url: &str) -> Result<bool, ClientError> {
        let events = match self.connection.connect(url).await? {
            ConnectOutcome::AlreadyConnected => return Ok(false),
            ConnectOutcome::Opened(events) => events,
        };
        let generation = self.connection_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.last_quality) = None;

        let client = self.clone();
        tokio::spawn(async move { client.run_event_loop(events, generation).await });

        let monitor = tokio::spawn(self.clone().health_monitor_loop());
        lock(&self.background_tasks).push(monitor.abort_handle());
        Ok(true)
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        generation: u64,
    ) {
        info!(target: "Client", "Starting message processing loop...");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client", "Shutdown signaled in message loop. Exiting message loop.");
                    return;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::TextReceived(text)) => self.handle_frame(&text).await,
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Client", "Transport connected event received");
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        self.handle_connection_lost(generation, reason).await;
                        return;
                    }
                    None => {
                        self.handle_connection_lost(generation, None).await;
                        return;
                    }
                },
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, text: &str) {
        debug!(target: "Client/Recv", "<-- {text}");
        match InboundMessage::parse(text) {
            Ok(message) => self.route_message(message).await,
            Err(e) => warn!(target: "Client/Recv", "Dropping unparseable frame: {e}"),
        }
    }

    /// Hangs up every call, closes the socket and forgets the session.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting client intentionally.");
        self.expected_disconnect.store(true, Ordering::SeqCst);

        for call in self.calls.all() {
            if let Err(e) = self.end_call(call.id) {
                debug!(target: "Client", "Could not end {}: {e}", call.id);
            }
        }
        self.cancel_recovery();
        self.shutdown_notifier.notify_waiters();
        self.connection.destroy().await;
        self.cancel_background_tasks();
        self.clear_waiters().await;
        self.reset_session();
        self.core_events.dispatch(&Event::Disconnected);
    }

    pub(crate) fn cancel_background_tasks(&self) {
        for task in lock(&self.background_tasks).drain(..) {
            task.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Connected and the gateway reported REGISTERED.
    pub fn is_logged_in(&self) -> bool {
        self.connection.is_logged_in()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.connection.metrics()
    }

    /// Snapshots of every live call, oldest first.
    pub fn active_calls(&self) -> Vec<CallInfo> {
        self.calls.snapshots()
    }

    pub fn call(&self, call_id: CallId) -> Option<CallInfo> {
        self.calls.get(&call_id).map(|call| call.snapshot())
    }
}
