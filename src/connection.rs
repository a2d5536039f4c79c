//! The single logical connection to the signaling server.
//!
//! [`Connection`] owns the socket, the outbound queue drained by a writer
//! task, the connected / logged-in / ongoing-call flags and the ping-health
//! window. The session engine reads it; only the receive path records pings.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use txcore::health::{ConnectionMetrics, PingTracker};
use txcore::protocol::{OutboundRequest, ProtocolError};

use crate::transport::{Transport, TransportEvent, TransportFactory};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect: {0}")]
    Connect(anyhow::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[from] ProtocolError),
}

/// Result of [`Connection::connect`].
pub enum ConnectOutcome {
    /// A new socket was opened; its events must be pumped by the caller.
    Opened(mpsc::Receiver<TransportEvent>),
    /// A socket is already open or being opened.
    AlreadyConnected,
}

pub struct Connection {
    factory: Arc<dyn TransportFactory>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    health: Mutex<PingTracker>,

    is_connected: AtomicBool,
    is_connecting: AtomicBool,
    is_logged_in: AtomicBool,
    has_ongoing_call: AtomicBool,
}

impl Connection {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            transport: Mutex::new(None),
            outbound: Mutex::new(None),
            writer: Mutex::new(None),
            health: Mutex::new(PingTracker::default()),
            is_connected: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            is_logged_in: AtomicBool::new(false),
            has_ongoing_call: AtomicBool::new(false),
        }
    }

    pub async fn connect(&self, url: &str) -> Result<ConnectOutcome, ConnectionError> {
        if self.is_connected() || self.is_connecting.swap(true, Ordering::SeqCst) {
            info!(target: "Client", "connect() called while already connected, ignoring");
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        let (transport, events) = self
            .factory
            .create_transport(url)
            .await
            .map_err(ConnectionError::Connect)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_pump(transport.clone(), rx));

        *lock(&self.transport) = Some(transport);
        *lock(&self.outbound) = Some(tx);
        if let Some(old) = lock(&self.writer).replace(writer) {
            old.abort();
        }
        lock(&self.health).reset();
        self.is_connected.store(true, Ordering::SeqCst);

        Ok(ConnectOutcome::Opened(events))
    }

    /// Queues `request` for the writer task.
    pub fn send(&self, request: &OutboundRequest) -> Result<(), ConnectionError> {
        let text = request.to_json()?;
        debug!(target: "Client/Send", "--> {} ({})", request.method(), request.id);
        self.send_text(text)
    }

    pub fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        lock(&self.outbound)
            .as_ref()
            .ok_or(ConnectionError::NotConnected)?
            .send(text)
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Records a server ping. Called from the receive path only.
    pub fn record_ping(&self) -> ConnectionMetrics {
        lock(&self.health).record_ping(Instant::now())
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        if !self.is_connected() {
            return ConnectionMetrics::disconnected();
        }
        lock(&self.health).snapshot(Instant::now())
    }

    /// The socket went away on its own; forget it without waiting on it.
    pub(crate) fn mark_closed(&self) {
        self.reset_flags();
        lock(&self.outbound).take();
        lock(&self.transport).take();
    }

    /// Closes the socket and resets all flags. Safe to call repeatedly.
    pub async fn destroy(&self) {
        self.reset_flags();
        // Closing the queue lets the writer flush what is already in it.
        lock(&self.outbound).take();
        let writer = lock(&self.writer).take();
        if let Some(mut writer) = writer
            && timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err()
        {
            warn!(target: "Client/Send", "Writer did not drain in time, aborting");
            writer.abort();
        }
        let transport = lock(&self.transport).take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        lock(&self.health).reset();
    }

    fn reset_flags(&self) {
        self.is_connected.store(false, Ordering::SeqCst);
        self.is_logged_in.store(false, Ordering::SeqCst);
        self.has_ongoing_call.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in.load(Ordering::SeqCst)
    }

    pub(crate) fn set_logged_in(&self, value: bool) {
        self.is_logged_in.store(value, Ordering::SeqCst);
    }

    pub fn has_ongoing_call(&self) -> bool {
        self.has_ongoing_call.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ongoing_call(&self, value: bool) {
        self.has_ongoing_call.store(value, Ordering::SeqCst);
    }
}

async fn write_pump(transport: Arc<dyn Transport>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = transport.send_text(&text).await {
            warn!(target: "Client/Send", "Write failed, closing socket: {e}");
            transport.disconnect().await;
            return;
        }
    }
    debug!(target: "Client/Send", "Outbound queue closed, writer exiting");
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
