//! Recovery after the socket drops underneath live calls.
//!
//! Calls move to RECONNECTING and keep their media peers. The socket is
//! re-dialed with back-off while a window timer runs; the server then
//! re-offers each call through `attach`. Calls still waiting when the window
//! closes are dropped with a network-loss reason.

use log::{debug, info, warn};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use txcore::types::call::{CallPhase, NetworkChangeReason, TerminationReason};
use txcore::types::events::Event;

use crate::calls::CallTransition;
use crate::client::Client;
use crate::connection::lock;

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

fn is_reconnecting(phase: &CallPhase) -> bool {
    matches!(phase, CallPhase::Reconnecting(_))
}

/// Tasks of a running recovery. The window spans every drop until the calls
/// are back; a redial loop is started per drop.
#[derive(Default)]
pub(crate) struct RecoveryTasks {
    window: Option<AbortHandle>,
    redial: Option<AbortHandle>,
}

impl RecoveryTasks {
    pub(crate) fn is_running(&self) -> bool {
        self.window.is_some()
    }

    fn cancel(&mut self) {
        for task in [self.window.take(), self.redial.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Client {
    /// Called by the receive loop when its socket goes away.
    pub(crate) async fn handle_connection_lost(
        self: &Arc<Self>,
        generation: u64,
        reason: Option<String>,
    ) {
        if generation != self.connection_generation.load(Ordering::SeqCst) {
            debug!(target: "Client", "Ignoring close of a superseded socket");
            return;
        }
        self.connection.mark_closed();
        self.cancel_background_tasks();
        self.cancel_registration_watchdog();

        let reason = reason.unwrap_or_else(|| "connection closed".to_string());
        let expected = self.expected_disconnect.load(Ordering::SeqCst);
        let auto_reconnect = self.session_config().is_some_and(|s| s.auto_reconnect);
        let forced = self.forced_reconnect.load(Ordering::SeqCst);
        let recover = !expected && auto_reconnect && (forced || !self.calls.is_empty());

        // Calls must be RECONNECTING before their pending requests fail.
        if recover {
            warn!(target: "Client", "Transport lost ({reason}), attempting recovery");
            self.begin_recovery();
        }
        self.clear_waiters().await;

        if expected {
            info!(target: "Client", "Transport disconnected as expected.");
            return;
        }
        if recover {
            return;
        }

        info!(target: "Client", "Transport disconnected: {reason}");
        for call in self.calls.all() {
            self.finalize_call(
                &call,
                CallTransition::Terminated(Some(TerminationReason::network_lost())),
            );
        }
        self.core_events.dispatch(&Event::Disconnected);
    }

    fn begin_recovery(self: &Arc<Self>) {
        for call in self.calls.all() {
            let phase = call.phase();
            if phase.is_terminal() || phase == CallPhase::New || is_reconnecting(&phase) {
                continue;
            }
            self.advance(
                &call,
                CallTransition::ConnectionLost(NetworkChangeReason::NetworkSwitch),
            );
        }
        self.core_events.dispatch(&Event::Reconnecting);

        let mut tasks = lock(&self.recovery);
        if !tasks.is_running() {
            let client = self.clone();
            let window = self.config.reconnect_timeout;
            let window_timer = tokio::spawn(async move {
                sleep(window).await;
                client.fail_recovery();
            });
            tasks.window = Some(window_timer.abort_handle());
        } else {
            info!(target: "Client", "Socket lost again while recovering, redialing");
        }
        // Only the socket a redial opened can drop, so that loop is done with.
        let redial = tokio::spawn(self.clone().reconnect_loop());
        if let Some(previous) = tasks.redial.replace(redial.abort_handle()) {
            previous.abort();
        }
    }

    /// Boxed so the receive loop spawned from here does not make the future
    /// type recursive.
    fn reconnect_loop(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let Some(url) = lock(&self.session).server_url.clone() else {
                warn!(target: "Client", "No server address to reconnect to");
                return;
            };

            let base = self.config.reconnect_delay;
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let backoff = base.saturating_mul(attempt).min(MAX_RECONNECT_BACKOFF);
                let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
                let delay = backoff + Duration::from_millis(jitter_ms);
                info!(
                    target: "Client",
                    "Will attempt to reconnect in {delay:?} (attempt {attempt})"
                );
                sleep(delay).await;

                match self.open_connection(&url).await {
                    Ok(_) => break,
                    Err(e) => warn!(target: "Client", "Reconnect attempt {attempt} failed: {e}"),
                }
            }

            info!(target: "Client", "Reconnected, logging in again");
            self.core_events.dispatch(&Event::Connected);
            match self.session_config() {
                Some(session) => {
                    if let Err(e) = self.login(session) {
                        warn!(target: "Client", "Re-login failed: {e}");
                    }
                }
                None => self.finish_recovery_if_done(),
            }
        })
    }

    /// Ends recovery once connected and no call is waiting for re-attach.
    pub(crate) fn finish_recovery_if_done(&self) {
        if !lock(&self.recovery).is_running() || !self.is_connected() {
            return;
        }
        if self.calls.all().iter().any(|call| is_reconnecting(&call.phase())) {
            return;
        }
        info!(target: "Client", "Recovery complete");
        self.forced_reconnect.store(false, Ordering::SeqCst);
        self.connection.set_ongoing_call(!self.calls.is_empty());
        self.cancel_recovery();
    }

    /// The window closed: calls still waiting are dropped.
    fn fail_recovery(&self) {
        warn!(target: "Client", "Reconnection window elapsed");
        for call in self.calls.all() {
            if !is_reconnecting(&call.phase()) {
                continue;
            }
            self.advance(&call, CallTransition::RecoveryFailed);
            self.finalize_call(
                &call,
                CallTransition::Terminated(Some(TerminationReason::network_lost())),
            );
        }
        self.forced_reconnect.store(false, Ordering::SeqCst);
        self.core_events.dispatch(&Event::ReconnectionTimeout);
        if !self.is_connected() {
            self.core_events.dispatch(&Event::Disconnected);
        }
        // May abort the task running this; nothing async follows.
        self.cancel_recovery();
    }

    pub(crate) fn cancel_recovery(&self) {
        lock(&self.recovery).cancel();
    }

    /// Drops the socket on purpose and goes through recovery even without
    /// calls.
    pub(crate) async fn force_reconnect(self: &Arc<Self>) {
        info!(target: "Client", "Forcing reconnect");
        self.forced_reconnect.store(true, Ordering::SeqCst);
        self.connection.destroy().await;
    }
}
