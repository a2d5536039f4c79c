use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep, sleep_until};
use txcore::ice::{IceCandidateQueue, PendingIceCandidate};
use txcore::types::call::{CallId, CallPhase};

use super::engine::{IceConnectionState, MediaEngine, MediaError, SessionDescription};
use crate::connection::lock;

/// Offer/answer and ICE sequencing for one call.
pub(crate) struct MediaNegotiator {
    call_id: CallId,
    /// Empty until the peer for an incoming call has been built.
    engine: Mutex<Option<Arc<dyn MediaEngine>>>,
    ice_queue: Mutex<IceCandidateQueue>,
    ice_servers: Vec<String>,
    ice_state: Mutex<IceConnectionState>,
    /// Bumped on every local candidate since the last description was set.
    candidates_seen: watch::Sender<u64>,
    renegotiation_timer: Mutex<Option<AbortHandle>>,
}

impl MediaNegotiator {
    pub(crate) fn new(call_id: CallId, engine: Arc<dyn MediaEngine>, ice_servers: Vec<String>) -> Self {
        let negotiator = Self::pending(call_id, ice_servers);
        *lock(&negotiator.engine) = Some(engine);
        negotiator
    }

    /// A negotiator whose peer is installed later with [`Self::replace_engine`].
    pub(crate) fn pending(call_id: CallId, ice_servers: Vec<String>) -> Self {
        Self {
            call_id,
            engine: Mutex::new(None),
            ice_queue: Mutex::new(IceCandidateQueue::new()),
            ice_servers,
            ice_state: Mutex::new(IceConnectionState::New),
            candidates_seen: watch::channel(0).0,
            renegotiation_timer: Mutex::new(None),
        }
    }

    fn engine(&self) -> Result<Arc<dyn MediaEngine>, MediaError> {
        lock(&self.engine)
            .clone()
            .ok_or_else(|| MediaError::Unavailable(format!("no media peer for {}", self.call_id)))
    }

    /// Creates an offer and installs it as the local description.
    pub(crate) async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MediaError> {
        let engine = self.engine()?;
        let offer = engine.create_offer(ice_restart).await?;
        self.candidates_seen.send_replace(0);
        engine.set_local_description(&offer).await?;
        Ok(offer)
    }

    /// Creates an answer to the applied remote offer and installs it locally.
    pub(crate) async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let engine = self.engine()?;
        let answer = engine.create_answer().await?;
        self.candidates_seen.send_replace(0);
        engine.set_local_description(&answer).await?;
        Ok(answer)
    }

    /// Applies a remote description, then replays queued candidates in
    /// arrival order.
    pub(crate) async fn apply_remote(&self, description: SessionDescription) -> Result<(), MediaError> {
        let engine = self.engine()?;
        engine.set_remote_description(&description).await?;

        let backlog = lock(&self.ice_queue).remote_applied();
        if !backlog.is_empty() {
            debug!(target: "Media", "[{}] Flushing {} queued ICE candidates", self.call_id, backlog.len());
        }
        for candidate in backlog {
            if let Err(e) = engine.add_ice_candidate(&candidate).await {
                warn!(target: "Media", "[{}] Dropping queued candidate: {e}", self.call_id);
            }
        }
        Ok(())
    }

    /// Pre-answer media SDP. Applied right away, it unblocks early audio.
    pub(crate) async fn apply_early_remote(&self, sdp: String) -> Result<(), MediaError> {
        self.apply_remote(SessionDescription::answer(sdp)).await
    }

    /// Handles a candidate produced by the engine.
    pub(crate) async fn on_local_candidate(&self, candidate: PendingIceCandidate, phase: &CallPhase) {
        self.candidates_seen.send_modify(|n| *n += 1);

        if *phase == CallPhase::Active && !candidate.is_server_derived(&self.ice_servers) {
            debug!(
                target: "Media",
                "[{}] Ignoring non-server candidate while active: {}",
                self.call_id, candidate.candidate
            );
            return;
        }

        let ready = lock(&self.ice_queue).offer(candidate);
        if let Some(candidate) = ready {
            let added = match self.engine() {
                Ok(engine) => engine.add_ice_candidate(&candidate).await,
                Err(e) => Err(e),
            };
            if let Err(e) = added {
                warn!(target: "Media", "[{}] {e}", self.call_id);
            }
        }
    }

    /// Waits for the first candidate, then until candidates stop arriving
    /// for `idle`. Never waits longer than `max` overall.
    pub(crate) async fn wait_for_gathering(&self, idle: Duration, max: Duration) {
        let mut seen = self.candidates_seen.subscribe();
        let deadline = Instant::now() + max;

        if *seen.borrow_and_update() == 0 {
            tokio::select! {
                changed = seen.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep_until(deadline) => {
                    debug!(target: "Media", "[{}] No ICE candidate before deadline", self.call_id);
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                changed = seen.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep(idle) => return,
                _ = sleep_until(deadline) => return,
            }
        }
    }

    pub(crate) async fn local_description(&self) -> Option<SessionDescription> {
        self.engine().ok()?.local_description().await
    }

    pub(crate) fn set_ice_state(&self, state: IceConnectionState) {
        *lock(&self.ice_state) = state;
    }

    pub(crate) fn ice_state(&self) -> IceConnectionState {
        *lock(&self.ice_state)
    }

    /// A new remote description is coming; hold candidates until then.
    pub(crate) fn expect_remote(&self) {
        lock(&self.ice_queue).await_remote();
    }

    /// Renegotiation was abandoned; candidates flow straight to the engine again.
    pub(crate) async fn release_queue(&self) {
        let backlog = lock(&self.ice_queue).remote_applied();
        let Ok(engine) = self.engine() else {
            return;
        };
        for candidate in backlog {
            if let Err(e) = engine.add_ice_candidate(&candidate).await {
                warn!(target: "Media", "[{}] {e}", self.call_id);
            }
        }
    }

    /// Runs `on_due` after `grace` unless disarmed first. Re-arming restarts
    /// the wait.
    pub(crate) fn arm_renegotiation<F>(&self, grace: Duration, on_due: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            sleep(grace).await;
            on_due();
        });
        let handle = task.abort_handle();
        if let Some(previous) = lock(&self.renegotiation_timer).replace(handle.clone()) {
            previous.abort();
        }
        handle
    }

    pub(crate) fn disarm_renegotiation(&self) {
        if let Some(timer) = lock(&self.renegotiation_timer).take() {
            timer.abort();
        }
    }

    pub(crate) fn renegotiation_armed(&self) -> bool {
        lock(&self.renegotiation_timer)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Installs a fresh peer (the first one of an incoming call, or a new
    /// one after a reconnect) and returns the previous one.
    pub(crate) fn replace_engine(
        &self,
        engine: Arc<dyn MediaEngine>,
    ) -> Option<Arc<dyn MediaEngine>> {
        let mut queue = lock(&self.ice_queue);
        queue.clear();
        queue.await_remote();
        *lock(&self.ice_state) = IceConnectionState::New;
        lock(&self.engine).replace(engine)
    }

    pub(crate) async fn close(&self) {
        self.disarm_renegotiation();
        lock(&self.ice_queue).clear();
        if let Ok(engine) = self.engine() {
            engine.close().await;
        }
    }
}
