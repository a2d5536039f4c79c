use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use txcore::protocol::{
    AnswerMessage, ByeMessage, InviteMessage, MediaMessage, ModifyAction, RingingMessage,
    SocketMethod,
};
use txcore::types::call::{CallId, CallPhase};

use super::error::CallError;
use super::state::{CallInfo, CallTransition, InvalidTransition};
use crate::connection::lock;
use crate::media::{MediaEvent, MediaNegotiator};

/// Server frames routed to one call.
#[derive(Debug, Clone)]
pub(crate) enum CallSignal {
    Invite(InviteMessage),
    Attach(InviteMessage),
    Answer(AnswerMessage),
    Media(MediaMessage),
    Ringing(RingingMessage),
    Bye(ByeMessage),
    ModifyResult {
        action: ModifyAction,
        sdp: Option<String>,
    },
}

impl CallSignal {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Invite(_) => SocketMethod::Invite.as_str(),
            Self::Attach(_) => SocketMethod::Attach.as_str(),
            Self::Answer(_) => SocketMethod::Answer.as_str(),
            Self::Media(_) => SocketMethod::Media.as_str(),
            Self::Ringing(_) => SocketMethod::Ringing.as_str(),
            Self::Bye(_) => SocketMethod::Bye.as_str(),
            Self::ModifyResult { .. } => SocketMethod::Modify.as_str(),
        }
    }
}

/// Everything the per-call worker consumes, in arrival order.
#[derive(Debug)]
pub(crate) enum CallInput {
    Signal(CallSignal),
    Media(MediaEvent),
    /// The ICE grace window ran out.
    RenegotiationDue,
    /// The server refused an `updateMedia`.
    RenegotiationRejected(String),
}

/// Live state of one call. Only the registry holds it for longer than a
/// single operation.
pub(crate) struct Call {
    pub(crate) id: CallId,
    info: Mutex<CallInfo>,
    pub(crate) media: MediaNegotiator,
    inbox: mpsc::UnboundedSender<CallInput>,
    in_flight: Mutex<Option<SocketMethod>>,
    tasks: Mutex<Vec<AbortHandle>>,
    ended: AtomicBool,
}

impl Call {
    pub(crate) fn new(
        info: CallInfo,
        media: MediaNegotiator,
        inbox: mpsc::UnboundedSender<CallInput>,
    ) -> Self {
        Self {
            id: info.call_id,
            info: Mutex::new(info),
            media,
            inbox,
            in_flight: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    pub(crate) fn phase(&self) -> CallPhase {
        lock(&self.info).phase.clone()
    }

    pub(crate) fn snapshot(&self) -> CallInfo {
        lock(&self.info).clone()
    }

    pub(crate) fn with_info<R>(&self, f: impl FnOnce(&mut CallInfo) -> R) -> R {
        f(&mut lock(&self.info))
    }

    /// Applies `transition` and returns the phase it led to.
    pub(crate) fn transition(
        &self,
        transition: CallTransition,
    ) -> Result<CallPhase, InvalidTransition> {
        let mut info = lock(&self.info);
        info.apply_transition(transition)?;
        Ok(info.phase.clone())
    }

    /// Claims the single outbound-request slot of this call.
    pub(crate) fn begin_request(
        self: &Arc<Self>,
        method: SocketMethod,
    ) -> Result<InFlight, CallError> {
        let mut slot = lock(&self.in_flight);
        if let Some(pending) = *slot {
            return Err(CallError::BusyLocally {
                call_id: self.id,
                pending,
            });
        }
        *slot = Some(method);
        Ok(InFlight {
            call: self.clone(),
            method,
        })
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> Option<SocketMethod> {
        *lock(&self.in_flight)
    }

    pub(crate) fn enqueue(&self, input: CallInput) {
        if self.inbox.send(input).is_err() {
            debug!(target: "Call", "[{}] Worker gone, dropping input", self.id);
        }
    }

    pub(crate) fn inbox(&self) -> mpsc::UnboundedSender<CallInput> {
        self.inbox.clone()
    }

    /// Ties a background task to the call's lifetime.
    pub(crate) fn track(&self, handle: AbortHandle) {
        if self.is_ended() {
            handle.abort();
            return;
        }
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Marks the call as ended. Only the first caller gets `true`.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    /// Stops every task of the call and releases the media peer. Work that
    /// was in flight is discarded.
    pub(crate) fn shutdown(self: &Arc<Self>) {
        self.ended.store(true, Ordering::SeqCst);
        self.media.disarm_renegotiation();

        let call = self.clone();
        tokio::spawn(async move { call.media.close().await });

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            task.abort();
        }
    }
}

/// Held while a request of this call awaits its response.
pub(crate) struct InFlight {
    call: Arc<Call>,
    method: SocketMethod,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut slot = lock(&self.call.in_flight);
        if *slot == Some(self.method) {
            *slot = None;
        }
    }
}
