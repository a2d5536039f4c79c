//! Call operations exposed on [`Client`] and the lifecycle helpers they share
//! with the inbound path.

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use txcore::protocol::{
    ByeParams, CallDialogParams, CallParams, DialogRef, InfoParams, ModifyAction, ModifyParams,
    RequestPayload, SocketMethod,
};
use txcore::types::call::{
    CallDirection, CallId, CallPhase, CauseCode, CustomHeader, TerminationReason,
};
use txcore::types::events::Event;

use super::call::{Call, CallInput, InFlight};
use super::error::CallError;
use super::handle::CallHandle;
use super::state::{CallInfo, CallTransition};
use crate::client::{Client, ClientError};
use crate::media::{MediaEvent, MediaNegotiator};
use crate::request::RequestError;

/// Parameters of an outgoing call.
#[derive(Debug, Clone, Default)]
pub struct InviteOptions {
    /// Overrides the caller id of the session.
    pub caller_name: Option<String>,
    pub caller_number: Option<String>,
    pub destination: String,
    pub client_state: Option<String>,
    pub custom_headers: Vec<CustomHeader>,
}

impl InviteOptions {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }
}

fn is_dtmf_digit(c: char) -> bool {
    matches!(c, '0'..='9' | '*' | '#' | 'A'..='D')
}

impl Client {
    /// Starts an outgoing call. Returns as soon as the call is registered;
    /// the invite goes out once the local offer is ready.
    pub async fn new_invite(
        self: &Arc<Self>,
        options: InviteOptions,
    ) -> Result<CallHandle, ClientError> {
        if !self.connection.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let session_id = self.require_session_id()?;

        let call_id = CallId::new();
        let mut call_info =
            CallInfo::new_outgoing(call_id, &options.destination, options.custom_headers.clone());
        call_info.remote_number = Some(options.destination.clone());
        call_info.client_state = options.client_state.clone();
        let call = self.create_call(call_info).await?;
        info!(target: "Call", "[{call_id}] Dialing {}", options.destination);

        let (session_name, session_number) = self.caller_id();
        let dialog = CallDialogParams {
            caller_id_name: options.caller_name.or(session_name),
            caller_id_number: options.caller_number.or(session_number),
            destination_number: Some(options.destination),
            client_state: options.client_state,
            custom_headers: options.custom_headers,
            ..CallDialogParams::audio_only(call_id)
        };

        let task = tokio::spawn(self.clone().send_invite(call.clone(), session_id, dialog));
        call.track(task.abort_handle());
        Ok(CallHandle::new(self, call_id))
    }

    async fn send_invite(
        self: Arc<Self>,
        call: Arc<Call>,
        session_id: String,
        dialog: CallDialogParams,
    ) {
        let offer = match call.media.create_offer(false).await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_call(&call, format!("could not create offer: {e}"));
                return;
            }
        };
        call.media
            .wait_for_gathering(self.config.gathering_idle, self.config.gathering_max)
            .await;
        let sdp = self.gathered_sdp(&call, offer.sdp).await;

        if !self.calls.is_current(&call) {
            debug!(target: "Call", "[{}] Ended before the invite went out", call.id);
            return;
        }
        let guard = match call.begin_request(SocketMethod::Invite) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(target: "Call", "[{}] {e}", call.id);
                return;
            }
        };
        call.with_info(|info| {
            info.local_sdp = Some(sdp.clone());
            info.mark_milestone("invite_sent");
        });
        if self.advance(&call, CallTransition::InviteSent).is_none() {
            return;
        }

        let payload = RequestPayload::Invite(CallParams {
            sessid: session_id,
            sdp,
            user_agent: Some(self.config.user_agent.clone()),
            dialog_params: dialog,
        });
        self.dispatch_call_request(&call, guard, payload).await;
    }

    /// Answers a ringing incoming call.
    pub fn accept_call(
        self: &Arc<Self>,
        call_id: CallId,
        destination_number: &str,
        custom_headers: Vec<CustomHeader>,
    ) -> Result<CallHandle, ClientError> {
        let call = self
            .calls
            .get(&call_id)
            .ok_or(CallError::NotFound(call_id))?;
        let snapshot = call.snapshot();
        if snapshot.direction != CallDirection::Incoming || snapshot.phase != CallPhase::Ringing {
            warn!(
                target: "Call",
                "[{call_id}] Ignoring accept, call is {:?} and {}",
                snapshot.direction, snapshot.phase
            );
            return Err(CallError::WrongPhase {
                call_id,
                phase: snapshot.phase,
                action: "accept",
            }
            .into());
        }
        let session_id = self.require_session_id()?;
        let guard = call.begin_request(SocketMethod::Answer)?;

        let (caller_name, caller_number) = self.caller_id();
        let dialog = CallDialogParams {
            caller_id_name: caller_name,
            caller_id_number: caller_number,
            destination_number: Some(destination_number.to_string()),
            remote_caller_id_name: snapshot.remote_name,
            client_state: snapshot.client_state,
            custom_headers,
            ..CallDialogParams::audio_only(call_id)
        };

        let task = tokio::spawn(
            self.clone()
                .send_answer(call.clone(), guard, session_id, dialog),
        );
        call.track(task.abort_handle());
        Ok(CallHandle::new(self, call_id))
    }

    async fn send_answer(
        self: Arc<Self>,
        call: Arc<Call>,
        guard: InFlight,
        session_id: String,
        dialog: CallDialogParams,
    ) {
        let answer = match call.media.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_call(&call, format!("could not create answer: {e}"));
                return;
            }
        };
        call.media
            .wait_for_gathering(self.config.gathering_idle, self.config.gathering_max)
            .await;
        let sdp = self.gathered_sdp(&call, answer.sdp).await;

        if !self.calls.is_current(&call) || call.phase() != CallPhase::Ringing {
            debug!(target: "Call", "[{}] Call moved on while answering", call.id);
            return;
        }
        call.with_info(|info| {
            info.local_sdp = Some(sdp.clone());
            info.mark_milestone("answer_sent");
        });

        let payload = RequestPayload::Answer(CallParams {
            sessid: session_id,
            sdp,
            user_agent: Some(self.config.user_agent.clone()),
            dialog_params: dialog,
        });
        self.dispatch_call_request(&call, guard, payload).await;
        if self.advance(&call, CallTransition::LocalAnswered).is_some() {
            self.core_events
                .dispatch(&Event::CallAnswered { call_id: call.id });
        }
    }

    /// Hangs up. Processing for the call stops before this returns; ending
    /// an unknown or already ended call is a no-op.
    pub fn end_call(&self, call_id: CallId) -> Result<(), ClientError> {
        let Some(call) = self.calls.get(&call_id) else {
            debug!(target: "Call", "[{call_id}] end_call on a call that is already gone");
            return Ok(());
        };

        let phase = call.phase();
        let cause = match phase {
            CallPhase::New => CauseCode::OriginatorCancel,
            CallPhase::Connecting | CallPhase::Ringing => CauseCode::UserBusy,
            _ => CauseCode::NormalClearing,
        };
        let reason = TerminationReason::local(cause);
        if !self.finalize_call(&call, CallTransition::Terminated(Some(reason))) {
            return Ok(());
        }

        // The server never heard of a call whose invite was not sent yet.
        if phase == CallPhase::New {
            return Ok(());
        }
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };
        let bye = RequestPayload::Bye(ByeParams {
            sessid: session_id,
            cause_code: cause.code(),
            cause: cause.as_str().to_string(),
            dialog_params: DialogRef { call_id },
        });
        if let Err(e) = self.send_request(bye) {
            debug!(target: "Call", "[{call_id}] Bye not sent: {e}");
        }
        Ok(())
    }

    /// Ends the call a single-call UI would consider current: the newest
    /// established call, otherwise the newest call.
    pub fn end_current_call(&self) -> Result<(), ClientError> {
        let snapshots = self.calls.snapshots();
        let current = snapshots
            .iter()
            .rev()
            .find(|info| info.phase.is_established())
            .or(snapshots.last())
            .ok_or(CallError::NoCurrentCall)?;
        self.end_call(current.call_id)
    }

    /// Flips ACTIVE ⇄ HELD right away and tells the server. A later server
    /// error only produces a warning.
    pub async fn hold_unhold(self: &Arc<Self>, call_id: CallId) -> Result<CallPhase, ClientError> {
        let call = self
            .calls
            .get(&call_id)
            .ok_or(CallError::NotFound(call_id))?;
        if !self.connection.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let session_id = self.require_session_id()?;

        let (transition, action) = match call.phase() {
            CallPhase::Active => (CallTransition::Hold, ModifyAction::Hold),
            CallPhase::Held => (CallTransition::Unhold, ModifyAction::Unhold),
            phase => {
                warn!(target: "Call", "[{call_id}] Cannot toggle hold while {phase}");
                return Err(CallError::WrongPhase {
                    call_id,
                    phase,
                    action: "hold",
                }
                .into());
            }
        };
        let guard = call.begin_request(SocketMethod::Modify)?;
        let phase = self
            .advance(&call, transition)
            .ok_or(CallError::WrongPhase {
                call_id,
                phase: call.phase(),
                action: "hold",
            })?;

        let payload = RequestPayload::Modify(ModifyParams {
            sessid: session_id,
            action,
            sdp: None,
            dialog_params: DialogRef { call_id },
        });
        self.dispatch_call_request(&call, guard, payload).await;
        Ok(phase)
    }

    /// Local flag only; the audio path is muted by the media engine's owner.
    pub fn mute_unmute(&self, call_id: CallId) -> Result<bool, ClientError> {
        let call = self
            .calls
            .get(&call_id)
            .ok_or(CallError::NotFound(call_id))?;
        let muted = call.with_info(|info| {
            info.muted = !info.muted;
            info.muted
        });
        self.core_events
            .dispatch(&Event::CallMuteChanged { call_id, muted });
        Ok(muted)
    }

    pub fn toggle_speaker(&self, call_id: CallId) -> Result<bool, ClientError> {
        let call = self
            .calls
            .get(&call_id)
            .ok_or(CallError::NotFound(call_id))?;
        let enabled = call.with_info(|info| {
            info.speaker_on = !info.speaker_on;
            info.speaker_on
        });
        self.core_events
            .dispatch(&Event::CallSpeakerChanged { call_id, enabled });
        Ok(enabled)
    }

    /// Sends DTMF digits (`0-9`, `*`, `#`, `A-D`). Fire and forget.
    pub fn dtmf(&self, call_id: CallId, digits: &str) -> Result<(), ClientError> {
        if digits.is_empty() || !digits.chars().all(is_dtmf_digit) {
            return Err(CallError::InvalidDtmf(digits.to_string()).into());
        }
        let call = self
            .calls
            .get(&call_id)
            .ok_or(CallError::NotFound(call_id))?;
        let phase = call.phase();
        if !phase.is_established() {
            return Err(CallError::WrongPhase {
                call_id,
                phase,
                action: "send DTMF on",
            }
            .into());
        }
        let session_id = self.require_session_id()?;

        self.send_request(RequestPayload::Info(InfoParams {
            sessid: session_id,
            dtmf: digits.to_string(),
            dialog_params: DialogRef { call_id },
        }))?;
        self.core_events.dispatch(&Event::DtmfSent {
            call_id,
            digits: digits.to_string(),
        });
        Ok(())
    }

    // Lifecycle helpers shared with the inbound path.

    /// Builds the media peer, registers the call and starts its worker.
    pub(crate) async fn create_call(
        self: &Arc<Self>,
        call_info: CallInfo,
    ) -> Result<Arc<Call>, ClientError> {
        let call_id = call_info.call_id;
        if self.calls.contains(&call_id) {
            return Err(CallError::AlreadyExists(call_id).into());
        }

        let (engine, media_events) = self
            .media_factory
            .create_engine(call_id, &self.config.ice_servers)
            .await?;
        let media = MediaNegotiator::new(call_id, engine.clone(), self.config.ice_servers.clone());
        match self.register_call(call_info, media, Some(media_events)) {
            Ok(call) => Ok(call),
            Err(e) => {
                tokio::spawn(async move { engine.close().await });
                Err(e)
            }
        }
    }

    /// Registers an incoming call right away. Its worker builds the media
    /// peer before it looks at any frame, so the receive loop never waits on
    /// the media engine.
    pub(crate) fn create_incoming_call(
        self: &Arc<Self>,
        call_info: CallInfo,
    ) -> Result<Arc<Call>, ClientError> {
        let media = MediaNegotiator::pending(call_info.call_id, self.config.ice_servers.clone());
        self.register_call(call_info, media, None)
    }

    fn register_call(
        self: &Arc<Self>,
        call_info: CallInfo,
        media: MediaNegotiator,
        media_events: Option<mpsc::Receiver<MediaEvent>>,
    ) -> Result<Arc<Call>, ClientError> {
        let (inbox, inputs) = mpsc::unbounded_channel();
        let call = Arc::new(Call::new(call_info, media, inbox));
        self.calls.insert(call.clone())?;
        self.connection.set_ongoing_call(true);

        let worker = tokio::spawn(
            self.clone()
                .run_call_worker(call.clone(), inputs, media_events),
        );
        call.track(worker.abort_handle());
        Ok(call)
    }

    /// Applies `transition` and reports the new phase. Invalid transitions
    /// are logged and leave the call untouched.
    pub(crate) fn advance(&self, call: &Call, transition: CallTransition) -> Option<CallPhase> {
        match call.transition(transition) {
            Ok(phase) => {
                debug!(target: "Call", "[{}] -> {phase}", call.id);
                self.core_events.dispatch(&Event::CallStateChanged {
                    call_id: call.id,
                    phase: phase.clone(),
                });
                Some(phase)
            }
            Err(e) => {
                warn!(target: "Call", "[{}] {e}", call.id);
                None
            }
        }
    }

    /// Moves the call to its terminal phase, evicts it and stops its tasks.
    /// Returns false if the call was already being torn down.
    pub(crate) fn finalize_call(&self, call: &Arc<Call>, transition: CallTransition) -> bool {
        if !call.begin_teardown() {
            return false;
        }
        let reason = match &transition {
            CallTransition::Terminated(reason) => reason.clone(),
            _ => None,
        };
        let phase = match call.transition(transition) {
            Ok(phase) => phase,
            Err(e) => {
                warn!(target: "Call", "[{}] {e}", call.id);
                call.phase()
            }
        };

        self.calls.remove(call);
        self.connection.set_ongoing_call(!self.calls.is_empty());
        info!(target: "Call", "[{}] Call finished in {phase}", call.id);

        self.core_events.dispatch(&Event::CallStateChanged {
            call_id: call.id,
            phase,
        });
        self.core_events.dispatch(&Event::CallEnded {
            call_id: call.id,
            reason,
        });
        call.shutdown();
        true
    }

    /// Protocol or negotiation failure: the call goes to ERROR and is evicted.
    pub(crate) fn fail_call(&self, call: &Arc<Call>, message: String) {
        if call.is_ended() {
            return;
        }
        error!(target: "Call", "[{}] {message}", call.id);
        self.core_events.dispatch(&Event::CallError {
            call_id: call.id,
            message,
        });
        self.finalize_call(call, CallTransition::ProtocolViolation);
    }

    pub(crate) fn warn_call(&self, call_id: CallId, message: String) {
        warn!(target: "Call", "[{call_id}] {message}");
        self.core_events
            .dispatch(&Event::CallWarning { call_id, message });
    }

    /// Sends a call request and watches for its response in a task tied to
    /// the call. The in-flight slot is released once the response is in.
    pub(crate) async fn dispatch_call_request(
        self: &Arc<Self>,
        call: &Arc<Call>,
        guard: InFlight,
        payload: RequestPayload,
    ) {
        let method = payload.method();
        let action = match &payload {
            RequestPayload::Modify(params) => Some(params.action),
            _ => None,
        };

        let pending = match self.send_tracked(payload).await {
            Ok(pending) => pending,
            Err(e) => {
                drop(guard);
                self.on_call_request_failed(call, method, action, e.to_string());
                return;
            }
        };

        let client = self.clone();
        let watched = call.clone();
        let task = tokio::spawn(async move {
            let result = client
                .await_response(pending, client.config.request_timeout)
                .await;
            drop(guard);
            match result {
                Ok(_) => debug!(target: "Call", "[{}] {method} acknowledged", watched.id),
                Err(RequestError::Timeout) => {
                    client.warn_call(watched.id, format!("{method} was not acknowledged in time"))
                }
                Err(e) => client.on_call_request_failed(&watched, method, action, e.to_string()),
            }
        });
        call.track(task.abort_handle());
    }

    fn on_call_request_failed(
        &self,
        call: &Arc<Call>,
        method: SocketMethod,
        action: Option<ModifyAction>,
        message: String,
    ) {
        if !self.calls.is_current(call) {
            return;
        }
        // The socket went away under the request; recovery decides the call's fate.
        if matches!(call.phase(), CallPhase::Reconnecting(_)) {
            debug!(target: "Call", "[{}] {method} lost with the connection: {message}", call.id);
            return;
        }
        match (method, action) {
            (SocketMethod::Invite | SocketMethod::Answer | SocketMethod::Attach, _) => {
                self.fail_call(call, format!("{method} failed: {message}"))
            }
            (SocketMethod::Modify, Some(ModifyAction::UpdateMedia)) => {
                call.enqueue(CallInput::RenegotiationRejected(message))
            }
            _ => self.warn_call(call.id, format!("{method} failed: {message}")),
        }
    }

    /// Local description after gathering, falling back to the bare one.
    pub(crate) async fn gathered_sdp(&self, call: &Call, fallback: String) -> String {
        call.media
            .local_description()
            .await
            .map(|description| description.sdp)
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtmf_alphabet() {
        assert!("0123456789*#ABCD".chars().all(is_dtmf_digit));
        assert!(!is_dtmf_digit('E'));
        assert!(!is_dtmf_digit('a'));
        assert!(!is_dtmf_digit(' '));
    }

    #[test]
    fn test_invite_options_default_to_session_caller_id() {
        let options = InviteOptions::new("1001");
        assert_eq!(options.destination, "1001");
        assert!(options.caller_name.is_none());
        assert!(options.custom_headers.is_empty());
    }
}
