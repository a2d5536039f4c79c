//! Per-call worker: consumes routed server frames and media-engine events in
//! arrival order.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use txcore::protocol::{
    AnswerMessage, ByeMessage, CallDialogParams, CallParams, DialogRef, InviteMessage,
    MediaMessage, ModifyAction, ModifyParams, RequestPayload, RingingMessage, SocketMethod,
};
use txcore::types::call::{CallPhase, TerminationReason};
use txcore::types::events::{CallRinging, Event, IncomingCall};

use super::call::{Call, CallInput, CallSignal};
use super::state::CallTransition;
use crate::client::Client;
use crate::media::{MediaEvent, SessionDescription};

impl Client {
    pub(crate) async fn run_call_worker(
        self: Arc<Self>,
        call: Arc<Call>,
        mut inputs: mpsc::UnboundedReceiver<CallInput>,
        media_events: Option<mpsc::Receiver<MediaEvent>>,
    ) {
        let mut media_events = match media_events {
            Some(events) => events,
            None => match self.provision_media(&call).await {
                Some(events) => events,
                None => return,
            },
        };

        loop {
            let input = tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
                Some(event) = media_events.recv() => CallInput::Media(event),
            };

            if call.is_ended() || !self.calls.is_current(&call) {
                debug!(target: "Call", "[{}] Discarding input for a finished call", call.id);
                break;
            }

            match input {
                CallInput::Signal(signal) => {
                    self.on_call_signal(&call, signal, &mut media_events).await
                }
                CallInput::Media(event) => self.on_media_event(&call, event).await,
                CallInput::RenegotiationDue => self.start_ice_renegotiation(&call).await,
                CallInput::RenegotiationRejected(message) => {
                    self.abandon_renegotiation(&call, format!("updateMedia rejected: {message}"))
                        .await
                }
            }
        }
        debug!(target: "Call", "[{}] Worker stopped", call.id);
    }

    /// Builds the peer of a call registered without one. Frames that arrive
    /// meanwhile wait in the call's inbox.
    async fn provision_media(&self, call: &Arc<Call>) -> Option<mpsc::Receiver<MediaEvent>> {
        match self
            .media_factory
            .create_engine(call.id, &self.config.ice_servers)
            .await
        {
            Ok((engine, events)) => {
                call.media.replace_engine(engine.clone());
                if call.is_ended() {
                    engine.close().await;
                    return None;
                }
                Some(events)
            }
            Err(e) => {
                self.fail_call(call, format!("could not create media peer: {e}"));
                None
            }
        }
    }

    async fn on_call_signal(
        self: &Arc<Self>,
        call: &Arc<Call>,
        signal: CallSignal,
        media_events: &mut mpsc::Receiver<MediaEvent>,
    ) {
        debug!(target: "Call", "[{}] Handling {}", call.id, signal.kind());
        match signal {
            CallSignal::Invite(invite) => self.on_invite(call, invite).await,
            CallSignal::Attach(offer) => self.on_attach(call, offer, media_events).await,
            CallSignal::Answer(answer) => self.on_answer(call, answer).await,
            CallSignal::Media(media) => self.on_early_media(call, media).await,
            CallSignal::Ringing(ringing) => self.on_ringing(call, ringing),
            CallSignal::Bye(bye) => self.on_bye(call, bye),
            CallSignal::ModifyResult { action, sdp } => {
                self.on_modify_result(call, action, sdp).await
            }
        }
    }

    async fn on_invite(&self, call: &Arc<Call>, invite: InviteMessage) {
        if let Err(e) = call
            .media
            .apply_remote(SessionDescription::offer(invite.sdp))
            .await
        {
            self.fail_call(call, format!("could not apply remote offer: {e}"));
            return;
        }
        info!(
            target: "Call",
            "[{}] Incoming call from {}",
            call.id,
            invite.caller_id_number.as_deref().unwrap_or("unknown")
        );
        self.core_events.dispatch(&Event::IncomingCall(IncomingCall {
            call_id: call.id,
            caller_name: invite.caller_id_name,
            caller_number: invite.caller_id_number,
            telnyx_session_id: invite.telnyx_session_id,
            telnyx_leg_id: invite.telnyx_leg_id,
            custom_headers: invite.dialog_params.custom_headers,
        }));
    }

    async fn on_answer(&self, call: &Arc<Call>, answer: AnswerMessage) {
        let phase = call.phase();
        if !matches!(phase, CallPhase::Connecting | CallPhase::Ringing) {
            debug!(target: "Call", "[{}] Ignoring answer while {phase}", call.id);
            return;
        }

        match answer.sdp {
            Some(sdp) => {
                if let Err(e) = call
                    .media
                    .apply_remote(SessionDescription::answer(sdp.clone()))
                    .await
                {
                    self.fail_call(call, format!("could not apply remote answer: {e}"));
                    return;
                }
                call.with_info(|info| {
                    info.remote_sdp = Some(sdp);
                    info.mark_milestone("answer");
                });
                if self.advance(call, CallTransition::AnswerReceived).is_some() {
                    self.core_events
                        .dispatch(&Event::CallAnswered { call_id: call.id });
                }
            }
            None if call.with_info(|info| info.early_media) => {
                // The early description is already applied; media decides when we are up.
                call.with_info(|info| info.mark_milestone("answer"));
                self.advance(call, CallTransition::EarlyAnswer);
                self.core_events
                    .dispatch(&Event::CallAnswered { call_id: call.id });
                if call.media.ice_state().is_connected() {
                    self.advance(call, CallTransition::MediaConnected);
                }
            }
            None => self.fail_call(call, "answer without SDP and no early media".to_string()),
        }
    }

    async fn on_early_media(&self, call: &Arc<Call>, media: MediaMessage) {
        let phase = call.phase();
        if !matches!(phase, CallPhase::Connecting | CallPhase::Ringing) {
            debug!(target: "Call", "[{}] Ignoring media while {phase}", call.id);
            return;
        }
        let Some(sdp) = media.sdp else {
            self.warn_call(call.id, "media event without SDP".to_string());
            return;
        };

        if let Err(e) = call.media.apply_early_remote(sdp.clone()).await {
            self.warn_call(call.id, format!("could not apply early media: {e}"));
            return;
        }
        call.with_info(|info| {
            info.early_media = true;
            info.remote_sdp = Some(sdp);
            info.mark_milestone("early_media");
        });
        self.core_events
            .dispatch(&Event::CallEarlyMedia { call_id: call.id });
    }

    fn on_ringing(&self, call: &Arc<Call>, ringing: RingingMessage) {
        call.with_info(|info| {
            info.telnyx_session_id = ringing.telnyx_session_id.or(info.telnyx_session_id.take());
            info.telnyx_leg_id = ringing.telnyx_leg_id.or(info.telnyx_leg_id.take());
            info.mark_milestone("ringing");
        });
        if self.advance(call, CallTransition::RingingReceived).is_none() {
            return;
        }
        self.core_events.dispatch(&Event::CallRinging(CallRinging {
            call_id: call.id,
            caller_name: ringing.caller_id_name,
            caller_number: ringing.caller_id_number,
            custom_headers: ringing.dialog_params.custom_headers,
        }));
    }

    fn on_bye(&self, call: &Arc<Call>, bye: ByeMessage) {
        info!(
            target: "Call",
            "[{}] Remote hangup: {}",
            call.id,
            bye.cause.as_deref().unwrap_or("no cause")
        );
        let reason = TerminationReason {
            cause: bye.cause,
            cause_code: bye.cause_code,
            sip_code: bye.sip_code,
            sip_reason: bye.sip_reason,
        };
        self.finalize_call(call, CallTransition::Terminated(Some(reason)));
    }

    async fn on_modify_result(
        &self,
        call: &Arc<Call>,
        action: ModifyAction,
        sdp: Option<String>,
    ) {
        if action != ModifyAction::UpdateMedia {
            debug!(target: "Call", "[{}] Server confirmed {action:?}", call.id);
            return;
        }
        if call.phase() != CallPhase::Renegotiating {
            debug!(target: "Call", "[{}] Late updateMedia answer ignored", call.id);
            return;
        }
        let Some(sdp) = sdp else {
            self.abandon_renegotiation(call, "updateMedia answer without SDP".to_string())
                .await;
            return;
        };

        match call
            .media
            .apply_remote(SessionDescription::answer(sdp.clone()))
            .await
        {
            Ok(()) => {
                call.with_info(|info| info.remote_sdp = Some(sdp));
                info!(target: "Call", "[{}] ICE renegotiation complete", call.id);
                self.advance(call, CallTransition::RenegotiationFinished);
            }
            Err(e) => {
                self.abandon_renegotiation(call, format!("could not apply updateMedia answer: {e}"))
                    .await
            }
        }
    }

    async fn on_media_event(self: &Arc<Self>, call: &Arc<Call>, event: MediaEvent) {
        match event {
            MediaEvent::IceCandidate(candidate) => {
                let phase = call.phase();
                call.media.on_local_candidate(candidate, &phase).await;
                // Fresh candidate activity restarts the grace window.
                if call.media.renegotiation_armed() {
                    self.arm_renegotiation(call);
                }
            }
            MediaEvent::IceConnectionState(state) => {
                debug!(target: "Media", "[{}] ICE {state:?}", call.id);
                call.media.set_ice_state(state);
                if state.is_connected() {
                    call.media.disarm_renegotiation();
                    if call.phase() == CallPhase::Connecting && call.with_info(|i| i.early_media) {
                        self.advance(call, CallTransition::MediaConnected);
                    }
                } else if state.is_degraded() && call.phase() == CallPhase::Active {
                    self.arm_renegotiation(call);
                }
            }
        }
    }

    fn arm_renegotiation(&self, call: &Arc<Call>) {
        let inbox = call.inbox();
        let timer = call
            .media
            .arm_renegotiation(self.config.renegotiation_grace, move || {
                let _ = inbox.send(CallInput::RenegotiationDue);
            });
        call.track(timer);
    }

    /// ICE restart: new offer, sent as `updateMedia`. Any local failure keeps
    /// the current media path.
    async fn start_ice_renegotiation(self: &Arc<Self>, call: &Arc<Call>) {
        if call.phase() != CallPhase::Active || call.media.ice_state().is_connected() {
            return;
        }
        let Some(session_id) = self.session_id() else {
            return;
        };
        let guard = match call.begin_request(SocketMethod::Modify) {
            Ok(guard) => guard,
            Err(e) => {
                debug!(target: "Call", "[{}] Renegotiation postponed: {e}", call.id);
                return;
            }
        };
        info!(target: "Call", "[{}] Media path degraded, restarting ICE", call.id);
        if self
            .advance(call, CallTransition::RenegotiationStarted)
            .is_none()
        {
            return;
        }
        call.media.expect_remote();

        let offer = match call.media.create_offer(true).await {
            Ok(offer) => offer,
            Err(e) => {
                drop(guard);
                self.abandon_renegotiation(call, format!("ICE restart offer failed: {e}"))
                    .await;
                return;
            }
        };
        if !self.calls.is_current(call) {
            return;
        }
        call.with_info(|info| info.local_sdp = Some(offer.sdp.clone()));

        let payload = RequestPayload::Modify(ModifyParams {
            sessid: session_id,
            action: ModifyAction::UpdateMedia,
            sdp: Some(offer.sdp),
            dialog_params: DialogRef { call_id: call.id },
        });
        self.dispatch_call_request(call, guard, payload).await;
    }

    async fn abandon_renegotiation(&self, call: &Arc<Call>, message: String) {
        if call.phase() != CallPhase::Renegotiating {
            return;
        }
        self.advance(call, CallTransition::RenegotiationFinished);
        call.media.release_queue().await;
        self.warn_call(call.id, message);
    }

    /// Server re-offer for a call that survived a reconnect: fresh peer,
    /// answer, then `attach`.
    async fn on_attach(
        self: &Arc<Self>,
        call: &Arc<Call>,
        offer: InviteMessage,
        media_events: &mut mpsc::Receiver<MediaEvent>,
    ) {
        let phase = call.phase();
        if !matches!(phase, CallPhase::Reconnecting(_)) {
            warn!(target: "Call", "[{}] Unexpected attach while {phase}", call.id);
            return;
        }

        let (engine, events) = match self
            .media_factory
            .create_engine(call.id, &self.config.ice_servers)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.fail_call(call, format!("could not rebuild media peer: {e}"));
                return;
            }
        };
        if let Some(previous) = call.media.replace_engine(engine) {
            tokio::spawn(async move { previous.close().await });
        }
        *media_events = events;

        let answer = match call
            .media
            .apply_remote(SessionDescription::offer(offer.sdp))
            .await
        {
            Ok(()) => call.media.create_answer().await,
            Err(e) => Err(e),
        };
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_call(call, format!("re-attach negotiation failed: {e}"));
                return;
            }
        };

        let task = tokio::spawn(self.clone().send_attach(call.clone(), answer.sdp));
        call.track(task.abort_handle());
    }

    async fn send_attach(self: Arc<Self>, call: Arc<Call>, fallback_sdp: String) {
        call.media
            .wait_for_gathering(self.config.gathering_idle, self.config.gathering_max)
            .await;
        let sdp = self.gathered_sdp(&call, fallback_sdp).await;
        if !self.calls.is_current(&call) {
            return;
        }
        let Some(session_id) = self.session_id() else {
            return;
        };
        let guard = match call.begin_request(SocketMethod::Attach) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(target: "Call", "[{}] {e}", call.id);
                return;
            }
        };

        let snapshot = call.snapshot();
        let payload = RequestPayload::Attach(CallParams {
            sessid: session_id,
            sdp: sdp.clone(),
            user_agent: Some(self.config.user_agent.clone()),
            dialog_params: CallDialogParams {
                attach: true,
                destination_number: snapshot.destination,
                remote_caller_id_name: snapshot.remote_name,
                client_state: snapshot.client_state,
                ..CallDialogParams::audio_only(call.id)
            },
        });
        call.with_info(|info| info.local_sdp = Some(sdp));
        self.dispatch_call_request(&call, guard, payload).await;

        if self.advance(&call, CallTransition::Recovered).is_some() {
            info!(target: "Call", "[{}] Call recovered after reconnect", call.id);
        }
        self.finish_recovery_if_done();
    }
}
