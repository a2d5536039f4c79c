use log::{debug, warn};
use std::sync::Arc;
use txcore::protocol::{InboundMessage, InviteMessage};
use txcore::types::call::CallId;
use txcore::types::events::Event;

use crate::calls::{CallInfo, CallInput, CallSignal};
use crate::client::Client;

impl Client {
    pub(crate) async fn route_message(self: &Arc<Self>, message: InboundMessage) {
        let awaited = self.resolve_waiter(&message).await;

        match message {
            InboundMessage::Ping { id, params } => self.handle_ping(&id, &params),
            InboundMessage::LoginResult { session_id, .. } => {
                self.handle_login_result(session_id)
            }
            InboundMessage::GatewayState { state, .. } => self.handle_gateway_state(state),
            InboundMessage::ClientReady => self.handle_client_ready(),
            InboundMessage::RequestResult { id, .. } => {
                if !awaited {
                    debug!(target: "Client/Recv", "Result for untracked request {id}");
                }
            }
            InboundMessage::RequestError { id, error } => {
                if !awaited {
                    self.handle_server_error(id, error);
                }
            }
            InboundMessage::Invite(invite) => self.handle_incoming_invite(invite),
            InboundMessage::Attach(offer) => {
                self.route_to_call(offer.call_id, CallSignal::Attach(offer))
            }
            InboundMessage::Answer(answer) => {
                self.route_to_call(answer.call_id, CallSignal::Answer(answer))
            }
            InboundMessage::Media(media) => {
                self.route_to_call(media.call_id, CallSignal::Media(media))
            }
            InboundMessage::Ringing(ringing) => {
                self.route_to_call(ringing.call_id, CallSignal::Ringing(ringing))
            }
            InboundMessage::Bye(bye) => self.route_to_call(bye.call_id, CallSignal::Bye(bye)),
            InboundMessage::ModifyResult {
                call_id,
                action,
                sdp,
                ..
            } => self.route_to_call(call_id, CallSignal::ModifyResult { action, sdp }),
            InboundMessage::Unknown { method } => {
                debug!(target: "Client/Recv", "Ignoring unsupported method {method}");
            }
        }
    }

    fn handle_incoming_invite(self: &Arc<Self>, invite: InviteMessage) {
        let call_id = invite.call_id;
        if self.calls.contains(&call_id) {
            warn!(target: "Client/Recv", "Duplicate invite for {call_id}, ignoring");
            return;
        }
        debug!(target: "Client/Recv", "Setting up incoming call {call_id}");

        let mut info = CallInfo::new_incoming(call_id, invite.sdp.clone());
        info.remote_name = invite.caller_id_name.clone();
        info.remote_number = invite.caller_id_number.clone();
        info.telnyx_session_id = invite.telnyx_session_id.clone();
        info.telnyx_leg_id = invite.telnyx_leg_id.clone();
        info.custom_headers = invite.dialog_params.custom_headers.clone();

        match self.create_incoming_call(info) {
            Ok(call) => call.enqueue(CallInput::Signal(CallSignal::Invite(invite))),
            Err(e) => warn!(target: "Client/Recv", "Could not set up incoming call {call_id}: {e}"),
        }
    }

    /// Queues `signal` on the worker of `call_id`. Frames for calls we do not
    /// know are dropped and reported.
    fn route_to_call(&self, call_id: CallId, signal: CallSignal) {
        match self.calls.get(&call_id) {
            Some(call) => call.enqueue(CallInput::Signal(signal)),
            None => {
                let kind = signal.kind();
                warn!(target: "Client/Recv", "Dropping {kind} for unknown call {call_id}");
                self.core_events
                    .dispatch(&Event::UnroutableCallMessage { call_id, kind });
            }
        }
    }
}
