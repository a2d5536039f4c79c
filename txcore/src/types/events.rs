use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

use crate::health::ConnectionMetrics;
use crate::protocol::ServerErrorCode;
use crate::types::call::{CallId, CallPhase, CustomHeader, TerminationReason};
use crate::types::gateway::GatewayState;

/// Everything the client reports to the host application.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Connected,
    ConnectionError { reason: String },
    Disconnected,
    LoggedIn { session_id: String },
    GatewayStateChanged { state: GatewayState },
    /// First REGISTERED push of a session.
    ClientReady { session_id: String },
    RegistrationTimeout,
    RegistrationFailed { state: GatewayState },
    ServerError { code: ServerErrorCode, message: String },
    Reconnecting,
    ReconnectionTimeout,
    ConnectionQualityChanged(ConnectionMetrics),
    DisablePushResult { success: bool, message: String },

    IncomingCall(IncomingCall),
    CallRinging(CallRinging),
    CallEarlyMedia { call_id: CallId },
    CallAnswered { call_id: CallId },
    CallStateChanged { call_id: CallId, phase: CallPhase },
    CallEnded {
        call_id: CallId,
        reason: Option<TerminationReason>,
    },
    /// Something went wrong but the call is still usable.
    CallWarning { call_id: CallId, message: String },
    CallError { call_id: CallId, message: String },
    /// A call-scoped frame arrived for a call we do not know.
    UnroutableCallMessage { call_id: CallId, kind: &'static str },
    /// Audio routing flags toggled locally.
    CallMuteChanged { call_id: CallId, muted: bool },
    CallSpeakerChanged { call_id: CallId, enabled: bool },
    DtmfSent { call_id: CallId, digits: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub caller_name: Option<String>,
    pub caller_number: Option<String>,
    pub telnyx_session_id: Option<String>,
    pub telnyx_leg_id: Option<String>,
    pub custom_headers: Vec<CustomHeader>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRinging {
    pub call_id: CallId,
    pub caller_name: Option<String>,
    pub caller_number: Option<String>,
    pub custom_headers: Vec<CustomHeader>,
}

impl Event {
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::IncomingCall(e) => Some(e.call_id),
            Self::CallRinging(e) => Some(e.call_id),
            Self::CallEarlyMedia { call_id }
            | Self::CallAnswered { call_id }
            | Self::CallStateChanged { call_id, .. }
            | Self::CallEnded { call_id, .. }
            | Self::CallWarning { call_id, .. }
            | Self::CallError { call_id, .. }
            | Self::UnroutableCallMessage { call_id, .. }
            | Self::CallMuteChanged { call_id, .. }
            | Self::CallSpeakerChanged { call_id, .. }
            | Self::DtmfSent { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            handler.handle_event(event);
        }
    }
}
