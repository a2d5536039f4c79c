//! Classification of server frames into [`InboundMessage`].
//!
//! Every frame is parsed exactly once here; the rest of the client only ever
//! matches on the resulting enum.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{ProtocolError, ServerError, ServerErrorCode};
use super::method::SocketMethod;
use super::outbound::ModifyAction;
use crate::types::call::{CallId, CustomHeader};
use crate::types::gateway::GatewayState;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundDialogParams {
    #[serde(default)]
    pub custom_headers: Vec<CustomHeader>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InviteMessage {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    pub sdp: String,
    #[serde(default)]
    pub caller_id_name: Option<String>,
    #[serde(default)]
    pub caller_id_number: Option<String>,
    #[serde(default)]
    pub telnyx_session_id: Option<String>,
    #[serde(default)]
    pub telnyx_leg_id: Option<String>,
    #[serde(rename = "dialogParams", default)]
    pub dialog_params: InboundDialogParams,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnswerMessage {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(rename = "dialogParams", default)]
    pub dialog_params: InboundDialogParams,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaMessage {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub sdp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RingingMessage {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub caller_id_name: Option<String>,
    #[serde(default)]
    pub caller_id_number: Option<String>,
    #[serde(default)]
    pub telnyx_session_id: Option<String>,
    #[serde(default)]
    pub telnyx_leg_id: Option<String>,
    #[serde(rename = "dialogParams", default)]
    pub dialog_params: InboundDialogParams,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ByeMessage {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(rename = "causeCode", default)]
    pub cause_code: Option<i32>,
    #[serde(rename = "sipCode", default)]
    pub sip_code: Option<i32>,
    #[serde(rename = "sipReason", default)]
    pub sip_reason: Option<String>,
}

/// Every kind of frame the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    LoginResult {
        id: String,
        session_id: String,
        message: String,
    },
    GatewayState {
        id: Option<String>,
        session_id: Option<String>,
        state: GatewayState,
    },
    /// Acknowledgement of a modify; carries the new remote SDP for `updateMedia`.
    ModifyResult {
        id: Option<String>,
        call_id: CallId,
        action: ModifyAction,
        sdp: Option<String>,
    },
    RequestResult {
        id: String,
        result: Value,
    },
    RequestError {
        id: Option<String>,
        error: ServerError,
    },
    ClientReady,
    /// `id` is kept raw so the pong can echo it verbatim.
    Ping {
        id: Value,
        params: Value,
    },
    Invite(InviteMessage),
    Attach(InviteMessage),
    Answer(AnswerMessage),
    Media(MediaMessage),
    Ringing(RingingMessage),
    Bye(ByeMessage),
    Unknown {
        method: String,
    },
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound = serde_json::from_str(text)?;

        if let Some(error) = raw.error {
            return Ok(Self::RequestError {
                id: raw.id.as_ref().and_then(id_string),
                error: ServerError {
                    code: ServerErrorCode::from_code(error.code),
                    message: error.message,
                },
            });
        }

        if let Some(result) = raw.result {
            return classify_result(raw.id.as_ref().and_then(id_string), result);
        }

        match raw.method {
            Some(method) => classify_method(
                raw.id.unwrap_or(Value::Null),
                method,
                raw.params.unwrap_or(Value::Null),
            ),
            None => Err(ProtocolError::Unrecognized),
        }
    }

    /// The call this message must be routed to, if it is call-scoped.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::ModifyResult { call_id, .. } => Some(*call_id),
            Self::Invite(m) | Self::Attach(m) => Some(m.call_id),
            Self::Answer(m) => Some(m.call_id),
            Self::Media(m) => Some(m.call_id),
            Self::Ringing(m) => Some(m.call_id),
            Self::Bye(m) => Some(m.call_id),
            Self::LoginResult { .. }
            | Self::GatewayState { .. }
            | Self::RequestResult { .. }
            | Self::RequestError { .. }
            | Self::ClientReady
            | Self::Ping { .. }
            | Self::Unknown { .. } => None,
        }
    }

    /// Correlation id of a response frame.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            Self::LoginResult { id, .. } | Self::RequestResult { id, .. } => Some(id),
            Self::GatewayState { id, .. }
            | Self::ModifyResult { id, .. }
            | Self::RequestError { id, .. } => id.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoginResult { .. } => "login-result",
            Self::GatewayState { .. } => "gateway-state",
            Self::ModifyResult { .. } => "modify-result",
            Self::RequestResult { .. } => "result",
            Self::RequestError { .. } => "error",
            Self::ClientReady => SocketMethod::ClientReady.as_str(),
            Self::Ping { .. } => SocketMethod::Ping.as_str(),
            Self::Invite(_) => SocketMethod::Invite.as_str(),
            Self::Attach(_) => SocketMethod::Attach.as_str(),
            Self::Answer(_) => SocketMethod::Answer.as_str(),
            Self::Media(_) => SocketMethod::Media.as_str(),
            Self::Ringing(_) => SocketMethod::Ringing.as_str(),
            Self::Bye(_) => SocketMethod::Bye.as_str(),
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawError {
    code: i64,
    #[serde(default)]
    message: String,
}

const LOGGED_IN: &str = "logged in";

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn classify_result(id: Option<String>, result: Value) -> Result<InboundMessage, ProtocolError> {
    if let Some(state) = result.get("params").and_then(|p| str_field(p, "state")) {
        return Ok(InboundMessage::GatewayState {
            id,
            session_id: str_field(&result, "sessid").map(str::to_string),
            state: GatewayState::from_wire(state),
        });
    }

    if let Some(action) = str_field(&result, "action").and_then(ModifyAction::from_wire)
        && let Some(call_id) = str_field(&result, "callID").and_then(|c| c.parse().ok())
    {
        return Ok(InboundMessage::ModifyResult {
            id,
            call_id,
            action,
            sdp: str_field(&result, "sdp").map(str::to_string),
        });
    }

    let id = id.ok_or(ProtocolError::MissingField("id"))?;
    if let (Some(message @ LOGGED_IN), Some(session_id)) =
        (str_field(&result, "message"), str_field(&result, "sessid"))
    {
        return Ok(InboundMessage::LoginResult {
            id,
            session_id: session_id.to_string(),
            message: message.to_string(),
        });
    }

    Ok(InboundMessage::RequestResult { id, result })
}

fn parse_params<T: DeserializeOwned>(
    method: SocketMethod,
    params: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|source| ProtocolError::InvalidParams {
        method: method.as_str(),
        source,
    })
}

fn classify_method(
    id: Value,
    method: String,
    params: Value,
) -> Result<InboundMessage, ProtocolError> {
    if let Some(state) = str_field(&params, "state") {
        return Ok(InboundMessage::GatewayState {
            id: id_string(&id),
            session_id: str_field(&params, "sessid").map(str::to_string),
            state: GatewayState::from_wire(state),
        });
    }

    let Some(socket_method) = SocketMethod::from_wire(&method) else {
        return Ok(InboundMessage::Unknown { method });
    };

    let message = match socket_method {
        SocketMethod::Invite => InboundMessage::Invite(parse_params(socket_method, params)?),
        SocketMethod::Attach => InboundMessage::Attach(parse_params(socket_method, params)?),
        SocketMethod::Answer => InboundMessage::Answer(parse_params(socket_method, params)?),
        SocketMethod::Media => InboundMessage::Media(parse_params(socket_method, params)?),
        SocketMethod::Ringing => InboundMessage::Ringing(parse_params(socket_method, params)?),
        SocketMethod::Bye => InboundMessage::Bye(parse_params(socket_method, params)?),
        SocketMethod::Ping => InboundMessage::Ping { id, params },
        SocketMethod::ClientReady => InboundMessage::ClientReady,
        SocketMethod::Login
        | SocketMethod::AnonymousLogin
        | SocketMethod::Modify
        | SocketMethod::Info
        | SocketMethod::GatewayState
        | SocketMethod::DisablePush
        | SocketMethod::AttachCalls => InboundMessage::Unknown { method },
    };
    Ok(message)
}
