//! Requests sent by the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{JSON_RPC_VERSION, ProtocolError, SocketMethod};
use crate::types::call::{CallId, CustomHeader};

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserVariables {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub push_device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub push_notification_provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub passwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub login_token: Option<String>,
    #[serde(rename = "userVariables", skip_serializing_if = "Option::is_none", default)]
    pub user_variables: Option<UserVariables>,
    #[serde(rename = "loginParams", skip_serializing_if = "Option::is_none", default)]
    pub login_params: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sessid: Option<String>,
    #[serde(rename = "User-Agent", skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDialogParams {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(skip_serializing_if = "is_false", default)]
    pub attach: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caller_id_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caller_id_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remote_caller_id_name: Option<String>,
    #[serde(rename = "clientState", skip_serializing_if = "Option::is_none", default)]
    pub client_state: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub custom_headers: Vec<CustomHeader>,
}

impl CallDialogParams {
    pub fn audio_only(call_id: CallId) -> Self {
        Self {
            call_id,
            audio: true,
            video: false,
            attach: false,
            caller_id_name: None,
            caller_id_number: None,
            destination_number: None,
            remote_caller_id_name: None,
            client_state: None,
            custom_headers: Vec::new(),
        }
    }
}

/// Params shared by invite, answer and attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub sessid: String,
    pub sdp: String,
    #[serde(rename = "User-Agent", skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
    #[serde(rename = "dialogParams")]
    pub dialog_params: CallDialogParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogRef {
    #[serde(rename = "callID")]
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByeParams {
    pub sessid: String,
    #[serde(rename = "causeCode")]
    pub cause_code: i32,
    pub cause: String,
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModifyAction {
    Hold,
    Unhold,
    UpdateMedia,
}

impl ModifyAction {
    pub fn from_wire(action: &str) -> Option<Self> {
        match action {
            "hold" => Some(Self::Hold),
            "unhold" => Some(Self::Unhold),
            "updateMedia" => Some(Self::UpdateMedia),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyParams {
    pub sessid: String,
    pub action: ModifyAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sdp: Option<String>,
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoParams {
    pub sessid: String,
    pub dtmf: String,
    #[serde(rename = "dialogParams")]
    pub dialog_params: DialogRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<String>,
}

/// The server expects the push identity under `User-Agent` here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisablePushParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub login_token: Option<String>,
    #[serde(rename = "User-Agent")]
    pub user_agent: UserVariables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachUserVariables {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub push_notification_environment: Option<String>,
    pub push_notification_provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachCallParams {
    #[serde(rename = "userVariables")]
    pub user_variables: AttachUserVariables,
}

/// Typed params of every request the client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Login(LoginParams),
    Invite(CallParams),
    Answer(CallParams),
    Attach(CallParams),
    Bye(ByeParams),
    Modify(ModifyParams),
    Info(InfoParams),
    GatewayState(StateParams),
    DisablePush(DisablePushParams),
    AttachCalls(AttachCallParams),
}

impl RequestPayload {
    pub fn method(&self) -> SocketMethod {
        match self {
            Self::Login(_) => SocketMethod::Login,
            Self::Invite(_) => SocketMethod::Invite,
            Self::Answer(_) => SocketMethod::Answer,
            Self::Attach(_) => SocketMethod::Attach,
            Self::Bye(_) => SocketMethod::Bye,
            Self::Modify(_) => SocketMethod::Modify,
            Self::Info(_) => SocketMethod::Info,
            Self::GatewayState(_) => SocketMethod::GatewayState,
            Self::DisablePush(_) => SocketMethod::DisablePush,
            Self::AttachCalls(_) => SocketMethod::AttachCalls,
        }
    }

    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::Invite(p) | Self::Answer(p) | Self::Attach(p) => Some(p.dialog_params.call_id),
            Self::Bye(p) => Some(p.dialog_params.call_id),
            Self::Modify(p) => Some(p.dialog_params.call_id),
            Self::Info(p) => Some(p.dialog_params.call_id),
            Self::Login(_) | Self::GatewayState(_) | Self::DisablePush(_) | Self::AttachCalls(_) => {
                None
            }
        }
    }

    fn params(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Login(p) => serde_json::to_value(p),
            Self::Invite(p) | Self::Answer(p) | Self::Attach(p) => serde_json::to_value(p),
            Self::Bye(p) => serde_json::to_value(p),
            Self::Modify(p) => serde_json::to_value(p),
            Self::Info(p) => serde_json::to_value(p),
            Self::GatewayState(p) => serde_json::to_value(p),
            Self::DisablePush(p) => serde_json::to_value(p),
            Self::AttachCalls(p) => serde_json::to_value(p),
        }
    }
}

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: String,
    pub payload: RequestPayload,
}

impl OutboundRequest {
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
        }
    }

    pub fn method(&self) -> SocketMethod {
        self.payload.method()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.payload.call_id()
    }

    pub fn to_envelope(&self) -> Result<RequestEnvelope, ProtocolError> {
        Ok(RequestEnvelope {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: self.id.clone(),
            method: self.method().as_str().to_string(),
            params: self.payload.params()?,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_envelope()?)?)
    }
}

/// `{jsonrpc, id, method, params}` as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestEnvelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn socket_method(&self) -> Option<SocketMethod> {
        SocketMethod::from_wire(&self.method)
    }

    /// `params.dialogParams.callID`, when the request is call-scoped.
    pub fn call_id(&self) -> Option<CallId> {
        self.params
            .get("dialogParams")?
            .get("callID")?
            .as_str()?
            .parse()
            .ok()
    }
}

/// Answer to a server ping; the params come back untouched.
pub fn pong(id: &Value, params: &Value) -> Result<String, ProtocolError> {
    let envelope = serde_json::json!({
        "jsonrpc": JSON_RPC_VERSION,
        "id": id,
        "result": {
            "method": SocketMethod::Ping.as_str(),
            "params": params,
        },
    });
    Ok(serde_json::to_string(&envelope)?)
}
