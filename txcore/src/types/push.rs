use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;
use crate::types::call::CallId;

/// Payload of an incoming-call push, as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMetaData {
    pub caller_name: String,
    pub caller_number: String,
    pub call_id: CallId,
    #[serde(default)]
    pub voice_sdk_id: Option<String>,
    /// Relay hint: address of the media server holding the call.
    #[serde(default)]
    pub rtc_ip: Option<String>,
    #[serde(default)]
    pub rtc_port: Option<u16>,
}

impl PushMetaData {
    pub fn from_json(blob: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(blob)?)
    }
}
