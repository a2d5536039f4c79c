use serde::{Deserialize, Serialize};
use std::fmt;

/// Every method name the client sends or understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketMethod {
    Login,
    AnonymousLogin,
    Invite,
    Answer,
    Attach,
    Bye,
    Modify,
    Media,
    Info,
    Ringing,
    Ping,
    ClientReady,
    GatewayState,
    DisablePush,
    AttachCalls,
}

impl SocketMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::AnonymousLogin => "anonymous_login",
            Self::Invite => "telnyx_rtc.invite",
            Self::Answer => "telnyx_rtc.answer",
            Self::Attach => "telnyx_rtc.attach",
            Self::Bye => "telnyx_rtc.bye",
            Self::Modify => "telnyx_rtc.modify",
            Self::Media => "telnyx_rtc.media",
            Self::Info => "telnyx_rtc.info",
            Self::Ringing => "telnyx_rtc.ringing",
            Self::Ping => "telnyx_rtc.ping",
            Self::ClientReady => "telnyx_rtc.clientReady",
            Self::GatewayState => "telnyx_rtc.gatewayState",
            Self::DisablePush => "telnyx_rtc.disable_push_notification",
            Self::AttachCalls => "telnyx_rtc.attachCalls",
        }
    }

    pub fn from_wire(method: &str) -> Option<Self> {
        let method = match method {
            "login" => Self::Login,
            "anonymous_login" => Self::AnonymousLogin,
            "telnyx_rtc.invite" => Self::Invite,
            "telnyx_rtc.answer" => Self::Answer,
            "telnyx_rtc.attach" => Self::Attach,
            "telnyx_rtc.bye" => Self::Bye,
            "telnyx_rtc.modify" => Self::Modify,
            "telnyx_rtc.media" => Self::Media,
            "telnyx_rtc.info" => Self::Info,
            "telnyx_rtc.ringing" => Self::Ringing,
            "telnyx_rtc.ping" => Self::Ping,
            "telnyx_rtc.clientReady" => Self::ClientReady,
            "telnyx_rtc.gatewayState" => Self::GatewayState,
            "telnyx_rtc.disable_push_notification" => Self::DisablePush,
            "telnyx_rtc.attachCalls" => Self::AttachCalls,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for SocketMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
