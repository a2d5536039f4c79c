use serde::Serialize;
use std::fmt;

/// Registration state of the SIP gateway behind the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatewayState {
    Unregistered,
    Trying,
    RegisterSent,
    Registered,
    Unregistering,
    Failed,
    FailWait,
    Expired,
    NoRegistrar,
    Down,
    Unknown(String),
}

impl GatewayState {
    pub fn from_wire(state: &str) -> Self {
        match state {
            "UNREGED" => Self::Unregistered,
            "TRYING" => Self::Trying,
            "REGISTER" => Self::RegisterSent,
            "REGED" => Self::Registered,
            "UNREGISTER" => Self::Unregistering,
            "FAILED" => Self::Failed,
            "FAIL_WAIT" => Self::FailWait,
            "EXPIRED" => Self::Expired,
            "NOREG" => Self::NoRegistrar,
            "DOWN" => Self::Down,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Unregistered => "UNREGED",
            Self::Trying => "TRYING",
            Self::RegisterSent => "REGISTER",
            Self::Registered => "REGED",
            Self::Unregistering => "UNREGISTER",
            Self::Failed => "FAILED",
            Self::FailWait => "FAIL_WAIT",
            Self::Expired => "EXPIRED",
            Self::NoRegistrar => "NOREG",
            Self::Down => "DOWN",
            Self::Unknown(s) => s,
        }
    }

    /// States that are part of a normal registration in progress.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unregistered | Self::Trying | Self::RegisterSent | Self::Unregistering
        )
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}
