use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a call, shared by both legs and carried as `callID` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Why a call left the normal flow because of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkChangeReason {
    /// The signaling socket dropped and is being re-established.
    NetworkSwitch,
    /// Recovery did not complete in time.
    NetworkLost,
}

/// Details carried by a bye, or synthesized locally when we hang up.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminationReason {
    pub cause: Option<String>,
    pub cause_code: Option<i32>,
    pub sip_code: Option<i32>,
    pub sip_reason: Option<String>,
}

impl TerminationReason {
    pub fn local(cause: CauseCode) -> Self {
        Self {
            cause: Some(cause.as_str().to_string()),
            cause_code: Some(cause.code()),
            sip_code: None,
            sip_reason: None,
        }
    }

    /// Recovery window elapsed before the call could be re-attached.
    pub fn network_lost() -> Self {
        Self {
            cause: Some("NETWORK_LOST".to_string()),
            ..Self::default()
        }
    }
}

/// Q.850-style cause sent with a bye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CauseCode {
    NormalClearing,
    UserBusy,
    OriginatorCancel,
    InvalidGateway,
}

impl CauseCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::NormalClearing => 16,
            Self::UserBusy => 17,
            Self::OriginatorCancel => 487,
            Self::InvalidGateway => 608,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalClearing => "NORMAL_CLEARING",
            Self::UserBusy => "USER_BUSY",
            Self::OriginatorCancel => "ORIGINATOR_CANCEL",
            Self::InvalidGateway => "INVALID_GATEWAY",
        }
    }
}

/// Lifecycle position of a call.
///
/// `New` and `Connecting` are initial, `Done` and `Error` are terminal. Moves
/// between phases only happen through `CallInfo::apply_transition` in the
/// client crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CallPhase {
    New,
    Connecting,
    Ringing,
    Active,
    Held,
    Renegotiating,
    Reconnecting(NetworkChangeReason),
    Dropped(NetworkChangeReason),
    Done(Option<TerminationReason>),
    Error,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error)
    }

    /// Media is (or was, before a network hiccup) flowing.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Active | Self::Held | Self::Renegotiating)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Connecting => "CONNECTING",
            Self::Ringing => "RINGING",
            Self::Active => "ACTIVE",
            Self::Held => "HELD",
            Self::Renegotiating => "RENEGOTIATING",
            Self::Reconnecting(_) => "RECONNECTING",
            Self::Dropped(_) => "DROPPED",
            Self::Done(_) => "DONE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A SIP header forwarded through `dialogParams.custom_headers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeader {
    pub name: String,
    pub value: String,
}

impl CustomHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
