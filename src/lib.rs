// Core protocol types are re-exported so hosts only need this crate.
pub use txcore::{health, ice, protocol};

pub mod types {
    pub use txcore::types::*;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod keepalive;
pub mod media;
pub mod push;
pub mod reconnect;
pub mod request;
pub mod session;
pub mod transport;

pub use calls::{CallError, CallHandle, CallInfo, InviteOptions};
pub use client::{Client, ClientError};
pub use config::{ClientConfig, Credentials, LogLevel, PushCredentials, SessionConfig};
pub use push::{PushAction, PushBootstrap, PushError, PushOutcome};
pub use txcore::types::call::{CallId, CallPhase, CustomHeader, TerminationReason};
pub use txcore::types::events::{Event, EventHandler};

#[cfg(test)]
pub mod test_utils;
