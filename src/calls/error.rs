//! Call-related error types.

use thiserror::Error;
use txcore::protocol::SocketMethod;
use txcore::types::call::{CallId, CallPhase};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call already exists: {0}")]
    AlreadyExists(CallId),

    #[error("cannot {action} call {call_id} while {phase}")]
    WrongPhase {
        call_id: CallId,
        phase: CallPhase,
        action: &'static str,
    },

    #[error("call {call_id} already has a {pending} request in flight")]
    BusyLocally {
        call_id: CallId,
        pending: SocketMethod,
    },

    #[error("no current call")]
    NoCurrentCall,

    #[error("invalid DTMF digits: {0:?}")]
    InvalidDtmf(String),

    #[error("not logged in")]
    NotLoggedIn,
}
