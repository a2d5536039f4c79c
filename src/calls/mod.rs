//! Call state machine, registry and call control.
//!
//! # Architecture
//!
//! - [`CallInfo`] & [`CallTransition`]: the phase machine of one call. Phases
//!   only move through [`CallInfo::apply_transition`].
//! - `Call`: live state of one call (record, media negotiator, inbox, the
//!   single in-flight request slot, tasks tied to its lifetime).
//! - `CallRegistry`: owned by the [`crate::Client`]; the only place that
//!   decides whether a call still exists.
//! - Worker: one task per call draining routed server frames and media
//!   events in arrival order. Frames of different calls are independent.
//! - [`CallHandle`]: what the host keeps. It holds an id, never the call.
//!
//! # Lifetime
//!
//! Ending a call marks it ended, evicts it and aborts its tasks before the
//! call returns. Work that was suspended on the media engine finds the call
//! gone when it resumes and drops its result.

mod call;
mod control;
mod error;
mod handle;
mod handler;
mod registry;
mod state;

#[cfg(test)]
mod scenario_tests;

pub(crate) use call::{CallInput, CallSignal};
pub use control::InviteOptions;
pub use error::CallError;
pub use handle::CallHandle;
pub(crate) use registry::CallRegistry;
pub use state::{CallInfo, CallTransition, InvalidTransition};

/// Point-in-time copy of a call, as returned by `Client::call`.
pub type CallSnapshot = CallInfo;
