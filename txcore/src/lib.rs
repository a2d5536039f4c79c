//! Runtime-agnostic core of the telnyx-rtc client.
//!
//! Everything in here is pure: wire envelopes and their parsing, the call and
//! registration models, the event surface, ping-health scoring and ICE
//! candidate bookkeeping. Sockets, timers and tasks live in the root crate.

pub mod health;
pub mod ice;
pub mod protocol;
pub mod types;

pub use protocol::{InboundMessage, OutboundRequest, ProtocolError, SocketMethod};
pub use types::call::{CallId, CallPhase, TerminationReason};
pub use types::events::{CoreEventBus, Event, EventHandler};
