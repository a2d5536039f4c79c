//! Media negotiation.
//!
//! The audio path itself belongs to an external engine reached through the
//! [`MediaEngine`] trait. [`MediaNegotiator`] sequences offer/answer and ICE
//! on top of it for one call.

mod engine;
mod negotiation;
mod signaling_only;

pub use engine::{
    IceConnectionState, MediaEngine, MediaEngineFactory, MediaError, MediaEvent, SdpType,
    SessionDescription,
};
pub(crate) use negotiation::MediaNegotiator;
pub use signaling_only::SignalingOnlyEngineFactory;
