use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use txcore::ice::PendingIceCandidate;
use txcore::types::call::CallId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

/// Callbacks of the media engine, delivered per call.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    IceCandidate(PendingIceCandidate),
    IceConnectionState(IceConnectionState),
}

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("failed to create offer: {0}")]
    CreateOffer(String),
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),
    #[error("failed to set local description: {0}")]
    SetLocal(String),
    #[error("failed to set remote description: {0}")]
    SetRemote(String),
    #[error("failed to add ICE candidate: {0}")]
    AddCandidate(String),
    #[error("media engine unavailable: {0}")]
    Unavailable(String),
}

/// One peer connection of the external media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, description: &SessionDescription)
    -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: &PendingIceCandidate) -> Result<(), MediaError>;
    /// Current local description, including candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn close(&self);
}

#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create_engine(
        &self,
        call_id: CallId,
        ice_servers: &[String],
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::Receiver<MediaEvent>), MediaError>;
}
