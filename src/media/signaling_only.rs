//! A media engine that only produces SDP text.
//!
//! Useful to exercise signaling against a live server (the demo binary uses
//! it) when no real audio stack is wired in. It never gathers candidates and
//! never reports connectivity.

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use txcore::ice::PendingIceCandidate;
use txcore::types::call::CallId;

use super::engine::{
    MediaEngine, MediaEngineFactory, MediaError, MediaEvent, SdpType, SessionDescription,
};
use crate::connection::lock;

struct SignalingOnlyEngine {
    call_id: CallId,
    session_id: u64,
    version: Mutex<u64>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    // Keeps the event channel open for the lifetime of the engine.
    _events: mpsc::Sender<MediaEvent>,
}

impl SignalingOnlyEngine {
    fn describe(&self, kind: SdpType) -> SessionDescription {
        let mut version = lock(&self.version);
        *version += 1;
        let direction = match kind {
            SdpType::Offer => "sendrecv",
            SdpType::Answer => "recvonly",
        };
        let sdp = format!(
            "v=0\r\n\
             o=- {session} {version} IN IP4 0.0.0.0\r\n\
             s=-\r\n\
             t=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 0 8\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:0 PCMU/8000\r\n\
             a=rtpmap:8 PCMA/8000\r\n\
             a={direction}\r\n",
            session = self.session_id,
            version = *version,
        );
        SessionDescription { kind, sdp }
    }
}

#[async_trait]
impl MediaEngine for SignalingOnlyEngine {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MediaError> {
        debug!(target: "Media", "[{}] static offer (ice_restart={ice_restart})", self.call_id);
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        if lock(&self.remote).is_none() {
            return Err(MediaError::CreateAnswer("no remote offer".into()));
        }
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), MediaError> {
        *lock(&self.local) = Some(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError> {
        if !description.sdp.starts_with("v=") {
            return Err(MediaError::SetRemote("not an SDP body".into()));
        }
        *lock(&self.remote) = Some(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &PendingIceCandidate) -> Result<(), MediaError> {
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    async fn close(&self) {
        lock(&self.remote).take();
    }
}

#[derive(Default)]
pub struct SignalingOnlyEngineFactory;

impl SignalingOnlyEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngineFactory for SignalingOnlyEngineFactory {
    async fn create_engine(
        &self,
        call_id: CallId,
        _ice_servers: &[String],
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::Receiver<MediaEvent>), MediaError> {
        let (tx, rx) = mpsc::channel(1);
        let engine = SignalingOnlyEngine {
            call_id,
            session_id: rand::rng().random_range(1_000_000..u64::from(u32::MAX)),
            version: Mutex::new(0),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            _events: tx,
        };
        Ok((Arc::new(engine), rx))
    }
}
