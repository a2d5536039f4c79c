use std::sync::{Arc, Weak};
use txcore::types::call::{CallId, CallPhase, CustomHeader};

use super::state::CallInfo;
use crate::client::{Client, ClientError};

/// Cheap reference to a call by id. Every operation looks the call up again,
/// so a handle to an ended call simply finds nothing.
#[derive(Clone, Debug)]
pub struct CallHandle {
    client: Weak<Client>,
    call_id: CallId,
}

impl CallHandle {
    pub(crate) fn new(client: &Arc<Client>, call_id: CallId) -> Self {
        Self {
            client: Arc::downgrade(client),
            call_id,
        }
    }

    pub fn id(&self) -> CallId {
        self.call_id
    }

    fn client(&self) -> Result<Arc<Client>, ClientError> {
        self.client.upgrade().ok_or(ClientError::Shutdown)
    }

    /// Copy of the call record, `None` once the call has ended.
    pub fn snapshot(&self) -> Option<CallInfo> {
        self.client.upgrade()?.call(self.call_id)
    }

    pub fn phase(&self) -> Option<CallPhase> {
        self.snapshot().map(|info| info.phase)
    }

    pub fn accept(
        &self,
        destination_number: &str,
        custom_headers: Vec<CustomHeader>,
    ) -> Result<(), ClientError> {
        self.client()?
            .accept_call(self.call_id, destination_number, custom_headers)
            .map(|_| ())
    }

    pub fn end(&self) -> Result<(), ClientError> {
        self.client()?.end_call(self.call_id)
    }

    pub async fn hold_unhold(&self) -> Result<CallPhase, ClientError> {
        self.client()?.hold_unhold(self.call_id).await
    }

    pub fn mute_unmute(&self) -> Result<bool, ClientError> {
        self.client()?.mute_unmute(self.call_id)
    }

    pub fn toggle_speaker(&self) -> Result<bool, ClientError> {
        self.client()?.toggle_speaker(self.call_id)
    }

    pub fn dtmf(&self, digits: &str) -> Result<(), ClientError> {
        self.client()?.dtmf(self.call_id, digits)
    }
}
