//! ICE candidate bookkeeping for one call.

use serde::Serialize;
use std::collections::VecDeque;

use crate::types::call::CallId;

/// A candidate waiting for the remote description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingIceCandidate {
    pub call_id: CallId,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: u32,
    pub candidate: String,
    /// STUN/TURN url that produced the candidate, when the engine knows it.
    pub server_url: Option<String>,
}

impl PendingIceCandidate {
    /// The `typ` token of the candidate line (`host`, `srflx`, `relay`, ...).
    pub fn candidate_type(&self) -> Option<&str> {
        let mut tokens = self.candidate.split_whitespace();
        tokens.find(|t| *t == "typ")?;
        tokens.next()
    }

    /// True when the candidate was obtained through one of `servers`.
    pub fn is_server_derived(&self, servers: &[String]) -> bool {
        match &self.server_url {
            Some(url) => servers.iter().any(|s| same_server(s, url)),
            None => matches!(self.candidate_type(), Some("srflx" | "relay")),
        }
    }
}

fn same_server(configured: &str, reported: &str) -> bool {
    let strip = |u: &str| u.split('?').next().unwrap_or(u).trim_end_matches('/').to_string();
    strip(configured) == strip(reported)
}

/// FIFO of candidates held back until the remote description is applied.
#[derive(Debug, Default)]
pub struct IceCandidateQueue {
    pending: VecDeque<PendingIceCandidate>,
    remote_applied: bool,
}

impl IceCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `candidate` if the remote description is not set yet, otherwise
    /// hands it back for immediate application.
    pub fn offer(&mut self, candidate: PendingIceCandidate) -> Option<PendingIceCandidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Marks the remote description as applied and drains the backlog in
    /// arrival order.
    pub fn remote_applied(&mut self) -> Vec<PendingIceCandidate> {
        self.remote_applied = true;
        self.pending.drain(..).collect()
    }

    /// A new remote description is expected (ICE restart, re-attach).
    pub fn await_remote(&mut self) {
        self.remote_applied = false;
    }

    pub fn is_remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
