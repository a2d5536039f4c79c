//! Call phase machine and the per-call record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use txcore::types::call::{
    CallDirection, CallId, CallPhase, CustomHeader, NetworkChangeReason, TerminationReason,
};

/// Inputs of the phase machine.
#[derive(Debug, Clone)]
pub enum CallTransition {
    InviteSent,
    RingingReceived,
    AnswerReceived,
    /// Answer without SDP after early media: keep connecting on the early description.
    EarlyAnswer,
    LocalAnswered,
    MediaConnected,
    Hold,
    Unhold,
    RenegotiationStarted,
    RenegotiationFinished,
    ConnectionLost(NetworkChangeReason),
    Recovered,
    RecoveryFailed,
    Terminated(Option<TerminationReason>),
    ProtocolViolation,
}

/// Everything known about one call. Handed out by value as a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Name/number of the far end.
    pub remote_name: Option<String>,
    pub remote_number: Option<String>,
    pub destination: Option<String>,
    pub client_state: Option<String>,
    pub telnyx_session_id: Option<String>,
    pub telnyx_leg_id: Option<String>,
    pub muted: bool,
    pub speaker_on: bool,
    pub early_media: bool,
    pub custom_headers: Vec<CustomHeader>,
    #[serde(skip)]
    pub local_sdp: Option<String>,
    #[serde(skip)]
    pub remote_sdp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Milliseconds from creation to each named milestone.
    pub milestones: BTreeMap<&'static str, i64>,
}

impl CallInfo {
    pub fn new_outgoing(
        call_id: CallId,
        destination: impl Into<String>,
        custom_headers: Vec<CustomHeader>,
    ) -> Self {
        Self::new(call_id, CallDirection::Outgoing, CallPhase::New)
            .with_destination(destination.into())
            .with_headers(custom_headers)
    }

    /// Incoming calls start out ringing: the far end is already alerted.
    pub fn new_incoming(call_id: CallId, remote_sdp: String) -> Self {
        let mut info = Self::new(call_id, CallDirection::Incoming, CallPhase::Ringing);
        info.remote_sdp = Some(remote_sdp);
        info
    }

    fn new(call_id: CallId, direction: CallDirection, phase: CallPhase) -> Self {
        Self {
            call_id,
            direction,
            phase,
            remote_name: None,
            remote_number: None,
            destination: None,
            client_state: None,
            telnyx_session_id: None,
            telnyx_leg_id: None,
            muted: false,
            speaker_on: false,
            early_media: false,
            custom_headers: Vec::new(),
            local_sdp: None,
            remote_sdp: None,
            created_at: Utc::now(),
            connected_at: None,
            milestones: BTreeMap::new(),
        }
    }

    fn with_destination(mut self, destination: String) -> Self {
        self.destination = Some(destination);
        self
    }

    fn with_headers(mut self, headers: Vec<CustomHeader>) -> Self {
        self.custom_headers = headers;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn mark_milestone(&mut self, name: &'static str) {
        let elapsed = Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds();
        self.milestones.entry(name).or_insert(elapsed);
    }

    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        use CallPhase as P;
        use CallTransition as T;

        let next = match (&self.phase, &transition) {
            (current, _) if current.is_terminal() => None,

            (P::New, T::InviteSent) => Some(P::Connecting),
            (P::Connecting, T::RingingReceived) => Some(P::Ringing),
            (P::Ringing, T::RingingReceived) => Some(P::Ringing),
            (P::Connecting | P::Ringing, T::AnswerReceived) => Some(P::Active),
            (P::Connecting | P::Ringing, T::EarlyAnswer) => Some(P::Connecting),
            (P::Ringing, T::LocalAnswered) if self.direction == CallDirection::Incoming => {
                Some(P::Active)
            }
            (P::Connecting, T::MediaConnected) => Some(P::Active),

            (P::Active, T::Hold) => Some(P::Held),
            (P::Held, T::Unhold) => Some(P::Active),

            (P::Active, T::RenegotiationStarted) => Some(P::Renegotiating),
            (P::Renegotiating, T::RenegotiationFinished) => Some(P::Active),

            (
                P::Connecting | P::Ringing | P::Active | P::Held | P::Renegotiating,
                T::ConnectionLost(reason),
            ) => Some(P::Reconnecting(*reason)),
            (P::Reconnecting(_), T::Recovered) => Some(P::Active),
            (P::Reconnecting(_), T::RecoveryFailed) => {
                Some(P::Dropped(NetworkChangeReason::NetworkLost))
            }

            (_, T::Terminated(reason)) => Some(P::Done(reason.clone())),
            (_, T::ProtocolViolation) => Some(P::Error),

            _ => None,
        };

        let Some(next) = next else {
            return Err(InvalidTransition {
                current_state: self.phase.to_string(),
                attempted: format!("{transition:?}"),
            });
        };

        if next == P::Active && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
            self.mark_milestone("active");
        }
        self.phase = next;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
