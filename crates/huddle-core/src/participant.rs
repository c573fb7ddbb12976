use chrono::{DateTime, Utc};

use crate::outbound::OutboundHandle;

/// An admitted, live member of exactly one room (spec.md §3).
#[derive(Clone)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub room_id: String,
    pub is_moderator: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_hand_raised: bool,
    pub joined_at: DateTime<Utc>,
    pub outbound: OutboundHandle,
}

impl Participant {
    pub fn new(id: String, name: String, room_id: String, outbound: OutboundHandle) -> Self {
        Self {
            id,
            name,
            room_id,
            is_moderator: false,
            is_muted: false,
            is_video_off: false,
            is_hand_raised: false,
            joined_at: Utc::now(),
            outbound,
        }
    }

    /// Build a `Participant` out of a promoted `WaitingParticipant`,
    /// carrying over identity and outbound binding but resetting the
    /// room-state flags to their defaults, as a fresh join would.
    pub fn from_waiting(wp: WaitingParticipant) -> Self {
        Self::new(wp.id, wp.name, wp.room_id, wp.outbound)
    }
}

/// A join candidate pending moderator review (spec.md §3). Never visible
/// to non-moderators.
#[derive(Clone)]
pub struct WaitingParticipant {
    pub id: String,
    pub name: String,
    pub room_id: String,
    pub requested_at: DateTime<Utc>,
    pub outbound: OutboundHandle,
}

impl WaitingParticipant {
    pub fn new(id: String, name: String, room_id: String, outbound: OutboundHandle) -> Self {
        Self {
            id,
            name,
            room_id,
            requested_at: Utc::now(),
            outbound,
        }
    }
}

/// The subset of a `Participant`'s fields `updateParticipant` is allowed
/// to merge. `id`, `room_id`, and `joined_at` are immutable after
/// creation (spec.md §4.2).
#[derive(Debug, Default, Clone, Copy)]
pub struct ParticipantPatch {
    pub is_muted: Option<bool>,
    pub is_video_off: Option<bool>,
    pub is_hand_raised: Option<bool>,
}

impl ParticipantPatch {
    pub fn apply(&self, p: &mut Participant) {
        if let Some(v) = self.is_muted {
            p.is_muted = v;
        }
        if let Some(v) = self.is_video_off {
            p.is_video_off = v;
        }
        if let Some(v) = self.is_hand_raised {
            p.is_hand_raised = v;
        }
    }
}
