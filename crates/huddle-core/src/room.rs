use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::participant::{Participant, WaitingParticipant};

/// Default cap on simultaneous participants in a room (spec.md §3).
pub const DEFAULT_MAX_PARTICIPANTS: usize = 8;

/// Optional overrides accepted by `getOrCreateRoom`.
#[derive(Debug, Default, Clone)]
pub struct RoomConfig {
    pub max_participants: Option<usize>,
    pub password: Option<String>,
    pub creator_token: Option<String>,
    pub is_pre_created: bool,
}

/// A single meeting room and all of its live state (spec.md §3).
///
/// `participants` and `waiting_room` are `IndexMap`s rather than
/// `HashMap`s specifically so host promotion in `remove_participant` can
/// deterministically pick "the earliest-remaining participant by
/// insertion order" without a secondary ordering structure.
pub struct Room {
    pub id: String,
    pub participants: IndexMap<String, Participant>,
    pub waiting_room: IndexMap<String, WaitingParticipant>,
    pub password: Option<String>,
    pub is_locked: bool,
    pub host_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub max_participants: usize,
    pub creator_token: Option<String>,
    pub is_pre_created: bool,
}

impl Room {
    pub fn new(id: String, config: RoomConfig) -> Self {
        Self {
            id,
            participants: IndexMap::new(),
            waiting_room: IndexMap::new(),
            password: config.password,
            is_locked: false,
            host_id: None,
            created_at: Utc::now(),
            max_participants: config.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS),
            creator_token: config.creator_token,
            is_pre_created: config.is_pre_created,
        }
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
