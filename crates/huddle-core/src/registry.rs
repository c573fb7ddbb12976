use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::RoomError;
use crate::ids::normalize_room_id;
use crate::outbound::WireFrame;
use crate::participant::{Participant, ParticipantPatch, WaitingParticipant};
use crate::room::{Room, RoomConfig};

/// The public, wire-relevant fields of a `Participant` (spec.md §6's
/// `participant-joined`/`participant-updated` field list), detached from
/// the registry lock so callers can build outbound envelopes after
/// releasing it.
#[derive(Debug, Clone)]
pub struct ParticipantPublic {
    pub id: String,
    pub name: String,
    pub is_moderator: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_hand_raised: bool,
}

impl From<&Participant> for ParticipantPublic {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            is_moderator: p.is_moderator,
            is_muted: p.is_muted,
            is_video_off: p.is_video_off,
            is_hand_raised: p.is_hand_raised,
        }
    }
}

/// The result of removing a participant from a room (spec.md §4.2).
#[derive(Debug, Clone, Default)]
pub struct RemovalOutcome {
    /// `true` if the participant was actually present.
    pub removed: bool,
    /// Set if departure triggered deterministic host promotion.
    pub new_host: Option<String>,
    /// `true` if the room became empty and was dropped from the registry.
    pub room_deleted: bool,
}

/// In-memory concurrent registry of every room the server currently
/// knows about (spec.md §4.2).
///
/// Sharded by `DashMap` for cross-room concurrency, with each room's
/// multi-step mutations (join, admit, remove) guarded by its own
/// `parking_lot::Mutex` so they execute as a single atomic critical
/// section relative to other observers of that room (spec.md invariant
/// 7), without serializing unrelated rooms against each other.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<Room>>>,
    max_latent_rooms: usize,
    peak_participants: AtomicUsize,
}

impl RoomRegistry {
    pub fn new(max_latent_rooms: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_latent_rooms,
            peak_participants: AtomicUsize::new(0),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peak_participants(&self) -> usize {
        self.peak_participants.load(Ordering::Relaxed)
    }

    /// Sum of currently-connected participants across every room, for
    /// `GET /health` (spec.md §6).
    pub fn total_participants(&self) -> usize {
        self.rooms.iter().map(|r| r.lock().participants.len()).sum()
    }

    fn get(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Returns the room if it exists, creating it with `config` if it
    /// doesn't (spec.md §4.2 `getOrCreateRoom`).
    pub fn get_or_create_room(&self, room_id: &str, config: RoomConfig) -> Arc<Mutex<Room>> {
        let room_id = normalize_room_id(room_id);
        if let Some(room) = self.get(&room_id) {
            return room;
        }
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id, config))))
            .clone()
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(&normalize_room_id(room_id))
    }
}

/// The durable facts about a freshly pre-created room, handed back to
/// the HTTP layer and to the `LatentStore`.
#[derive(Debug, Clone)]
pub struct PreCreatedRoom {
    pub room_id: String,
    pub creator_token: String,
}

impl RoomRegistry {
    /// Create a room in advance of anyone joining it (spec.md §4.2
    /// `preCreateRoom`). Generates `room_id` if absent and always mints a
    /// fresh `creatorToken` — the caller never supplies one, since the
    /// token's only value is being unguessable. The latent-room cap is
    /// checked *before* calling `entry()`: `entry()` holds a shard write
    /// lock, and a `len()`-style scan needs to read every shard, so running
    /// the scan inside the `entry()` closure deadlocks.
    pub fn pre_create_room(
        &self,
        room_id: Option<String>,
        max_participants: Option<usize>,
        password: Option<String>,
    ) -> Result<PreCreatedRoom, RoomError> {
        let room_id = room_id
            .map(|id| normalize_room_id(&id))
            .unwrap_or_else(crate::ids::new_room_code);
        if self.rooms.contains_key(&room_id) {
            return Err(RoomError::RoomIdTaken);
        }
        let latent_count = self.rooms.iter().filter(|r| r.lock().is_pre_created).count();
        if latent_count >= self.max_latent_rooms {
            return Err(RoomError::LatentCapacityReached);
        }
        let creator_token = crate::ids::new_creator_token();
        let config = RoomConfig {
            max_participants,
            password,
            creator_token: Some(creator_token.clone()),
            is_pre_created: true,
        };
        let room = Arc::new(Mutex::new(Room::new(room_id.clone(), config)));
        self.rooms.insert(room_id.clone(), room);
        Ok(PreCreatedRoom { room_id, creator_token })
    }

    /// Restore a latent room loaded from disk at startup, preserving its
    /// original id, token, and age rather than minting new ones.
    pub fn restore_latent_room(&self, record: &crate::latent::LatentRoomRecord) {
        let room_id = normalize_room_id(&record.room_id);
        if self.rooms.contains_key(&room_id) {
            return;
        }
        let mut room = Room::new(
            room_id.clone(),
            RoomConfig {
                max_participants: Some(record.max_participants),
                password: record.password.clone(),
                creator_token: Some(record.creator_token.clone()),
                is_pre_created: true,
            },
        );
        room.created_at = record.created_at;
        self.rooms.insert(room_id, Arc::new(Mutex::new(room)));
    }

    /// Every currently pre-created (latent) room, for rewriting the
    /// on-disk store after a mutation (spec.md §6).
    pub fn latent_rooms(&self) -> Vec<crate::latent::LatentRoomRecord> {
        self.rooms
            .iter()
            .filter_map(|entry| {
                let room = entry.value().lock();
                room.is_pre_created.then(|| crate::latent::LatentRoomRecord {
                    room_id: room.id.clone(),
                    password: room.password.clone(),
                    creator_token: room.creator_token.clone().unwrap_or_default(),
                    created_at: room.created_at,
                    max_participants: room.max_participants,
                })
            })
            .collect()
    }

    /// `true` if the room has no password, doesn't exist, or `candidate`
    /// matches it exactly (spec.md §4.2 `validatePassword`).
    pub fn validate_password(&self, room_id: &str, candidate: Option<&str>) -> bool {
        let Some(room) = self.get(&normalize_room_id(room_id)) else {
            return true;
        };
        let room = room.lock();
        match &room.password {
            None => true,
            Some(expected) => candidate == Some(expected.as_str()),
        }
    }

    /// `true` only if the room exists and `token` matches its creator
    /// token exactly (spec.md §4.2 `validateCreatorToken`). Absent
    /// tokens on either side never match.
    pub fn validate_creator_token(&self, room_id: &str, token: Option<&str>) -> bool {
        let Some(room) = self.get(&normalize_room_id(room_id)) else {
            return false;
        };
        let room = room.lock();
        match (&room.creator_token, token) {
            (Some(expected), Some(candidate)) => expected == candidate,
            _ => false,
        }
    }

    pub fn is_room_locked(&self, room_id: &str) -> bool {
        self.get(&normalize_room_id(room_id))
            .map(|r| r.lock().is_locked)
            .unwrap_or(false)
    }

    pub fn lock_room(&self, room_id: &str) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        room.lock().is_locked = true;
        Ok(())
    }

    pub fn unlock_room(&self, room_id: &str) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        room.lock().is_locked = false;
        Ok(())
    }

    /// Queue a join candidate for moderator review (spec.md §4.2
    /// `addToWaitingRoom`).
    pub fn add_to_waiting_room(&self, room_id: &str, wp: WaitingParticipant) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        room.lock().waiting_room.insert(wp.id.clone(), wp);
        Ok(())
    }

    /// Promote a waiting candidate into the room, atomically relative to
    /// any concurrent admit/reject/remove on the same room (spec.md
    /// invariant 7). Re-queues the candidate if the room filled up in
    /// the meantime rather than silently dropping them.
    pub fn admit_from_waiting_room(&self, room_id: &str, participant_id: &str) -> Result<Participant, RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        let mut room = room.lock();
        let wp = room
            .waiting_room
            .shift_remove(participant_id)
            .ok_or(RoomError::NoSuchWaitingParticipant)?;
        if room.is_full() {
            room.waiting_room.insert(wp.id.clone(), wp);
            return Err(RoomError::RoomFull);
        }
        let participant = Participant::from_waiting(wp);
        room.participants.insert(participant.id.clone(), participant.clone());
        if room.host_id.is_none() {
            room.host_id = Some(participant.id.clone());
        }
        self.bump_peak(room.participants.len());
        Ok(participant)
    }

    pub fn reject_from_waiting_room(&self, room_id: &str, participant_id: &str) -> Result<WaitingParticipant, RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        room.lock()
            .waiting_room
            .shift_remove(participant_id)
            .ok_or(RoomError::NoSuchWaitingParticipant)
    }

    /// Add an already-admitted participant directly (spec.md §4.2
    /// `addParticipant`). The room must already exist — callers join a
    /// brand-new room through `get_or_create_room` first. Becomes host if
    /// they are the first participant, `is_host` was requested, or the
    /// room is empty through a race with a concurrent departure.
    pub fn add_participant(&self, room_id: &str, mut participant: Participant, is_host: bool) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        let mut room = room.lock();
        if room.is_full() {
            return Err(RoomError::RoomFull);
        }
        if room.host_id.is_none() || is_host {
            room.host_id = Some(participant.id.clone());
            participant.is_moderator = true;
        }
        room.participants.insert(participant.id.clone(), participant);
        self.bump_peak(room.participants.len());
        Ok(())
    }

    /// Remove a participant, deterministically promoting the
    /// earliest-remaining participant (by insertion order) to host if
    /// the departing participant was host (spec.md invariant: "the room
    /// always has exactly one host while non-empty"). Drops the room
    /// entirely once it is left empty and holds no latent reservation.
    pub fn remove_participant(&self, room_id: &str, participant_id: &str) -> RemovalOutcome {
        let room_id = normalize_room_id(room_id);
        let Some(room) = self.get(&room_id) else {
            return RemovalOutcome::default();
        };
        let mut new_host = None;
        let mut room_deleted = false;
        {
            let mut room = room.lock();
            let Some(departing) = room.participants.shift_remove(participant_id) else {
                return RemovalOutcome::default();
            };
            let was_host = room.host_id.as_deref() == Some(participant_id);
            if was_host {
                room.host_id = None;
            }
            if was_host {
                if let Some((next_id, next)) = room.participants.iter_mut().next() {
                    next.is_moderator = true;
                    room.host_id = Some(next_id.clone());
                    new_host = room.host_id.clone();
                }
            }
            let _ = departing;
            if room.participants.is_empty() && room.waiting_room.is_empty() && !room.is_pre_created {
                room_deleted = true;
            }
        }
        if room_deleted {
            self.rooms.remove(&room_id);
        }
        RemovalOutcome {
            removed: true,
            new_host,
            room_deleted,
        }
    }

    pub fn update_participant(&self, room_id: &str, participant_id: &str, patch: ParticipantPatch) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        let mut room = room.lock();
        let participant = room
            .participants
            .get_mut(participant_id)
            .ok_or(RoomError::NoSuchRoom)?;
        patch.apply(participant);
        Ok(())
    }

    /// Close the target's socket and remove them from the room, as one
    /// moderator-initiated action (spec.md §4.2 `kickParticipant`).
    pub fn kick_participant(&self, room_id: &str, participant_id: &str) -> RemovalOutcome {
        if let Some(room) = self.get(&normalize_room_id(room_id)) {
            if let Some(p) = room.lock().participants.get(participant_id) {
                p.outbound.close();
            }
        }
        self.remove_participant(room_id, participant_id)
    }

    /// Send a pre-encoded frame to every participant, skipping
    /// `exclude_id` (typically the sender, for relay fan-out). The frame
    /// is encoded once by the caller and cheaply cloned (`Arc<str>`) to
    /// every recipient rather than re-serialized per participant.
    pub fn broadcast(&self, room_id: &str, frame: WireFrame, exclude_id: Option<&str>) {
        let Some(room) = self.get(&normalize_room_id(room_id)) else {
            return;
        };
        let room = room.lock();
        for (id, participant) in room.participants.iter() {
            if Some(id.as_str()) == exclude_id {
                continue;
            }
            participant.outbound.send(frame.clone());
        }
    }

    /// Send a pre-encoded frame to exactly one participant (spec.md
    /// §4.2 `sendTo`). Returns `false` if the room or participant isn't
    /// found, or the socket is already closed.
    pub fn send_to(&self, room_id: &str, participant_id: &str, frame: WireFrame) -> bool {
        let Some(room) = self.get(&normalize_room_id(room_id)) else {
            return false;
        };
        let room = room.lock();
        match room.participants.get(participant_id) {
            Some(p) => p.outbound.send(frame),
            None => false,
        }
    }

    /// Snapshot one participant's public fields (spec.md §6).
    pub fn participant_public(&self, room_id: &str, participant_id: &str) -> Option<ParticipantPublic> {
        let room = self.get(&normalize_room_id(room_id))?;
        let room = room.lock();
        room.participants.get(participant_id).map(ParticipantPublic::from)
    }

    /// Every current participant in insertion order, for enumerating a
    /// room to a newly-joined peer (spec.md §4.3 step 9).
    pub fn list_participants(&self, room_id: &str) -> Vec<ParticipantPublic> {
        let Some(room) = self.get(&normalize_room_id(room_id)) else {
            return Vec::new();
        };
        let room = room.lock();
        room.participants.values().map(ParticipantPublic::from).collect()
    }

    pub fn is_moderator(&self, room_id: &str, participant_id: &str) -> bool {
        self.get(&normalize_room_id(room_id))
            .and_then(|room| room.lock().participants.get(participant_id).map(|p| p.is_moderator))
            .unwrap_or(false)
    }

    /// Grant or revoke the moderator bit directly, bypassing
    /// `ParticipantPatch` (which intentionally never touches
    /// `is_moderator` — that field is host/admission-controlled, not a
    /// client-settable preference).
    pub fn set_moderator(&self, room_id: &str, participant_id: &str, value: bool) -> Result<(), RoomError> {
        let room = self.get(&normalize_room_id(room_id)).ok_or(RoomError::NoSuchRoom)?;
        let mut room = room.lock();
        let participant = room.participants.get_mut(participant_id).ok_or(RoomError::NoSuchRoom)?;
        participant.is_moderator = value;
        Ok(())
    }

    fn bump_peak(&self, count: usize) {
        self.peak_participants.fetch_max(count, Ordering::Relaxed);
    }

    /// One combined sweep evicting both classes of abandoned room
    /// (spec.md §4.5). The two age thresholds are independent — pass
    /// `None` to skip evaluating a class — but a single pass over the
    /// registry checks both, since they're mutually exclusive per room
    /// (`is_pre_created` selects which threshold applies).
    pub fn cleanup_abandoned_rooms(&self, room_max_age: Option<Duration>, latent_max_age: Option<Duration>) -> usize {
        let now = Utc::now();
        let mut doomed = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value().lock();
            let age = now - room.created_at;
            let expired = if room.is_pre_created {
                latent_max_age.is_some_and(|max| room.participants.is_empty() && age > max)
            } else {
                room_max_age.is_some_and(|max| room.participants.is_empty() && room.waiting_room.is_empty() && age > max)
            };
            if expired {
                doomed.push(entry.key().clone());
            }
        }
        for room_id in &doomed {
            self.rooms.remove(room_id);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundHandle;

    fn participant(id: &str, room_id: &str) -> Participant {
        let (outbound, _rx, _close) = OutboundHandle::new();
        Participant::new(id.to_string(), format!("name-{id}"), room_id.to_string(), outbound)
    }

    fn waiting(id: &str, room_id: &str) -> WaitingParticipant {
        let (outbound, _rx, _close) = OutboundHandle::new();
        WaitingParticipant::new(id.to_string(), format!("name-{id}"), room_id.to_string(), outbound)
    }

    #[test]
    fn get_or_create_room_is_idempotent() {
        let registry = RoomRegistry::new(10);
        let a = registry.get_or_create_room("abc123", RoomConfig::default());
        let b = registry.get_or_create_room("ABC123", RoomConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn first_participant_becomes_host() {
        let registry = RoomRegistry::new(10);
        registry.get_or_create_room("room1", RoomConfig::default());
        registry.add_participant("room1", participant("p1", "room1"), false).unwrap();
        let room = registry.get("room1").unwrap();
        assert_eq!(room.lock().host_id.as_deref(), Some("p1"));
    }

    #[test]
    fn host_departure_promotes_earliest_remaining_participant() {
        let registry = RoomRegistry::new(10);
        registry.get_or_create_room("room1", RoomConfig::default());
        registry.add_participant("room1", participant("p1", "room1"), false).unwrap();
        registry.add_participant("room1", participant("p2", "room1"), false).unwrap();
        registry.add_participant("room1", participant("p3", "room1"), false).unwrap();

        let outcome = registry.remove_participant("room1", "p1");
        assert_eq!(outcome.new_host.as_deref(), Some("p2"));

        let room = registry.get("room1").unwrap();
        let room = room.lock();
        assert_eq!(room.host_id.as_deref(), Some("p2"));
        assert!(room.participants.get("p2").unwrap().is_moderator);
    }

    #[test]
    fn emptying_a_non_latent_room_drops_it() {
        let registry = RoomRegistry::new(10);
        registry.get_or_create_room("room1", RoomConfig::default());
        registry.add_participant("room1", participant("p1", "room1"), false).unwrap();

        let outcome = registry.remove_participant("room1", "p1");
        assert!(outcome.room_deleted);
        assert!(!registry.room_exists("room1"));
    }

    #[test]
    fn emptying_a_latent_room_keeps_it() {
        let registry = RoomRegistry::new(10);
        registry.pre_create_room(Some("room1".to_string()), None, None).unwrap();
        registry.add_participant("room1", participant("p1", "room1"), false).unwrap();

        let outcome = registry.remove_participant("room1", "p1");
        assert!(!outcome.room_deleted);
        assert!(registry.room_exists("room1"));
    }

    #[test]
    fn pre_create_room_rejects_duplicate_id() {
        let registry = RoomRegistry::new(10);
        registry.pre_create_room(Some("room1".to_string()), None, None).unwrap();
        assert_eq!(
            registry.pre_create_room(Some("room1".to_string()), None, None).unwrap_err(),
            RoomError::RoomIdTaken
        );
    }

    #[test]
    fn pre_create_room_enforces_latent_capacity() {
        let registry = RoomRegistry::new(1);
        registry.pre_create_room(Some("room1".to_string()), None, None).unwrap();
        assert_eq!(
            registry.pre_create_room(Some("room2".to_string()), None, None).unwrap_err(),
            RoomError::LatentCapacityReached
        );
    }

    #[test]
    fn pre_create_room_generates_id_and_token_when_absent() {
        let registry = RoomRegistry::new(10);
        let created = registry.pre_create_room(None, None, None).unwrap();
        assert_eq!(created.room_id.len(), 6);
        assert!(!created.creator_token.is_empty());
        assert!(registry.room_exists(&created.room_id));
    }

    #[test]
    fn admit_from_waiting_room_moves_candidate_into_participants() {
        let registry = RoomRegistry::new(10);
        registry.get_or_create_room("room1", RoomConfig::default());
        registry.add_to_waiting_room("room1", waiting("w1", "room1")).unwrap();

        let admitted = registry.admit_from_waiting_room("room1", "w1").unwrap();
        assert_eq!(admitted.id, "w1");
        let room = registry.get("room1").unwrap();
        let room = room.lock();
        assert!(room.waiting_room.is_empty());
        assert!(room.participants.contains_key("w1"));
    }

    #[test]
    fn admit_from_waiting_room_requeues_when_room_fills_up_concurrently() {
        let registry = RoomRegistry::new(10);
        let mut config = RoomConfig::default();
        config.max_participants = Some(1);
        registry.get_or_create_room("room1", config);
        registry.add_participant("room1", participant("p1", "room1"), false).unwrap();
        registry.add_to_waiting_room("room1", waiting("w1", "room1")).unwrap();

        let err = registry.admit_from_waiting_room("room1", "w1").unwrap_err();
        assert_eq!(err, RoomError::RoomFull);
        let room = registry.get("room1").unwrap();
        assert!(room.lock().waiting_room.contains_key("w1"));
    }

    #[test]
    fn validate_password_accepts_missing_room_and_passwordless_room() {
        let registry = RoomRegistry::new(10);
        assert!(registry.validate_password("nope", Some("whatever")));

        registry.get_or_create_room("room1", RoomConfig::default());
        assert!(registry.validate_password("room1", None));
    }

    #[test]
    fn validate_password_requires_exact_match() {
        let registry = RoomRegistry::new(10);
        let mut config = RoomConfig::default();
        config.password = Some("secret".to_string());
        registry.get_or_create_room("room1", config);

        assert!(!registry.validate_password("room1", Some("wrong")));
        assert!(registry.validate_password("room1", Some("secret")));
    }

    #[test]
    fn cleanup_abandoned_rooms_respects_independent_thresholds() {
        let registry = RoomRegistry::new(10);
        registry.get_or_create_room("stale", RoomConfig::default());
        if let Some(room) = registry.get("stale") {
            room.lock().created_at = Utc::now() - Duration::hours(2);
        }
        registry.pre_create_room(Some("latent".to_string()), None, None).unwrap();
        if let Some(room) = registry.get("latent") {
            room.lock().created_at = Utc::now() - Duration::hours(2);
        }

        let evicted = registry.cleanup_abandoned_rooms(Some(Duration::hours(1)), None);
        assert_eq!(evicted, 1);
        assert!(!registry.room_exists("stale"));
        assert!(registry.room_exists("latent"));
    }
}
