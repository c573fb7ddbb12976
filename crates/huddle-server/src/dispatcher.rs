//! Per-connection state machine (spec.md §4.3).
//!
//! One `Connection` is constructed per upgraded socket. The WS transport
//! layer (`ws.rs`) owns the actual frame I/O and feeds decoded text into
//! `Connection::handle_frame`; this module never touches a socket
//! directly, keeping the same `send`/`close`/`is_open` abstraction between
//! dispatcher and transport.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use huddle_core::{
    admission, AdmissionDecision, OutboundHandle, Participant, ParticipantPatch, RoomConfig,
    RoomRegistry, WaitingParticipant, WireFrame,
};
use huddle_protocol::{Common, ErrorCode, Message, ModeratorActionKind};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn common(room_id: &str, participant_id: &str) -> Common {
    Common {
        room_id: room_id.to_string(),
        participant_id: participant_id.to_string(),
        timestamp: now_ms(),
    }
}

fn frame(msg: &Message) -> WireFrame {
    Arc::from(huddle_protocol::encode(msg).as_str())
}

/// Best-effort extraction of a panic payload's message for logging.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// What this socket is currently bound to. Purely local bookkeeping for
/// inbound authorization — the Registry remains the single source of
/// truth for whether the binding is still valid (spec.md §2: "The
/// Dispatcher holds weak (lookup) references keyed by socket").
#[derive(Debug, Clone)]
enum Binding {
    Unbound,
    Waiting { room_id: String, participant_id: String },
    Active { room_id: String, participant_id: String },
}

pub struct Connection {
    registry: Arc<RoomRegistry>,
    outbound: OutboundHandle,
    binding: Binding,
    default_max_participants: usize,
}

impl Connection {
    pub fn new(registry: Arc<RoomRegistry>, outbound: OutboundHandle, default_max_participants: usize) -> Self {
        Self {
            registry,
            outbound,
            binding: Binding::Unbound,
            default_max_participants,
        }
    }

    fn reply(&self, msg: &Message) {
        self.outbound.send(frame(msg));
    }

    fn send_error(&self, room_id: &str, participant_id: &str, message: &str, code: Option<ErrorCode>) {
        self.reply(&Message::Error {
            common: common(room_id, participant_id),
            message: message.to_string(),
            code,
        });
    }

    /// Decode one inbound text frame and dispatch it. Malformed frames
    /// produce the generic protocol error and otherwise leave the socket
    /// untouched (spec.md §4.1).
    ///
    /// A panic inside `handle_message` is caught here rather than
    /// propagated: it unwinds only this connection's call stack, so
    /// whatever the handler already completed before panicking (sends,
    /// registry mutations) stands, but the crash never reaches the
    /// process-wide task that would otherwise bring down every other
    /// connection (spec.md §7).
    pub fn handle_frame(&mut self, text: &str) {
        match huddle_protocol::decode(text) {
            Ok(msg) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.handle_message(msg))) {
                    tracing::error!(panic = %panic_message(&panic), "message handler panicked");
                }
            }
            Err(_) => self.send_error("", "", "Invalid message format", None),
        }
    }

    pub fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::Join { common, name, password, is_host, creator_token } => {
                self.handle_join(common.room_id, name, password, is_host.unwrap_or(false), creator_token)
            }
            Message::Leave { .. } => self.handle_leave(),
            Message::Offer { common, target_id, sdp } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::Offer { common: c, target_id: t, sdp })
            }
            Message::Answer { common, target_id, sdp } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::Answer { common: c, target_id: t, sdp })
            }
            Message::IceCandidate { common, target_id, candidate } => self.relay_targeted(common.room_id, target_id, |c, t| {
                Message::IceCandidate { common: c, target_id: t, candidate }
            }),
            Message::FileOffer { common, target_id, file_name, file_size, file_type } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::FileOffer {
                    common: c,
                    target_id: t,
                    file_name,
                    file_size,
                    file_type,
                })
            }
            Message::FileAnswer { common, target_id, accepted } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::FileAnswer { common: c, target_id: t, accepted })
            }
            Message::FileChunk { common, target_id, chunk, index, total } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::FileChunk {
                    common: c,
                    target_id: t,
                    chunk,
                    index,
                    total,
                })
            }
            Message::QualityChange { common, target_id, quality } => {
                self.relay_targeted(common.room_id, target_id, |c, t| Message::QualityChange { common: c, target_id: t, quality })
            }
            Message::Chat { common, text, reply_to } => self.handle_chat(common.room_id, text, reply_to),
            Message::ParticipantUpdated { common, is_muted, is_video_off, is_hand_raised } => self.handle_state_patch(
                common.room_id,
                ParticipantPatch { is_muted, is_video_off, is_hand_raised },
            ),
            Message::RaiseHand { common } => self.handle_state_patch(
                common.room_id,
                ParticipantPatch { is_hand_raised: Some(true), ..Default::default() },
            ),
            Message::LowerHand { common } => self.handle_state_patch(
                common.room_id,
                ParticipantPatch { is_hand_raised: Some(false), ..Default::default() },
            ),
            Message::ModeratorAction { common, target_id, action } => self.handle_moderator_action(common.room_id, target_id, action),
            Message::RoomLocked { common, .. } => self.handle_lock_toggle(common.room_id, true),
            Message::RoomUnlocked { common, .. } => self.handle_lock_toggle(common.room_id, false),
            Message::AdmitUser { common, target_id } => self.handle_admit(common.room_id, target_id),
            Message::RejectUser { common, target_id, reason } => self.handle_reject(common.room_id, target_id, reason),
            // Outbound-only variants are never legal inbound.
            Message::ParticipantJoined { .. }
            | Message::ParticipantLeft { .. }
            | Message::WaitingRoom { .. }
            | Message::Error { .. } => {
                self.send_error("", "", "Invalid message format", None);
            }
        }
    }

    fn handle_join(&mut self, room_id: String, name: String, password: Option<String>, is_host_flag: bool, creator_token: Option<String>) {
        if !matches!(self.binding, Binding::Unbound) {
            self.send_error(&room_id, "", "Already joined to a room", None);
            return;
        }

        let room_exists = self.registry.room_exists(&room_id);
        let password_ok = self.registry.validate_password(&room_id, password.as_deref());
        let is_locked = self.registry.is_room_locked(&room_id);
        let token_valid = self.registry.validate_creator_token(&room_id, creator_token.as_deref());

        let decision = admission::decide(room_exists, password_ok, is_locked, token_valid, is_host_flag);

        match decision {
            AdmissionDecision::RejectRoomNotFound => {
                self.send_error(&room_id, "", "Room not found", Some(ErrorCode::RoomNotFound));
            }
            AdmissionDecision::RejectInvalidPassword => {
                self.send_error(&room_id, "", "Invalid room password", Some(ErrorCode::InvalidPassword));
            }
            AdmissionDecision::AddToWaitingRoom => {
                let participant_id = huddle_core::ids::new_participant_id();
                let wp = WaitingParticipant::new(participant_id.clone(), name.clone(), room_id.clone(), self.outbound.clone());
                if self.registry.add_to_waiting_room(&room_id, wp).is_err() {
                    self.send_error(&room_id, "", "Room not found", Some(ErrorCode::RoomNotFound));
                    return;
                }
                self.binding = Binding::Waiting { room_id: room_id.clone(), participant_id: participant_id.clone() };

                let waiting_msg = Message::WaitingRoom {
                    common: common(&room_id, &participant_id),
                    name: name.clone(),
                };
                self.reply(&waiting_msg);
                self.broadcast_to_moderators(&room_id, &waiting_msg);
            }
            AdmissionDecision::CreateAndJoinAsHost | AdmissionDecision::AddAsParticipant | AdmissionDecision::BypassLockAsHost => {
                let is_host = matches!(
                    decision,
                    AdmissionDecision::CreateAndJoinAsHost | AdmissionDecision::BypassLockAsHost
                );
                self.complete_join(room_id, name, password, is_host);
            }
        }
    }

    fn complete_join(&mut self, room_id: String, name: String, password: Option<String>, is_host: bool) {
        let config = RoomConfig {
            max_participants: Some(self.default_max_participants),
            password,
            ..Default::default()
        };
        self.registry.get_or_create_room(&room_id, config);

        let participant_id = huddle_core::ids::new_participant_id();
        let participant = Participant::new(participant_id.clone(), name.clone(), room_id.clone(), self.outbound.clone());

        if let Err(_e) = self.registry.add_participant(&room_id, participant, is_host) {
            self.send_error(&room_id, "", "Room is full", None);
            return;
        }

        self.binding = Binding::Active { room_id: room_id.clone(), participant_id: participant_id.clone() };

        let Some(me) = self.registry.participant_public(&room_id, &participant_id) else {
            return;
        };

        let announce = Message::ParticipantJoined {
            common: common(&room_id, &participant_id),
            name: me.name.clone(),
            is_moderator: me.is_moderator,
            is_muted: me.is_muted,
            is_video_off: me.is_video_off,
        };

        // Step 7: tell everyone already in the room about the newcomer.
        self.registry.broadcast(&room_id, frame(&announce), Some(&participant_id));
        // Step 8: tell the joiner about themselves.
        self.reply(&announce);
        // Step 9: tell the joiner about every pre-existing peer, before
        // they begin peer negotiation.
        for peer in self.registry.list_participants(&room_id) {
            if peer.id == participant_id {
                continue;
            }
            self.reply(&Message::ParticipantJoined {
                common: common(&room_id, &peer.id),
                name: peer.name,
                is_moderator: peer.is_moderator,
                is_muted: peer.is_muted,
                is_video_off: peer.is_video_off,
            });
        }
    }

    fn handle_leave(&mut self) {
        self.disconnect();
    }

    /// Invoked both by an explicit `leave` message and by socket close.
    /// Idempotent: calling it on an already-unbound connection is a
    /// no-op (spec.md §8 "idempotent leave").
    pub fn disconnect(&mut self) {
        match std::mem::replace(&mut self.binding, Binding::Unbound) {
            Binding::Unbound => {}
            Binding::Waiting { room_id, participant_id } => {
                let _ = self.registry.reject_from_waiting_room(&room_id, &participant_id);
            }
            Binding::Active { room_id, participant_id } => {
                let outcome = self.registry.remove_participant(&room_id, &participant_id);
                if outcome.removed {
                    self.finish_departure(&room_id, &participant_id, outcome.new_host);
                }
            }
        }
    }

    fn finish_departure(&self, room_id: &str, departed_id: &str, new_host: Option<String>) {
        self.registry.broadcast(
            room_id,
            frame(&Message::ParticipantLeft { common: common(room_id, departed_id) }),
            None,
        );
        if let Some(new_host_id) = new_host {
            if let Some(host) = self.registry.participant_public(room_id, &new_host_id) {
                self.registry.broadcast(
                    room_id,
                    frame(&Message::ParticipantUpdated {
                        common: common(room_id, &new_host_id),
                        is_muted: Some(host.is_muted),
                        is_video_off: Some(host.is_video_off),
                        is_hand_raised: Some(host.is_hand_raised),
                    }),
                    None,
                );
            }
        }
    }

    fn relay_targeted<F>(&self, room_id: String, target_id: String, build: F)
    where
        F: FnOnce(Common, String) -> Message,
    {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        let msg = build(common(&sender_room, &sender_id), target_id.clone());
        self.registry.send_to(&sender_room, &target_id, frame(&msg));
    }

    fn handle_chat(&self, room_id: String, text: String, reply_to: Option<String>) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        let msg = Message::Chat {
            common: common(&sender_room, &sender_id),
            text,
            reply_to,
        };
        let encoded = frame(&msg);
        self.registry.broadcast(&sender_room, encoded.clone(), Some(&sender_id));
        self.outbound.send(encoded);
    }

    fn handle_state_patch(&self, room_id: String, patch: ParticipantPatch) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        if self.registry.update_participant(&sender_room, &sender_id, patch).is_err() {
            return;
        }
        let Some(me) = self.registry.participant_public(&sender_room, &sender_id) else {
            return;
        };
        self.registry.broadcast(
            &sender_room,
            frame(&Message::ParticipantUpdated {
                common: common(&sender_room, &sender_id),
                is_muted: Some(me.is_muted),
                is_video_off: Some(me.is_video_off),
                is_hand_raised: Some(me.is_hand_raised),
            }),
            Some(&sender_id),
        );
    }

    fn handle_moderator_action(&mut self, room_id: String, target_id: String, action: ModeratorActionKind) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        if !self.registry.is_moderator(&sender_room, &sender_id) {
            self.send_error(&sender_room, &sender_id, "Only moderators can perform this action", None);
            return;
        }

        match action {
            ModeratorActionKind::Mute => self.set_mute(&sender_room, &target_id, true),
            ModeratorActionKind::Unmute => self.set_mute(&sender_room, &target_id, false),
            ModeratorActionKind::MakeModerator => {
                if self.registry.set_moderator(&sender_room, &target_id, true).is_ok() {
                    if let Some(target) = self.registry.participant_public(&sender_room, &target_id) {
                        self.registry.broadcast(
                            &sender_room,
                            frame(&Message::ParticipantUpdated {
                                common: common(&sender_room, &target_id),
                                is_muted: Some(target.is_muted),
                                is_video_off: Some(target.is_video_off),
                                is_hand_raised: Some(target.is_hand_raised),
                            }),
                            None,
                        );
                    }
                }
            }
            ModeratorActionKind::Kick => {
                self.registry.send_to(
                    &sender_room,
                    &target_id,
                    frame(&Message::ModeratorAction {
                        common: common(&sender_room, &target_id),
                        target_id: target_id.clone(),
                        action: ModeratorActionKind::Kick,
                    }),
                );
                let outcome = self.registry.kick_participant(&sender_room, &target_id);
                if outcome.removed {
                    self.finish_departure(&sender_room, &target_id, outcome.new_host);
                }
            }
        }
    }

    fn set_mute(&self, room_id: &str, target_id: &str, muted: bool) {
        let patch = ParticipantPatch { is_muted: Some(muted), ..Default::default() };
        if self.registry.update_participant(room_id, target_id, patch).is_err() {
            return;
        }
        if let Some(target) = self.registry.participant_public(room_id, target_id) {
            self.registry.broadcast(
                room_id,
                frame(&Message::ParticipantUpdated {
                    common: common(room_id, target_id),
                    is_muted: Some(target.is_muted),
                    is_video_off: Some(target.is_video_off),
                    is_hand_raised: Some(target.is_hand_raised),
                }),
                None,
            );
        }
    }

    fn handle_lock_toggle(&self, room_id: String, lock: bool) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        if !self.registry.is_moderator(&sender_room, &sender_id) {
            self.send_error(&sender_room, &sender_id, "Only moderators can perform this action", None);
            return;
        }
        let result = if lock { self.registry.lock_room(&sender_room) } else { self.registry.unlock_room(&sender_room) };
        if result.is_err() {
            return;
        }
        let msg = if lock {
            Message::RoomLocked { common: common(&sender_room, &sender_id), locked_by: Some(sender_id.clone()) }
        } else {
            Message::RoomUnlocked { common: common(&sender_room, &sender_id), unlocked_by: Some(sender_id.clone()) }
        };
        self.registry.broadcast(&sender_room, frame(&msg), None);
    }

    fn handle_admit(&self, room_id: String, target_id: String) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        if !self.registry.is_moderator(&sender_room, &sender_id) {
            self.send_error(&sender_room, &sender_id, "Only moderators can perform this action", None);
            return;
        }
        let Ok(admitted) = self.registry.admit_from_waiting_room(&sender_room, &target_id) else {
            return;
        };

        let announce = Message::ParticipantJoined {
            common: common(&sender_room, &admitted.id),
            name: admitted.name.clone(),
            is_moderator: admitted.is_moderator,
            is_muted: admitted.is_muted,
            is_video_off: admitted.is_video_off,
        };

        self.registry.send_to(&sender_room, &admitted.id, frame(&announce));
        for peer in self.registry.list_participants(&sender_room) {
            if peer.id == admitted.id {
                continue;
            }
            self.registry.send_to(
                &sender_room,
                &admitted.id,
                frame(&Message::ParticipantJoined {
                    common: common(&sender_room, &peer.id),
                    name: peer.name,
                    is_moderator: peer.is_moderator,
                    is_muted: peer.is_muted,
                    is_video_off: peer.is_video_off,
                }),
            );
        }
        self.registry.broadcast(&sender_room, frame(&announce), Some(&admitted.id));
    }

    fn handle_reject(&self, room_id: String, target_id: String, reason: Option<String>) {
        let Some((sender_room, sender_id)) = self.active_binding() else {
            self.send_error(&room_id, "", "Not joined to a room", None);
            return;
        };
        if !self.registry.is_moderator(&sender_room, &sender_id) {
            self.send_error(&sender_room, &sender_id, "Only moderators can perform this action", None);
            return;
        }
        let Ok(rejected) = self.registry.reject_from_waiting_room(&sender_room, &target_id) else {
            return;
        };
        rejected.outbound.send(frame(&Message::RejectUser {
            common: common(&sender_room, &target_id),
            target_id: target_id.clone(),
            reason,
        }));
        rejected.outbound.close();
    }

    fn active_binding(&self) -> Option<(String, String)> {
        match &self.binding {
            Binding::Active { room_id, participant_id } => Some((room_id.clone(), participant_id.clone())),
            _ => None,
        }
    }

    fn broadcast_to_moderators(&self, room_id: &str, msg: &Message) {
        let encoded = frame(msg);
        for peer in self.registry.list_participants(room_id) {
            if peer.is_moderator {
                self.registry.send_to(room_id, &peer.id, encoded.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn harness(registry: &Arc<RoomRegistry>) -> (Connection, UnboundedReceiver<WireFrame>) {
        let (outbound, rx, _close) = OutboundHandle::new();
        (Connection::new(registry.clone(), outbound, huddle_core::DEFAULT_MAX_PARTICIPANTS), rx)
    }

    fn recv_all(rx: &mut UnboundedReceiver<WireFrame>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(huddle_protocol::decode(&frame).unwrap());
        }
        out
    }

    fn join(conn: &mut Connection, room_id: &str, name: &str, is_host: bool) {
        conn.handle_message(Message::Join {
            common: common(room_id, ""),
            name: name.to_string(),
            password: None,
            is_host: Some(is_host),
            creator_token: None,
        });
    }

    #[test]
    fn scenario_1_first_joiner_becomes_host() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);

        join(&mut a, "ABC123", "Alice", true);

        let received = recv_all(&mut a_rx);
        assert_eq!(received.len(), 1);
        match &received[0] {
            Message::ParticipantJoined { name, is_moderator, is_muted, is_video_off, .. } => {
                assert_eq!(name, "Alice");
                assert!(is_moderator);
                assert!(!is_muted);
                assert!(!is_video_off);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn scenario_2_second_joiner_sees_existing_peer_and_is_announced() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);
        join(&mut a, "ABC123", "Alice", true);
        recv_all(&mut a_rx);

        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ABC123", "Bob", false);

        let a_msgs = recv_all(&mut a_rx);
        assert_eq!(a_msgs.len(), 1);
        assert!(matches!(&a_msgs[0], Message::ParticipantJoined { name, .. } if name == "Bob"));

        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 2);
        assert!(matches!(&b_msgs[0], Message::ParticipantJoined { name, is_moderator: false, .. } if name == "Bob"));
        assert!(matches!(&b_msgs[1], Message::ParticipantJoined { name, is_moderator: true, .. } if name == "Alice"));
    }

    #[test]
    fn scenario_3_wrong_password_is_rejected() {
        let registry = Arc::new(RoomRegistry::new(10));
        let mut config = RoomConfig::default();
        config.password = Some("hunter2".to_string());
        registry.get_or_create_room("SEC999", config);

        let (mut c, mut c_rx) = harness(&registry);
        c.handle_message(Message::Join {
            common: common("SEC999", ""),
            name: "Eve".to_string(),
            password: Some("wrong".to_string()),
            is_host: None,
            creator_token: None,
        });

        let msgs = recv_all(&mut c_rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::Error { message, code, .. } => {
                assert_eq!(message, "Invalid room password");
                assert_eq!(*code, Some(ErrorCode::InvalidPassword));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(registry.list_participants("SEC999").len(), 0);
    }

    #[test]
    fn scenario_4_locked_room_waiting_room_flow() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut m, mut m_rx) = harness(&registry);
        join(&mut m, "LCK001", "Mod", true);
        recv_all(&mut m_rx);
        m.handle_message(Message::RoomLocked { common: common("LCK001", ""), locked_by: None });
        recv_all(&mut m_rx);

        let (mut d, mut d_rx) = harness(&registry);
        join(&mut d, "LCK001", "Dan", false);

        let d_msgs = recv_all(&mut d_rx);
        assert_eq!(d_msgs.len(), 1);
        let waiting_id = match &d_msgs[0] {
            Message::WaitingRoom { common, name } => {
                assert_eq!(name, "Dan");
                common.participant_id.clone()
            }
            other => panic!("unexpected message: {other:?}"),
        };

        let m_msgs = recv_all(&mut m_rx);
        assert_eq!(m_msgs.len(), 1);
        assert!(matches!(&m_msgs[0], Message::WaitingRoom { name, .. } if name == "Dan"));

        m.handle_message(Message::AdmitUser { common: common("LCK001", ""), target_id: waiting_id.clone() });

        let d_msgs = recv_all(&mut d_rx);
        assert_eq!(d_msgs.len(), 2);
        assert!(matches!(&d_msgs[0], Message::ParticipantJoined { name, .. } if name == "Dan"));
        assert!(matches!(&d_msgs[1], Message::ParticipantJoined { name, is_moderator: true, .. } if name == "Mod"));

        let m_msgs = recv_all(&mut m_rx);
        assert_eq!(m_msgs.len(), 1);
        assert!(matches!(&m_msgs[0], Message::ParticipantJoined { name, .. } if name == "Dan"));
    }

    #[test]
    fn scenario_5_moderator_kick() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut m, mut m_rx) = harness(&registry);
        join(&mut m, "ROOM1", "Mod", true);
        recv_all(&mut m_rx);

        let (mut x, mut x_rx) = harness(&registry);
        join(&mut x, "ROOM1", "X", false);
        let x_id = match recv_all(&mut x_rx).into_iter().next().unwrap() {
            Message::ParticipantJoined { common, .. } => common.participant_id,
            other => panic!("unexpected message: {other:?}"),
        };
        recv_all(&mut m_rx);

        m.handle_message(Message::ModeratorAction {
            common: common("ROOM1", ""),
            target_id: x_id.clone(),
            action: ModeratorActionKind::Kick,
        });

        let x_msgs = recv_all(&mut x_rx);
        assert_eq!(x_msgs.len(), 1);
        assert!(matches!(&x_msgs[0], Message::ModeratorAction { action: ModeratorActionKind::Kick, .. }));

        let m_msgs = recv_all(&mut m_rx);
        assert_eq!(m_msgs.len(), 1);
        assert!(matches!(&m_msgs[0], Message::ParticipantLeft { common } if common.participant_id == x_id));
        assert_eq!(registry.list_participants("ROOM1").len(), 1);
    }

    #[test]
    fn scenario_6_creator_token_bypasses_lock() {
        let registry = Arc::new(RoomRegistry::new(10));
        let created = registry.pre_create_room(Some("PRE777".to_string()), None, None).unwrap();
        registry.lock_room(&created.room_id).unwrap();

        let (mut h, mut h_rx) = harness(&registry);
        h.handle_message(Message::Join {
            common: common(&created.room_id, ""),
            name: "Host".to_string(),
            password: None,
            is_host: None,
            creator_token: Some(created.creator_token.clone()),
        });

        let msgs = recv_all(&mut h_rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::ParticipantJoined { name, is_moderator, .. } => {
                assert_eq!(name, "Host");
                assert!(is_moderator);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn chat_echoes_to_sender_and_fans_out_to_others() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);
        join(&mut a, "ROOM1", "Alice", true);
        recv_all(&mut a_rx);
        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ROOM1", "Bob", false);
        recv_all(&mut a_rx);
        recv_all(&mut b_rx);

        a.handle_message(Message::Chat { common: common("ROOM1", ""), text: "hi".to_string(), reply_to: None });

        let a_msgs = recv_all(&mut a_rx);
        assert_eq!(a_msgs.len(), 1);
        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 1);
        assert!(matches!(&a_msgs[0], Message::Chat { text, .. } if text == "hi"));
        assert!(matches!(&b_msgs[0], Message::Chat { text, .. } if text == "hi"));
    }

    #[test]
    fn relay_is_not_broadcast_and_not_echoed() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);
        join(&mut a, "ROOM1", "Alice", true);
        recv_all(&mut a_rx);
        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ROOM1", "Bob", false);
        let b_id = registry.list_participants("ROOM1").into_iter().find(|p| p.name == "Bob").unwrap().id;
        recv_all(&mut a_rx);
        recv_all(&mut b_rx);

        a.handle_message(Message::Offer {
            common: common("ROOM1", ""),
            target_id: b_id,
            sdp: serde_json::json!({"type": "offer"}),
        });

        assert_eq!(recv_all(&mut a_rx).len(), 0);
        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 1);
        assert!(matches!(&b_msgs[0], Message::Offer { .. }));
    }

    #[test]
    fn non_moderator_kick_attempt_is_rejected() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);
        join(&mut a, "ROOM1", "Alice", true);
        recv_all(&mut a_rx);
        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ROOM1", "Bob", false);
        let a_id = registry.list_participants("ROOM1").into_iter().find(|p| p.name == "Alice").unwrap().id;
        recv_all(&mut a_rx);
        recv_all(&mut b_rx);

        b.handle_message(Message::ModeratorAction {
            common: common("ROOM1", ""),
            target_id: a_id,
            action: ModeratorActionKind::Kick,
        });

        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 1);
        assert!(matches!(&b_msgs[0], Message::Error { message, .. } if message == "Only moderators can perform this action"));
        assert_eq!(registry.list_participants("ROOM1").len(), 2);
    }

    #[test]
    fn host_departure_promotes_next_participant_and_broadcasts_update() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, mut a_rx) = harness(&registry);
        join(&mut a, "ROOM1", "Alice", true);
        recv_all(&mut a_rx);
        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ROOM1", "Bob", false);
        recv_all(&mut a_rx);
        recv_all(&mut b_rx);

        a.disconnect();

        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 2);
        assert!(matches!(&b_msgs[0], Message::ParticipantLeft { .. }));
        assert!(matches!(&b_msgs[1], Message::ParticipantUpdated { .. }));
        assert!(registry.is_moderator("ROOM1", &registry.list_participants("ROOM1")[0].id));
    }

    #[test]
    fn panic_message_downcasts_str_and_string_payloads() {
        let str_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*str_payload), "boom");

        let string_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom owned"));
        assert_eq!(panic_message(&*string_payload), "boom owned");

        let other_payload: Box<dyn std::any::Any + Send> = Box::new(42i32);
        assert_eq!(panic_message(&*other_payload), "non-string panic payload");
    }

    #[test]
    fn leave_then_close_produces_exactly_one_participant_left() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (mut a, _a_rx) = harness(&registry);
        join(&mut a, "ROOM1", "Alice", true);
        let (mut b, mut b_rx) = harness(&registry);
        join(&mut b, "ROOM1", "Bob", false);
        recv_all(&mut b_rx);

        a.handle_message(Message::Leave { common: common("ROOM1", "") });
        a.disconnect();

        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.iter().filter(|m| matches!(m, Message::ParticipantLeft { .. })).count(), 1);
    }

    #[test]
    fn ad_hoc_room_honors_the_connection_configured_max_participants() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (outbound_a, _a_rx, _a_close) = OutboundHandle::new();
        let mut a = Connection::new(registry.clone(), outbound_a, 1);
        join(&mut a, "ROOM1", "Alice", true);

        let (outbound_b, mut b_rx, _b_close) = OutboundHandle::new();
        let mut b = Connection::new(registry.clone(), outbound_b, 1);
        join(&mut b, "ROOM1", "Bob", false);

        let b_msgs = recv_all(&mut b_rx);
        assert_eq!(b_msgs.len(), 1);
        assert!(matches!(&b_msgs[0], Message::Error { message, .. } if message == "Room is full"));
        assert_eq!(registry.list_participants("ROOM1").len(), 1);
    }
}
