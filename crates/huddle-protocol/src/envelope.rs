use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields carried by every envelope, inbound or outbound.
///
/// `participant_id` is authoritative from the client only on `join` (where
/// the server doesn't know the sender yet); for every other inbound
/// variant the dispatcher ignores the client-supplied value and
/// substitutes the bound participant's id before relaying or broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Common {
    pub room_id: String,
    #[serde(default)]
    pub participant_id: String,
    pub timestamp: i64,
}

/// `moderator-action`'s `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeratorActionKind {
    Mute,
    Unmute,
    Kick,
    MakeModerator,
}

/// `quality-change`'s `quality` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    Low,
}

/// Stable error codes for authentication-class failures (spec.md §7).
/// Protocol and capacity/authorization errors carry no code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ROOM_NOT_FOUND")]
    RoomNotFound,
    #[serde(rename = "INVALID_PASSWORD")]
    InvalidPassword,
}

/// The closed set of envelopes exchanged over `/ws`.
///
/// Tagged internally by `type` using kebab-case variant names
/// (`IceCandidate` <-> `"ice-candidate"`), with every per-variant field
/// rendered as camelCase to match spec.md §6's wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Message {
    // --- inbound: admission ---
    Join {
        #[serde(flatten)]
        common: Common,
        name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        is_host: Option<bool>,
        #[serde(default)]
        creator_token: Option<String>,
    },
    Leave {
        #[serde(flatten)]
        common: Common,
    },

    // --- inbound: relay (targeted, no broadcast) ---
    Offer {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        sdp: Value,
    },
    Answer {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        sdp: Value,
    },
    IceCandidate {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        candidate: Value,
    },
    FileOffer {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        file_name: String,
        file_size: u64,
        file_type: String,
    },
    FileAnswer {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        accepted: bool,
    },
    FileChunk {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        chunk: String,
        index: u32,
        total: u32,
    },
    QualityChange {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        quality: Quality,
    },

    // --- inbound: fan-out / state ---
    Chat {
        #[serde(flatten)]
        common: Common,
        text: String,
        #[serde(default)]
        reply_to: Option<String>,
    },
    ParticipantUpdated {
        #[serde(flatten)]
        common: Common,
        #[serde(default)]
        is_muted: Option<bool>,
        #[serde(default)]
        is_video_off: Option<bool>,
        #[serde(default)]
        is_hand_raised: Option<bool>,
    },
    RaiseHand {
        #[serde(flatten)]
        common: Common,
    },
    LowerHand {
        #[serde(flatten)]
        common: Common,
    },

    // --- inbound: moderator policy ---
    ModeratorAction {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        action: ModeratorActionKind,
    },
    RoomLocked {
        #[serde(flatten)]
        common: Common,
        #[serde(default)]
        locked_by: Option<String>,
    },
    RoomUnlocked {
        #[serde(flatten)]
        common: Common,
        #[serde(default)]
        unlocked_by: Option<String>,
    },
    AdmitUser {
        #[serde(flatten)]
        common: Common,
        target_id: String,
    },
    RejectUser {
        #[serde(flatten)]
        common: Common,
        target_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    // --- outbound only ---
    ParticipantJoined {
        #[serde(flatten)]
        common: Common,
        name: String,
        is_moderator: bool,
        is_muted: bool,
        is_video_off: bool,
    },
    ParticipantLeft {
        #[serde(flatten)]
        common: Common,
    },
    WaitingRoom {
        #[serde(flatten)]
        common: Common,
        name: String,
    },
    Error {
        #[serde(flatten)]
        common: Common,
        message: String,
        #[serde(default)]
        code: Option<ErrorCode>,
    },
}

impl Message {
    /// The `Common` envelope fields shared by every variant.
    pub fn common(&self) -> &Common {
        match self {
            Message::Join { common, .. }
            | Message::Leave { common }
            | Message::Offer { common, .. }
            | Message::Answer { common, .. }
            | Message::IceCandidate { common, .. }
            | Message::FileOffer { common, .. }
            | Message::FileAnswer { common, .. }
            | Message::FileChunk { common, .. }
            | Message::QualityChange { common, .. }
            | Message::Chat { common, .. }
            | Message::ParticipantUpdated { common, .. }
            | Message::RaiseHand { common }
            | Message::LowerHand { common }
            | Message::ModeratorAction { common, .. }
            | Message::RoomLocked { common, .. }
            | Message::RoomUnlocked { common, .. }
            | Message::AdmitUser { common, .. }
            | Message::RejectUser { common, .. }
            | Message::ParticipantJoined { common, .. }
            | Message::ParticipantLeft { common }
            | Message::WaitingRoom { common, .. }
            | Message::Error { common, .. } => common,
        }
    }

    /// Mutable access to the envelope fields, used by the dispatcher to
    /// rewrite `participantId` to the server-known sender id before
    /// relaying or broadcasting.
    pub fn common_mut(&mut self) -> &mut Common {
        match self {
            Message::Join { common, .. }
            | Message::Leave { common }
            | Message::Offer { common, .. }
            | Message::Answer { common, .. }
            | Message::IceCandidate { common, .. }
            | Message::FileOffer { common, .. }
            | Message::FileAnswer { common, .. }
            | Message::FileChunk { common, .. }
            | Message::QualityChange { common, .. }
            | Message::Chat { common, .. }
            | Message::ParticipantUpdated { common, .. }
            | Message::RaiseHand { common }
            | Message::LowerHand { common }
            | Message::ModeratorAction { common, .. }
            | Message::RoomLocked { common, .. }
            | Message::RoomUnlocked { common, .. }
            | Message::AdmitUser { common, .. }
            | Message::RejectUser { common, .. }
            | Message::ParticipantJoined { common, .. }
            | Message::ParticipantLeft { common }
            | Message::WaitingRoom { common, .. }
            | Message::Error { common, .. } => common,
        }
    }
}
