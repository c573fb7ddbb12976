//! Pure admission decision table (spec.md §4.4), kept free of registry
//! and socket concerns so it can be exhaustively unit tested.

/// The outcome the join handler should act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// No room exists and the joiner carries no host/creator claim.
    RejectRoomNotFound,
    /// The room has a password and the candidate didn't match it.
    RejectInvalidPassword,
    /// No room exists, but the joiner is creating one (`isHost`).
    CreateAndJoinAsHost,
    /// The room exists, is unlocked (or the password matched), and has no
    /// locking concern — join directly as a regular participant.
    AddAsParticipant,
    /// The room is locked and the joiner has no valid creator token —
    /// queue them in the waiting room.
    AddToWaitingRoom,
    /// The room is locked but the joiner's creator token validated —
    /// bypass the lock and join as host-grade moderator.
    BypassLockAsHost,
}

/// Evaluate the join decision table of spec.md §4.4.
///
/// `creator_token_valid` must already reflect whatever the caller decided
/// `validateCreatorToken` returns for an absent token (`false`); this
/// function makes no assumption about how the token was checked.
pub fn decide(
    room_exists: bool,
    password_ok: bool,
    is_locked: bool,
    creator_token_valid: bool,
    is_host_flag: bool,
) -> AdmissionDecision {
    if !room_exists {
        return if is_host_flag || creator_token_valid {
            AdmissionDecision::CreateAndJoinAsHost
        } else {
            AdmissionDecision::RejectRoomNotFound
        };
    }
    if !password_ok {
        return AdmissionDecision::RejectInvalidPassword;
    }
    if !is_locked {
        return AdmissionDecision::AddAsParticipant;
    }
    if creator_token_valid {
        AdmissionDecision::BypassLockAsHost
    } else {
        AdmissionDecision::AddToWaitingRoom
    }
}
