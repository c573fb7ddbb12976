/// Errors the room registry can return. These are internal to
/// `huddle-core`; `huddle-server` maps them onto the wire-level error
/// taxonomy of spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,
    #[error("room not found")]
    NoSuchRoom,
    #[error("participant not found in waiting room")]
    NoSuchWaitingParticipant,
    #[error("room id is already taken")]
    RoomIdTaken,
    #[error("server has reached its pre-created room capacity")]
    LatentCapacityReached,
}
