//! Room state and admission logic for the Huddle signaling server.
//!
//! This crate owns everything that doesn't need a socket: the concurrent
//! room registry, the pure admission decision table, and the latent-room
//! persistence layer. `huddle-server` wires this to `axum` and
//! `huddle-protocol`.

pub mod admission;
pub mod error;
pub mod ids;
pub mod janitor;
pub mod latent;
pub mod outbound;
pub mod participant;
pub mod registry;
pub mod room;

pub use admission::{decide, AdmissionDecision};
pub use error::RoomError;
pub use janitor::spawn_room_cleanup;
pub use latent::{LatentRoomRecord, LatentStore};
pub use outbound::{OutboundHandle, WireFrame};
pub use participant::{Participant, ParticipantPatch, WaitingParticipant};
pub use registry::{ParticipantPublic, RemovalOutcome, RoomRegistry};
pub use room::{Room, RoomConfig, DEFAULT_MAX_PARTICIPANTS};
