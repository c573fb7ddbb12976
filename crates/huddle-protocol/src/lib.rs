//! Wire protocol for the Huddle signaling server.
//!
//! Every message crossing the `/ws` socket is a single JSON text frame
//! decoding to [`Message`]. The set of variants is closed: an unrecognized
//! `type` tag or a variant missing a required field fails to decode, and
//! the caller is expected to respond with the generic protocol error
//! envelope rather than propagate a parse error to the client socket.

mod codec;
mod envelope;

pub use codec::{decode, encode, DecodeError};
pub use envelope::{
    Common, ErrorCode, Message, ModeratorActionKind, Quality,
};
