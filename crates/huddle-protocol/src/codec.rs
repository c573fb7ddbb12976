use crate::envelope::Message;

/// A frame that failed to decode: malformed JSON, an unrecognized `type`,
/// or a variant missing/mistyping a required field. Carries no further
/// detail — per spec.md §4.1 the caller reports a single generic
/// "Invalid message format" error envelope regardless of which of the
/// three decode failures occurred.
#[derive(Debug, thiserror::Error)]
#[error("invalid message format")]
pub struct DecodeError(#[from] serde_json::Error);

/// Decode one text frame into a [`Message`].
///
/// Decoding is total over the closed variant set: anything that isn't a
/// well-formed instance of exactly one known variant is rejected, never
/// partially accepted.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError)
}

/// Encode a [`Message`] to its wire JSON text form.
pub fn encode(msg: &Message) -> String {
    serde_json::to_string(msg).expect("Message serialization is infallible")
}
