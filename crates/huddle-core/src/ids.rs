use rand::distributions::{Alphanumeric, Distribution};
use rand::Rng;

/// Alphabet for room codes: uppercase alphanumeric, excluding characters
/// that are easy to mis-key or mis-read (`0`/`O`, `1`/`I`).
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 6;
const CREATOR_TOKEN_LEN: usize = 32;

/// Mint a fresh, server-assigned participant (or waiting-participant) id.
///
/// UUIDv4 is unguessable and stable for the lifetime of the connection, as
/// spec.md §9 requires.
pub fn new_participant_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mint a fresh 6-character uppercase alphanumeric room code.
pub fn new_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Mint a fresh unguessable creator token for a pre-created room.
pub fn new_creator_token() -> String {
    Alphanumeric
        .sample_iter(rand::thread_rng())
        .take(CREATOR_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Case-normalize a room id the way `Room::id` is stored and looked up by.
pub fn normalize_room_id(id: &str) -> String {
    id.trim().to_uppercase()
}
