//! Random identifiers and display names.

use crate::session::{PlayerId, SessionId};
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated session id.
pub const SESSION_ID_LEN: usize = 6;

const ADJECTIVES: [&str; 10] = [
    "Silent", "Swift", "Brave", "Clever", "Gentle", "Sharp", "Calm", "Wild", "Proud", "Bold",
];
const NOUNS: [&str; 10] = [
    "Hawk", "Wolf", "Fox", "Eagle", "Lion", "Tiger", "Bear", "Deer", "Owl", "Raven",
];

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// A fresh short session id, six lowercase base-36 characters.
pub fn generate_session_id() -> SessionId {
    SessionId::new(random_base36(SESSION_ID_LEN))
}

/// A fresh player id, `player_` followed by twelve base-36 characters.
pub fn generate_player_id() -> PlayerId {
    PlayerId::new(format!("player_{}", random_base36(12)))
}

/// A friendly display name such as `SwiftOwl417`.
pub fn generate_display_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    format!("{}{}{}", adjective, noun, rng.gen_range(0..1000))
}

/// Short, shareable form of a session id: first six characters, uppercased.
pub fn format_session_id(id: &SessionId) -> String {
    id.as_str().chars().take(SESSION_ID_LEN).collect::<String>().to_uppercase()
}
