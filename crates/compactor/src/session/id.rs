//! Session identifier derivation: the same conversation must map to the
//! same id even if the client rewrites system prompts or intermediate
//! tool calls between turns, so only the first user message is hashed.

use serde_json::Value;
use sha2::{Digest, Sha256};

const ID_LEN: usize = 16;

/// Primary derivation: hash the first `role: "user"` message,
/// canonicalized by re-serializing its parsed structure (so whitespace
/// or key-order differences in the wire bytes don't change the id).
/// Returns `None` when no user message is present.
pub fn derive_session_id(messages: &[Value]) -> Option<String> {
    let first_user = messages.iter().find(|m| m.get("role").and_then(Value::as_str) == Some("user"))?;

    let canonical = canonicalize(first_user.get("content").unwrap_or(&Value::Null));
    Some(hash_hex(canonical.as_bytes()))
}

/// Legacy fallback: hash the first `hash_message_count` messages,
/// canonicalized and joined with `|`, used only when both the primary
/// and fuzzy strategies fail to produce an id (e.g. no user message at
/// all, as with some subagent-initiated conversations).
pub fn derive_legacy_session_id(messages: &[Value], hash_message_count: usize) -> String {
    let canonical = messages
        .iter()
        .take(hash_message_count)
        .map(|m| canonicalize(m))
        .collect::<Vec<_>>()
        .join("|");

    hash_hex(canonical.as_bytes())
}

fn canonicalize(value: &Value) -> String {
    // `serde_json::Value` preserves object insertion order from parsing
    // (via the `preserve_order`-independent `Map`), but round-tripping
    // through `to_string` still gives a stable byte sequence for a given
    // parsed structure, which is all the stability guarantee requires.
    serde_json::to_string(value).unwrap_or_default()
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_16_hex_char_id() {
        let messages = vec![json!({"role": "user", "content": "hello there"})];
        let id = derive_session_id(&messages).unwrap();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn is_deterministic() {
        let messages = vec![json!({"role": "user", "content": "hello there"})];
        assert_eq!(derive_session_id(&messages), derive_session_id(&messages));
    }

    #[test]
    fn differs_when_first_user_message_differs() {
        let a = vec![json!({"role": "user", "content": "hello there"})];
        let b = vec![json!({"role": "user", "content": "goodbye now"})];
        assert_ne!(derive_session_id(&a), derive_session_id(&b));
    }

    #[test]
    fn ignores_messages_after_the_first_user_turn() {
        let a = vec![
            json!({"role": "user", "content": "hello there"}),
            json!({"role": "assistant", "content": "hi"}),
        ];
        let b = vec![
            json!({"role": "user", "content": "hello there"}),
            json!({"role": "assistant", "content": "a completely different reply"}),
        ];
        assert_eq!(derive_session_id(&a), derive_session_id(&b));
    }

    #[test]
    fn returns_none_without_a_user_message() {
        let messages = vec![json!({"role": "assistant", "content": "hi"})];
        assert_eq!(derive_session_id(&messages), None);
    }

    #[test]
    fn legacy_fallback_is_deterministic_and_positional() {
        let messages = vec![
            json!({"role": "system", "content": "sys"}),
            json!({"role": "assistant", "content": "hi"}),
        ];
        let a = derive_legacy_session_id(&messages, 3);
        let b = derive_legacy_session_id(&messages, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), ID_LEN);
    }
}
