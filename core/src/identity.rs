/// Message identity derivation
///
/// The same logical message must map to the same id whether it is built from
/// the optimistic local copy or from the server echo, so ids are computed from
/// payload fields only.
use crate::transport::ChatPayload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// How the text component of a message id is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    /// `abs(hash(text))` with the 31-polynomial string hash. Collision-prone.
    #[default]
    Legacy,
    /// First 16 hex chars of SHA-256 over sender, timestamp and text
    Digest,
}

impl FromStr for IdScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(IdScheme::Legacy),
            "digest" => Ok(IdScheme::Digest),
            other => Err(format!("unknown id scheme: {}", other)),
        }
    }
}

impl IdScheme {
    /// Derive `sender-timestamp-suffix` for a payload
    pub fn message_id(&self, payload: &ChatPayload) -> String {
        derive_id(*self, &payload.sender_id, payload.timestamp, &payload.text)
    }
}

/// Derive a message id from its identifying fields
pub fn derive_id(scheme: IdScheme, sender_id: &str, timestamp: i64, text: &str) -> String {
    match scheme {
        IdScheme::Legacy => format!(
            "{}-{}-{}",
            sender_id,
            timestamp,
            string_hash(text).unsigned_abs()
        ),
        IdScheme::Digest => {
            let mut hasher = Sha256::new();
            hasher.update(sender_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(timestamp.to_be_bytes());
            hasher.update([0u8]);
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
            format!("{}-{}-{}", sender_id, timestamp, hex)
        }
    }
}

/// 31-polynomial hash over UTF-16 code units with i32 wraparound.
/// Stable across processes and platforms.
pub fn string_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_known_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("hello"), 99162322);
        assert_eq!(string_hash("time"), 3560141);
        assert_eq!(string_hash("é"), 233);
    }

    #[test]
    fn test_legacy_id_format() {
        assert_eq!(
            derive_id(IdScheme::Legacy, "alice", 42, "hello"),
            "alice-42-99162322"
        );
        // i32::MIN has no positive i32 counterpart
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
        assert_eq!(
            derive_id(IdScheme::Legacy, "a", 1, "polygenelubricants"),
            "a-1-2147483648"
        );
    }

    #[test]
    fn test_digest_id_stable_and_distinct() {
        let a = derive_id(IdScheme::Digest, "alice", 42, "hello");
        let b = derive_id(IdScheme::Digest, "alice", 42, "hello");
        let c = derive_id(IdScheme::Digest, "alice", 42, "hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("alice-42-"));
        assert_eq!(a.len(), "alice-42-".len() + 16);
    }

    #[test]
    fn test_payload_and_echo_share_id() {
        let payload = ChatPayload::user_message("c1", "hi", "alice", 7);
        let echo = ChatPayload::from_json(&payload.to_json().unwrap()).unwrap();
        for scheme in [IdScheme::Legacy, IdScheme::Digest] {
            assert_eq!(scheme.message_id(&payload), scheme.message_id(&echo));
        }
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("Digest".parse::<IdScheme>(), Ok(IdScheme::Digest));
        assert_eq!("legacy".parse::<IdScheme>(), Ok(IdScheme::Legacy));
        assert!("md5".parse::<IdScheme>().is_err());
    }
}
