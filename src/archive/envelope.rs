//! Archived event envelope and content hashing
//!
//! The envelope is what readers and writers hand back: the raw JSON payload,
//! the identity decoded from its key, and the integrity facts gathered while
//! reading or writing it.

use super::error::ArchiveResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Metadata entry holding the hex SHA-256 of the payload
pub const CONTENT_HASH_METADATA: &str = "contentHash";
/// Metadata entry holding the writer's org
pub const ORG_METADATA: &str = "org";
/// Metadata entry holding the writer's pod
pub const POD_METADATA: &str = "pod";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Lowercase hex SHA-256 of a payload
pub fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// An archived event plus its integrity metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedEventEnvelope {
    /// Full store key
    pub key: String,
    pub tenant_id: String,
    pub event_id: String,
    /// Raw JSON payload as stored
    pub event_json: String,
    /// Hex SHA-256 of `event_json`
    pub content_hash: String,
    /// Checksum the store assigned (etag), when available
    pub store_checksum: Option<String>,
    /// A put found byte-identical content already stored and skipped the write
    pub already_existed: bool,
    /// A put replaced content whose hash differed
    pub previous_differed: bool,
    /// The stored object had no hash metadata; `content_hash` was computed on read
    pub hash_recomputed: bool,
}

impl ArchivedEventEnvelope {
    /// Parse the payload into a typed event
    pub fn event<T: DeserializeOwned>(&self) -> ArchiveResult<T> {
        Ok(serde_json::from_str(&self.event_json)?)
    }

    /// True when `content_hash` matches the payload
    pub fn verify(&self) -> bool {
        content_hash(self.event_json.as_bytes()) == self.content_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> ArchivedEventEnvelope {
        ArchivedEventEnvelope {
            key: "t/2021/01/01/00/00/e".to_string(),
            tenant_id: "t".to_string(),
            event_id: "e".to_string(),
            event_json: json.to_string(),
            content_hash: content_hash(json.as_bytes()),
            store_checksum: None,
            already_existed: false,
            previous_differed: false,
            hash_recomputed: false,
        }
    }

    #[test]
    fn test_content_hash_known_value() {
        // SHA-256("") from FIPS 180-2
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"{}").len(), 64);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut env = envelope(r#"{"id":"e"}"#);
        assert!(env.verify());

        env.event_json = r#"{"id":"f"}"#.to_string();
        assert!(!env.verify());
    }

    #[test]
    fn test_event_decoding() {
        let env = envelope(r#"{"id":"e","n":3}"#);
        let value: serde_json::Value = env.event().unwrap();
        assert_eq!(value["n"], 3);

        let bad = envelope("not json");
        assert!(bad.event::<serde_json::Value>().is_err());
    }
}
