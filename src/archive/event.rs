//! Events that can be archived
//!
//! Anything serializable that knows its id and creation instant can be
//! archived. `AuditEvent` is the stock record for callers without their
//! own event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An event the archive can key and store
///
/// The serialized JSON is what gets hashed, so `Serialize` must be
/// deterministic for equal values (no `HashMap` fields).
pub trait ArchivableEvent: Serialize {
    fn event_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

/// A generic audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub created: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(id: impl Into<String>, created: DateTime<Utc>, action: impl Into<String>) -> Self {
        AuditEvent {
            id: id.into(),
            created,
            action: action.into(),
            source: None,
            target: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl ArchivableEvent for AuditEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created
    }
}
