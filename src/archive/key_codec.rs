//! Key encoding for archived audit events
//!
//! Every event is addressed by a hierarchical, time-partitioned key:
//!
//! Key format: `<tenant_id>/<yyyy>/<MM>/<dd>/<HH>/<mm>/<event_id>`
//!
//! Example:
//! - `53ff8153-7456-43ff-b9b4-e5deaeac5f09/2021/08/19/12/53/f54b489527e04318be593594d57ae4e1`
//!
//! All date parts are UTC and zero padded. The key is the sole identity of a
//! stored record.

use super::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// Number of `/`-separated segments in a well-formed key
pub const KEY_SEGMENTS: usize = 7;
const TENANT_SEGMENT: usize = 0;
const EVENT_SEGMENT: usize = 6;

/// Shortest string accepted as a tenant UUID by destructive operations
pub const MIN_TENANT_ID_LEN: usize = 36;

/// Identity of an archived event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchivedEventKey {
    tenant_id: String,
    created_at: DateTime<Utc>,
    event_id: String,
}

impl ArchivedEventKey {
    pub fn new<Tz: TimeZone>(
        tenant_id: &str,
        created_at: &DateTime<Tz>,
        event_id: &str,
    ) -> ArchiveResult<Self> {
        KeyCodec::validate(tenant_id, event_id)?;
        Ok(ArchivedEventKey {
            tenant_id: tenant_id.to_string(),
            created_at: created_at.with_timezone(&Utc),
            event_id: event_id.to_string(),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Serialize to the store path
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.tenant_id,
            KeyCodec::date_path(&self.created_at),
            self.event_id
        )
    }
}

impl std::fmt::Display for ArchivedEventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Components recovered from a key string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub tenant_id: String,
    /// `yyyy/MM/dd/HH/mm`
    pub date_path: String,
    pub event_id: String,
}

impl DecodedKey {
    /// Parse the date path back into the minute the event was created in
    pub fn created_at_minute(&self) -> ArchiveResult<DateTime<Utc>> {
        let malformed = || ArchiveError::MalformedKey(self.date_path.clone());
        let parts: Vec<u32> = self
            .date_path
            .split('/')
            .map(|p| p.parse::<u32>().map_err(|_| malformed()))
            .collect::<ArchiveResult<_>>()?;
        if parts.len() != 5 {
            return Err(malformed());
        }
        Utc.with_ymd_and_hms(parts[0] as i32, parts[1], parts[2], parts[3], parts[4], 0)
            .single()
            .ok_or_else(malformed)
    }
}

/// Encodes and decodes archive keys and scan prefixes
pub struct KeyCodec;

impl KeyCodec {
    /// Encode an event identity into its store key
    pub fn encode<Tz: TimeZone>(
        tenant_id: &str,
        created_at: &DateTime<Tz>,
        event_id: &str,
    ) -> ArchiveResult<String> {
        Ok(ArchivedEventKey::new(tenant_id, created_at, event_id)?.path())
    }

    /// Format `yyyy/MM/dd/HH/mm` for the given instant, in UTC
    pub fn date_path<Tz: TimeZone>(created_at: &DateTime<Tz>) -> String {
        let utc = created_at.with_timezone(&Utc);
        format!(
            "{:04}/{:02}/{:02}/{:02}/{:02}",
            utc.year(),
            utc.month(),
            utc.day(),
            utc.hour(),
            utc.minute()
        )
    }

    /// Prefix covering every event of a tenant
    pub fn tenant_prefix(tenant_id: &str) -> String {
        format!("{}/", tenant_id)
    }

    /// Format: `<tenant_id>/<yyyy>/<MM>/<dd>/`
    pub fn day_prefix(tenant_id: &str, year: i32, month: u32, day: u32) -> String {
        format!("{}/{:04}/{:02}/{:02}/", tenant_id, year, month, day)
    }

    /// Format: `<tenant_id>/<yyyy>/<MM>/<dd>/<HH>/`
    pub fn hour_prefix(tenant_id: &str, year: i32, month: u32, day: u32, hour: u32) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{:02}/",
            tenant_id, year, month, day, hour
        )
    }

    /// Decode a key back to components
    pub fn decode(key: &str) -> ArchiveResult<DecodedKey> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != KEY_SEGMENTS {
            return Err(ArchiveError::MalformedKey(key.to_string()));
        }

        Ok(DecodedKey {
            tenant_id: parts[TENANT_SEGMENT].to_string(),
            date_path: parts[TENANT_SEGMENT + 1..EVENT_SEGMENT].join("/"),
            event_id: parts[EVENT_SEGMENT].to_string(),
        })
    }

    /// Sanity check that a tenant id resembles a UUID before anything
    /// destructive is done with its prefix
    pub fn is_plausible_tenant_id(tenant_id: &str) -> bool {
        tenant_id.len() >= MIN_TENANT_ID_LEN
    }

    fn validate(tenant_id: &str, event_id: &str) -> ArchiveResult<()> {
        if tenant_id.is_empty() {
            return Err(ArchiveError::InvalidArgument(
                "a tenant id is required".to_string(),
            ));
        }
        if event_id.is_empty() {
            return Err(ArchiveError::InvalidArgument(
                "an event id is required".to_string(),
            ));
        }
        // A separator inside either id would shift every segment after it
        for (name, id) in [("tenant", tenant_id), ("event", event_id)] {
            if id.contains('/') {
                return Err(ArchiveError::InvalidArgument(format!(
                    "{} id must not contain '/': {}",
                    name, id
                )));
            }
        }
        Ok(())
    }
}
