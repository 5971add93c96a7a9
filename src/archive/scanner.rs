//! Date-range scans over a tenant's key space
//!
//! A tenant can hold up to 1,440 minute prefixes per day, so scans never go
//! down to minutes. A range inside one UTC month is scanned hour by hour;
//! anything wider is scanned day by day. Both endpoints are truncated to the
//! unit and the walk is inclusive, so results are a superset of the range.

use super::blob_store::{dedup_keys, BlobStore};
use super::error::{ArchiveError, ArchiveResult};
use super::key_codec::KeyCodec;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix unit a range scan steps through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanGranularity {
    Day,
    Hour,
}

impl ScanGranularity {
    /// Hours when both ends fall in the same UTC year and month, else days
    pub fn for_range(from: &DateTime<Utc>, to: &DateTime<Utc>) -> Self {
        if from.year() == to.year() && from.month() == to.month() {
            ScanGranularity::Hour
        } else {
            ScanGranularity::Day
        }
    }

    /// Round down to the start of the unit
    pub fn truncate(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let hour = t
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0));
        let truncated = match self {
            ScanGranularity::Hour => hour,
            ScanGranularity::Day => hour.and_then(|t| t.with_hour(0)),
        };
        // Every field above is zeroed within range, which UTC always accepts
        truncated.unwrap_or(t)
    }

    pub fn step(self) -> chrono::Duration {
        match self {
            ScanGranularity::Day => chrono::Duration::days(1),
            ScanGranularity::Hour => chrono::Duration::hours(1),
        }
    }

    /// Store prefix for the unit starting at `t`
    pub fn prefix(self, tenant_id: &str, t: &DateTime<Utc>) -> String {
        match self {
            ScanGranularity::Day => KeyCodec::day_prefix(tenant_id, t.year(), t.month(), t.day()),
            ScanGranularity::Hour => {
                KeyCodec::hour_prefix(tenant_id, t.year(), t.month(), t.day(), t.hour())
            }
        }
    }
}

/// Lazily yields the prefixes of a range scan, one unit at a time
#[derive(Debug, Clone)]
pub struct ScanPlan {
    tenant_id: String,
    granularity: ScanGranularity,
    /// Next unit to yield; `None` once the walk is done
    cursor: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
}

impl ScanPlan {
    pub fn new<Tz: TimeZone>(tenant_id: &str, from: &DateTime<Tz>, to: &DateTime<Tz>) -> ArchiveResult<Self> {
        if tenant_id.is_empty() {
            return Err(ArchiveError::InvalidArgument(
                "a tenant id is required to scan".to_string(),
            ));
        }
        let from = from.with_timezone(&Utc);
        let to = to.with_timezone(&Utc);
        let granularity = ScanGranularity::for_range(&from, &to);
        let end = granularity.truncate(to);
        let cursor = (from <= to).then(|| granularity.truncate(from));

        Ok(ScanPlan {
            tenant_id: tenant_id.to_string(),
            granularity,
            cursor,
            end,
        })
    }

    /// `None` for an empty range
    pub fn granularity(&self) -> Option<ScanGranularity> {
        self.cursor.map(|_| self.granularity)
    }
}

impl Iterator for ScanPlan {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let cursor = self.cursor.filter(|c| *c <= self.end)?;
        // Stepping past the last representable instant ends the walk
        self.cursor = cursor.checked_add_signed(self.granularity.step());
        Some(self.granularity.prefix(&self.tenant_id, &cursor))
    }
}

/// What a scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// `None` when the range was empty and nothing was listed
    pub granularity: Option<ScanGranularity>,
    pub prefixes_scanned: u64,
    pub keys_visited: u64,
}

/// Walks keys in the blob store by prefix or by date range
pub struct RangeScanner<S: BlobStore + ?Sized> {
    store: Arc<S>,
}

impl<S: BlobStore + ?Sized> Clone for RangeScanner<S> {
    fn clone(&self) -> Self {
        RangeScanner {
            store: self.store.clone(),
        }
    }
}

impl<S: BlobStore + ?Sized> RangeScanner<S> {
    pub fn new(store: Arc<S>) -> Self {
        RangeScanner { store }
    }

    /// Every prefix a range scan would list, in scan order
    pub fn prefixes_for_range<Tz: TimeZone>(
        tenant_id: &str,
        from: &DateTime<Tz>,
        to: &DateTime<Tz>,
    ) -> ArchiveResult<Vec<String>> {
        Ok(ScanPlan::new(tenant_id, from, to)?.collect())
    }

    /// Visit every key of `tenant_id` whose time bucket overlaps
    /// `from..=to`. May visit keys slightly outside the range.
    pub async fn for_each_key_in_range<Tz, F>(
        &self,
        tenant_id: &str,
        from: &DateTime<Tz>,
        to: &DateTime<Tz>,
        mut visitor: F,
    ) -> ArchiveResult<ScanStats>
    where
        Tz: TimeZone,
        F: FnMut(&str),
    {
        let plan = ScanPlan::new(tenant_id, from, to)?;
        let Some(granularity) = plan.granularity() else {
            warn!(
                tenant_id = %tenant_id,
                from = %from.with_timezone(&Utc),
                to = %to.with_timezone(&Utc),
                "Range scan start is after its end, nothing to scan"
            );
            return Ok(ScanStats::default());
        };

        let mut stats = ScanStats {
            granularity: Some(granularity),
            ..ScanStats::default()
        };
        for prefix in plan {
            stats.keys_visited += self.for_each_key_with_prefix(&prefix, &mut visitor).await?;
            stats.prefixes_scanned += 1;
        }

        debug!(
            tenant_id = %tenant_id,
            granularity = ?stats.granularity,
            prefixes = stats.prefixes_scanned,
            keys = stats.keys_visited,
            "Range scan complete"
        );
        Ok(stats)
    }

    /// Visit every key under `prefix` in listing order. Returns the number
    /// of keys visited.
    pub async fn for_each_key_with_prefix<F>(&self, prefix: &str, mut visitor: F) -> ArchiveResult<u64>
    where
        F: FnMut(&str),
    {
        let mut visited = 0u64;
        let mut token: Option<String> = None;
        loop {
            let page = self.store.list(prefix, token.as_deref()).await?;
            for key in dedup_keys(page.objects) {
                visitor(&key);
                visited += 1;
            }
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }
        debug!(prefix = %prefix, keys = visited, "Prefix scan complete");
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::blob_store::{BlobAttributes, InMemoryBlobStore};

    const TENANT: &str = "53ff8153-7456-43ff-b9b4-e5deaeac5f09";

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_granularity_choice() {
        assert_eq!(
            ScanGranularity::for_range(&utc(2011, 3, 1, 0, 0), &utc(2011, 3, 31, 23, 59)),
            ScanGranularity::Hour
        );
        assert_eq!(
            ScanGranularity::for_range(&utc(2011, 3, 31, 23, 0), &utc(2011, 4, 1, 0, 0)),
            ScanGranularity::Day
        );
        // Same month, different year
        assert_eq!(
            ScanGranularity::for_range(&utc(2010, 3, 1, 0, 0), &utc(2011, 3, 1, 0, 0)),
            ScanGranularity::Day
        );
    }

    #[test]
    fn test_truncate() {
        let t = Utc.with_ymd_and_hms(2011, 3, 9, 17, 45, 12).unwrap();
        assert_eq!(ScanGranularity::Hour.truncate(t), utc(2011, 3, 9, 17, 0));
        assert_eq!(ScanGranularity::Day.truncate(t), utc(2011, 3, 9, 0, 0));
    }

    #[test]
    fn test_prefixes_hourly_inclusive() {
        let prefixes = RangeScanner::<InMemoryBlobStore>::prefixes_for_range(
            TENANT,
            &utc(2011, 3, 9, 22, 30),
            &utc(2011, 3, 10, 1, 5),
        )
        .unwrap();

        assert_eq!(
            prefixes,
            vec![
                format!("{}/2011/03/09/22/", TENANT),
                format!("{}/2011/03/09/23/", TENANT),
                format!("{}/2011/03/10/00/", TENANT),
                format!("{}/2011/03/10/01/", TENANT),
            ]
        );
    }

    #[test]
    fn test_prefixes_daily_across_months() {
        let prefixes = RangeScanner::<InMemoryBlobStore>::prefixes_for_range(
            TENANT,
            &utc(2011, 2, 27, 12, 0),
            &utc(2011, 3, 2, 0, 0),
        )
        .unwrap();

        assert_eq!(prefixes.len(), 4);
        assert_eq!(prefixes[0], format!("{}/2011/02/27/", TENANT));
        assert_eq!(prefixes[3], format!("{}/2011/03/02/", TENANT));
    }

    #[test]
    fn test_prefixes_empty_tenant_rejected() {
        let result = RangeScanner::<InMemoryBlobStore>::prefixes_for_range(
            "",
            &utc(2011, 3, 1, 0, 0),
            &utc(2011, 3, 2, 0, 0),
        );
        assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_from_after_to_visits_nothing() {
        let store = Arc::new(InMemoryBlobStore::new());
        store
            .put(&format!("{}/2011/03/01/00/00/e", TENANT), b"{}", &BlobAttributes::default())
            .await
            .unwrap();
        let scanner = RangeScanner::new(store);

        let mut visits = 0;
        let stats = scanner
            .for_each_key_in_range(TENANT, &utc(2011, 3, 2, 0, 0), &utc(2011, 3, 1, 0, 0), |_| {
                visits += 1
            })
            .await
            .unwrap();

        assert_eq!(visits, 0);
        assert_eq!(stats, ScanStats::default());
    }

    #[tokio::test]
    async fn test_prefix_scan_follows_pagination() {
        let store = Arc::new(InMemoryBlobStore::with_page_size(3));
        for i in 0..10 {
            store
                .put(&format!("{}/2011/03/01/00/{:02}/e{}", TENANT, i, i), b"{}", &BlobAttributes::default())
                .await
                .unwrap();
        }
        let scanner = RangeScanner::new(store);

        let mut keys = Vec::new();
        let visited = scanner
            .for_each_key_with_prefix(&KeyCodec::tenant_prefix(TENANT), |k| keys.push(k.to_string()))
            .await
            .unwrap();

        assert_eq!(visited, 10);
        assert_eq!(keys.len(), 10);
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_scan_ending_at_last_representable_instant() {
        let store = Arc::new(InMemoryBlobStore::new());
        let scanner = RangeScanner::new(store);
        let to = DateTime::<Utc>::MAX_UTC;
        let from = to - chrono::Duration::days(40);

        let mut visits = 0;
        let stats = scanner
            .for_each_key_in_range(TENANT, &from, &to, |_| visits += 1)
            .await
            .unwrap();

        assert_eq!(visits, 0);
        assert_eq!(stats.granularity, Some(ScanGranularity::Day));
        assert_eq!(stats.prefixes_scanned, 41);

        // Hour walk inside the final month stops on the last hour
        let from = ScanGranularity::Hour.truncate(to) - chrono::Duration::hours(2);
        let prefixes = RangeScanner::<InMemoryBlobStore>::prefixes_for_range(TENANT, &from, &to).unwrap();
        assert_eq!(prefixes.len(), 3);
        assert_eq!(
            prefixes.last(),
            Some(&ScanGranularity::Hour.prefix(TENANT, &to))
        );
    }

    #[test]
    fn test_scan_plan_is_lazy() {
        let mut plan = ScanPlan::new(TENANT, &utc(1, 1, 1, 0, 0), &utc(9999, 12, 31, 0, 0)).unwrap();
        assert_eq!(plan.granularity(), Some(ScanGranularity::Day));
        assert_eq!(plan.next(), Some(format!("{}/0001/01/01/", TENANT)));
        assert_eq!(plan.next(), Some(format!("{}/0001/01/02/", TENANT)));

        let empty = ScanPlan::new(TENANT, &utc(2011, 3, 2, 0, 0), &utc(2011, 3, 1, 0, 0)).unwrap();
        assert_eq!(empty.granularity(), None);
        assert_eq!(empty.count(), 0);
    }
}
