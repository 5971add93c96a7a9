//! Range Scanner Tests
//!
//! Granularity selection and exhaustiveness of date-range scans over a
//! populated archive.

use audit_archive::archive::{
    AuditArchive, AuditEvent, InMemoryBlobStore, KeyCodec, RangeScanner, ScanGranularity,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;

const TENANT: &str = "53ff8153-7456-43ff-b9b4-e5deaeac5f09";
const NEIGHBOR: &str = "53ff8153-7456-43ff-b9b4-e5deaeac5f0a";

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Archive one event per day starting at `start`, at 12:34 UTC
async fn archive_daily(
    archive: &AuditArchive<InMemoryBlobStore>,
    tenant: &str,
    start: DateTime<Utc>,
    days: i64,
) -> Vec<String> {
    let mut keys = Vec::new();
    for i in 0..days {
        let created = start + Duration::days(i) + Duration::hours(12) + Duration::minutes(34);
        let event = AuditEvent::new(format!("evt-{}", i), created, "DAILY_SYNC");
        keys.push(archive.put(tenant, &event).await.unwrap().key);
    }
    keys
}

fn setup() -> (RangeScanner<InMemoryBlobStore>, AuditArchive<InMemoryBlobStore>) {
    // Small pages so scans have to follow continuation tokens
    let store = Arc::new(InMemoryBlobStore::with_page_size(7));
    (RangeScanner::new(store.clone()), AuditArchive::new(store))
}

#[tokio::test]
async fn test_month_range_uses_hour_scan() {
    let (scanner, archive) = setup();
    archive_daily(&archive, TENANT, utc(2011, 3, 1, 0, 0), 31).await;

    let mut matches = Vec::new();
    let stats = scanner
        .for_each_key_in_range(TENANT, &utc(2011, 3, 1, 0, 0), &utc(2011, 3, 31, 23, 59), |k| {
            matches.push(k.to_string())
        })
        .await
        .unwrap();

    assert_eq!(stats.granularity, Some(ScanGranularity::Hour));
    assert_eq!(stats.prefixes_scanned, 31 * 24);
    assert!(matches.len() >= 31);
    assert_eq!(stats.keys_visited, matches.len() as u64);
}

#[tokio::test]
async fn test_multi_month_range_uses_day_scan() {
    let (scanner, archive) = setup();
    let written = archive_daily(&archive, TENANT, utc(2011, 3, 1, 0, 0), 100).await;

    let mut matches = Vec::new();
    let stats = scanner
        .for_each_key_in_range(TENANT, &utc(2011, 2, 1, 0, 0), &utc(2011, 6, 30, 23, 59), |k| {
            matches.push(k.to_string())
        })
        .await
        .unwrap();

    assert_eq!(stats.granularity, Some(ScanGranularity::Day));
    assert_eq!(matches.len(), 100);

    let matched: HashSet<_> = matches.into_iter().collect();
    let expected: HashSet<_> = written.into_iter().collect();
    assert_eq!(matched, expected);
}

#[tokio::test]
async fn test_scan_never_crosses_tenants() {
    let (scanner, archive) = setup();
    archive_daily(&archive, TENANT, utc(2011, 3, 1, 0, 0), 5).await;
    // Tenant id sharing all but the last character
    archive_daily(&archive, NEIGHBOR, utc(2011, 3, 1, 0, 0), 5).await;

    let mut matches = Vec::new();
    scanner
        .for_each_key_in_range(TENANT, &utc(2011, 3, 1, 0, 0), &utc(2011, 3, 10, 0, 0), |k| {
            matches.push(k.to_string())
        })
        .await
        .unwrap();

    assert_eq!(matches.len(), 5);
    assert!(matches.iter().all(|k| k.starts_with(&format!("{}/", TENANT))));
}

#[tokio::test]
async fn test_hour_scan_over_returns_within_edge_hours() {
    let (scanner, archive) = setup();
    // 12:34 on 2011-03-05 lies outside 12:40..13:00 but inside the 12:00 hour
    archive_daily(&archive, TENANT, utc(2011, 3, 5, 0, 0), 1).await;

    let mut visits = 0;
    scanner
        .for_each_key_in_range(TENANT, &utc(2011, 3, 5, 12, 40), &utc(2011, 3, 5, 13, 0), |_| {
            visits += 1
        })
        .await
        .unwrap();

    assert_eq!(visits, 1);
}

#[tokio::test]
async fn test_from_after_to_is_empty_not_error() {
    let (scanner, archive) = setup();
    archive_daily(&archive, TENANT, utc(2011, 3, 1, 0, 0), 3).await;

    let mut visits = 0;
    let stats = scanner
        .for_each_key_in_range(TENANT, &utc(2011, 4, 1, 0, 0), &utc(2011, 3, 1, 0, 0), |_| {
            visits += 1
        })
        .await
        .unwrap();

    assert_eq!(visits, 0);
    assert_eq!(stats.prefixes_scanned, 0);
}

#[tokio::test]
async fn test_empty_tenant_is_invalid() {
    let (scanner, _archive) = setup();
    let result = scanner
        .for_each_key_in_range("", &utc(2011, 3, 1, 0, 0), &utc(2011, 3, 2, 0, 0), |_| {})
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_scanned_keys_resolve_to_envelopes() {
    let (scanner, archive) = setup();
    archive_daily(&archive, TENANT, utc(2011, 3, 1, 0, 0), 10).await;

    let mut keys = Vec::new();
    let visited = scanner
        .for_each_key_with_prefix(&KeyCodec::tenant_prefix(TENANT), |k| keys.push(k.to_string()))
        .await
        .unwrap();
    assert_eq!(visited, 10);

    for key in keys {
        let envelope = archive.get_by_key(&key).await.unwrap().unwrap();
        assert_eq!(envelope.tenant_id, TENANT);
        assert!(envelope.verify());
        let event: AuditEvent = envelope.event().unwrap();
        assert_eq!(event.action, "DAILY_SYNC");
    }
}
