//! Tenant Deletion Queue and Worker
//!
//! Purging a long-lived tenant can take hours, far longer than any request
//! handler may run. Requests are therefore persisted in the archive's own
//! blob store and retired by a background worker:
//!
//! ```text
//! enqueue(tenant) ──► put _toDeleteQueue/<tenant> ──► signal (coalesced)
//!                                                        │
//!                      DeletionWorker ◄──────────────────┘
//!                        list _toDeleteQueue/
//!                        per tenant: purge <tenant>/ twice, delete marker
//! ```
//!
//! The marker is removed only after every purge pass succeeds, so a crash
//! at any point leaves it behind and the next cycle restarts that tenant
//! from scratch. Runs never overlap.

use super::blob_store::{dedup_keys, BlobAttributes, BlobStore};
use super::config::{ArchiveConfig, DeletionConfig, MIN_PURGE_PASSES};
use super::error::{ArchiveError, ArchiveResult};
use super::key_codec::{KeyCodec, MIN_TENANT_ID_LEN};
use super::tenant::AuditTenantAttributes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Store prefix holding one entry per tenant awaiting deletion
pub const DELETE_QUEUE_PREFIX: &str = "_toDeleteQueue/";

const QUEUE_ENTRY_CONTENT_TYPE: &str = "text/plain";

/// Commands that need a reply; plain run requests travel on the signal channel
const COMMAND_CHANNEL_CAPACITY: usize = 8;

fn refuse_tenant_id(tenant_id: &str, action: &str) -> ArchiveError {
    error!(tenant_id = %tenant_id, "Refusing to {} for non-UUID tenant id", action);
    ArchiveError::InvalidArgument(format!(
        "tenant id must be at least {} characters: [{}]",
        MIN_TENANT_ID_LEN, tenant_id
    ))
}

// ============================================================================
// TenantPurger - tenant-wide prefix delete
// ============================================================================

/// Result of one tenant-wide delete pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Bulk delete requests issued
    pub pages: u64,
    pub keys_deleted: u64,
}

impl PurgeStats {
    fn absorb(&mut self, other: PurgeStats) {
        self.pages += other.pages;
        self.keys_deleted += other.keys_deleted;
    }
}

/// Deletes every key under a tenant's prefix in fixed-size bulk pages
pub struct TenantPurger<S: BlobStore + ?Sized> {
    store: Arc<S>,
    page_size: usize,
}

impl<S: BlobStore + ?Sized> TenantPurger<S> {
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        TenantPurger {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Delete every object under `<tenant_id>/`.
    ///
    /// Refuses tenant ids shorter than a UUID before touching the store: a
    /// short id is a short prefix, and a short prefix could match other
    /// tenants.
    pub async fn delete_audit_events_for_tenant(&self, tenant_id: &str) -> ArchiveResult<PurgeStats> {
        if !KeyCodec::is_plausible_tenant_id(tenant_id) {
            return Err(refuse_tenant_id(tenant_id, "delete all objects"));
        }

        let prefix = KeyCodec::tenant_prefix(tenant_id);
        let mut stats = PurgeStats::default();
        match self.purge_prefix(&prefix, &mut stats).await {
            Ok(()) => {
                info!(
                    tenant_id = %tenant_id,
                    keys_deleted = stats.keys_deleted,
                    pages = stats.pages,
                    "Deleted audit events for tenant"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(
                    tenant_id = %tenant_id,
                    keys_deleted = stats.keys_deleted,
                    error = %e,
                    "Tenant delete pass stopped early"
                );
                Err(e)
            }
        }
    }

    async fn purge_prefix(&self, prefix: &str, stats: &mut PurgeStats) -> ArchiveResult<()> {
        let mut batch: Vec<String> = Vec::with_capacity(self.page_size);
        let mut token: Option<String> = None;

        loop {
            let page = self.store.list(prefix, token.as_deref()).await?;
            for key in dedup_keys(page.objects) {
                batch.push(key);
                if batch.len() >= self.page_size {
                    self.delete_page(prefix, &mut batch, stats).await?;
                }
            }
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }

        if !batch.is_empty() {
            self.delete_page(prefix, &mut batch, stats).await?;
        }
        Ok(())
    }

    async fn delete_page(
        &self,
        prefix: &str,
        batch: &mut Vec<String>,
        stats: &mut PurgeStats,
    ) -> ArchiveResult<()> {
        let keys = std::mem::replace(batch, Vec::with_capacity(self.page_size));
        let result = self.store.bulk_delete(&keys).await?;
        stats.pages += 1;
        stats.keys_deleted += result.deleted.len() as u64;

        if !result.is_complete() {
            error!(
                prefix = %prefix,
                requested = keys.len(),
                deleted = result.deleted.len(),
                "Partial bulk delete"
            );
            return Err(ArchiveError::PartialDelete {
                prefix: prefix.to_string(),
                requested: keys.len(),
                deleted: result.deleted.len(),
                failed_keys: result.failed.into_iter().map(|(k, _)| k).collect(),
            });
        }

        debug!(prefix = %prefix, deleted = keys.len(), total = stats.keys_deleted, "Deleted page");
        Ok(())
    }
}

// ============================================================================
// DeletionQueue - durable pending-deletion records
// ============================================================================

/// Outcome of one worker cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tenants fully purged and removed from the queue
    pub purged: Vec<String>,
    /// Tenants whose purge failed; their entries stay queued
    pub failed: Vec<(String, String)>,
    /// Entries refused for not looking like a tenant UUID
    pub skipped: Vec<String>,
    pub keys_deleted: u64,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pending tenant deletions, persisted under `_toDeleteQueue/`
pub struct DeletionQueue<S: BlobStore + ?Sized> {
    store: Arc<S>,
    purger: TenantPurger<S>,
    purge_passes: u32,
    bucket: String,
}

impl<S: BlobStore + ?Sized> DeletionQueue<S> {
    pub fn new(store: Arc<S>, config: &ArchiveConfig) -> Self {
        DeletionQueue {
            purger: TenantPurger::new(store.clone(), config.deletion.page_size),
            store,
            purge_passes: config.deletion.purge_passes.max(MIN_PURGE_PASSES),
            bucket: config.bucket.clone(),
        }
    }

    /// Format: `_toDeleteQueue/<tenant_id>`
    pub fn queue_key(tenant_id: &str) -> String {
        format!("{}{}", DELETE_QUEUE_PREFIX, tenant_id)
    }

    pub fn purger(&self) -> &TenantPurger<S> {
        &self.purger
    }

    /// Persist a deletion request. Does not schedule a run; see
    /// `DeletionWorkerHandle::enqueue`.
    pub async fn persist_request(&self, tenant_id: &str) -> ArchiveResult<()> {
        if !KeyCodec::is_plausible_tenant_id(tenant_id) {
            return Err(refuse_tenant_id(tenant_id, "enqueue deletion"));
        }

        let attributes = BlobAttributes::with_content_type(QUEUE_ENTRY_CONTENT_TYPE);
        self.store
            .put(&Self::queue_key(tenant_id), tenant_id.as_bytes(), &attributes)
            .await?;
        info!(tenant_id = %tenant_id, "Queued tenant for audit event deletion");
        Ok(())
    }

    pub async fn is_pending(&self, tenant_id: &str) -> ArchiveResult<bool> {
        Ok(self.store.exists(&Self::queue_key(tenant_id)).await?)
    }

    /// Audit facts for a tenant, for merging into an `AuditTenantRecord`
    pub async fn audit_attributes(&self, tenant_id: &str) -> ArchiveResult<AuditTenantAttributes> {
        Ok(AuditTenantAttributes {
            archive_bucket: self.bucket.clone(),
            deletion_pending: self.is_pending(tenant_id).await?,
        })
    }

    /// Tenant ids with a well-formed pending request
    pub async fn pending_tenants(&self) -> ArchiveResult<Vec<String>> {
        let mut entries = self.list_entries().await?;
        entries.retain(|t| KeyCodec::is_plausible_tenant_id(t));
        Ok(entries)
    }

    /// Every queue entry name, excluding the folder marker itself
    async fn list_entries(&self) -> ArchiveResult<Vec<String>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.store.list(DELETE_QUEUE_PREFIX, token.as_deref()).await?;
            entries.extend(
                dedup_keys(page.objects)
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(DELETE_QUEUE_PREFIX).map(str::to_string))
                    .filter(|t| !t.is_empty()),
            );
            token = page.continuation_token;
            if token.is_none() {
                break;
            }
        }
        Ok(entries)
    }

    /// Purge one tenant with every configured pass, then drop its entry.
    /// The repeat pass catches events still arriving from other writers.
    pub async fn purge_tenant(&self, tenant_id: &str) -> ArchiveResult<PurgeStats> {
        if !KeyCodec::is_plausible_tenant_id(tenant_id) {
            return Err(refuse_tenant_id(tenant_id, "purge"));
        }

        info!(tenant_id = %tenant_id, "Starting audit event deletion for tenant");
        let started = Instant::now();

        let mut total = PurgeStats::default();
        for pass in 1..=self.purge_passes {
            let stats = self.purger.delete_audit_events_for_tenant(tenant_id).await?;
            debug!(tenant_id = %tenant_id, pass, keys_deleted = stats.keys_deleted, "Purge pass done");
            total.absorb(stats);
        }

        self.store.delete(&Self::queue_key(tenant_id)).await?;
        info!(
            tenant_id = %tenant_id,
            keys_deleted = total.keys_deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completed audit event deletion for tenant"
        );
        Ok(total)
    }

    /// One worker cycle over every queued tenant, one tenant at a time.
    /// A failing tenant is reported and left queued; the cycle moves on.
    pub async fn run_once(&self) -> ArchiveResult<DrainReport> {
        info!("Starting audit event deletion worker cycle");
        let mut report = DrainReport::default();

        for tenant_id in self.list_entries().await? {
            if !KeyCodec::is_plausible_tenant_id(&tenant_id) {
                error!(tenant_id = %tenant_id, "Refusing to delete all objects for non-UUID tenant id");
                report.skipped.push(tenant_id);
                continue;
            }

            match self.purge_tenant(&tenant_id).await {
                Ok(stats) => {
                    report.keys_deleted += stats.keys_deleted;
                    report.purged.push(tenant_id);
                }
                Err(e) => {
                    error!(tenant_id = %tenant_id, error = %e, "Tenant purge failed, entry stays queued");
                    report.failed.push((tenant_id, e.to_string()));
                }
            }
        }

        info!(
            purged = report.purged.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            keys_deleted = report.keys_deleted,
            "Ending audit event deletion worker cycle"
        );
        Ok(report)
    }
}

// ============================================================================
// DeletionWorker - single long-lived task retiring queue entries
// ============================================================================

/// Messages for the deletion worker that expect a reply
pub enum DeletionMessage {
    /// Run a cycle now and report it
    Drain {
        response_tx: oneshot::Sender<ArchiveResult<DrainReport>>,
    },
    /// Graceful shutdown
    Shutdown { response_tx: oneshot::Sender<()> },
}

struct DeletionWorker<S: BlobStore + ?Sized> {
    queue: Arc<DeletionQueue<S>>,
    signal_rx: mpsc::Receiver<()>,
    command_rx: mpsc::Receiver<DeletionMessage>,
    sweep_interval: Duration,
}

impl<S: BlobStore + ?Sized> DeletionWorker<S> {
    async fn run(mut self) {
        let mut sweep = (!self.sweep_interval.is_zero()).then(|| {
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;

                msg = self.command_rx.recv() => match msg {
                    Some(DeletionMessage::Drain { response_tx }) => {
                        let result = self.queue.run_once().await;
                        let _ = response_tx.send(result);
                    }
                    Some(DeletionMessage::Shutdown { response_tx }) => {
                        info!("Deletion worker shutting down");
                        let _ = response_tx.send(());
                        break;
                    }
                    None => break,
                },
                Some(()) = self.signal_rx.recv() => self.cycle().await,
                _ = next_sweep(&mut sweep) => self.cycle().await,
            }
        }
    }

    async fn cycle(&self) {
        if let Err(e) = self.queue.run_once().await {
            error!(error = %e, "Deletion worker cycle failed");
        }
    }
}

async fn next_sweep(sweep: &mut Option<tokio::time::Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle for interacting with the deletion worker
pub struct DeletionWorkerHandle<S: BlobStore + ?Sized> {
    queue: Arc<DeletionQueue<S>>,
    signal_tx: mpsc::Sender<()>,
    command_tx: mpsc::Sender<DeletionMessage>,
}

impl<S: BlobStore + ?Sized> Clone for DeletionWorkerHandle<S> {
    fn clone(&self) -> Self {
        DeletionWorkerHandle {
            queue: self.queue.clone(),
            signal_tx: self.signal_tx.clone(),
            command_tx: self.command_tx.clone(),
        }
    }
}

impl<S: BlobStore + ?Sized> DeletionWorkerHandle<S> {
    pub fn queue(&self) -> &Arc<DeletionQueue<S>> {
        &self.queue
    }

    /// Persist a deletion request for `tenant_id` and schedule a run
    pub async fn enqueue(&self, tenant_id: &str) -> ArchiveResult<()> {
        self.queue.persist_request(tenant_id).await?;
        self.trigger()
    }

    /// Schedule a run without waiting. Triggers arriving while one is
    /// already scheduled collapse into it.
    pub fn trigger(&self) -> ArchiveResult<()> {
        match self.signal_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => Err(ArchiveError::WorkerUnavailable),
        }
    }

    /// Run a cycle after any in flight and wait for its report
    pub async fn drain(&self) -> ArchiveResult<DrainReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DeletionMessage::Drain { response_tx })
            .await
            .map_err(|_| ArchiveError::WorkerUnavailable)?;
        response_rx.await.map_err(|_| ArchiveError::WorkerUnavailable)?
    }

    /// Graceful shutdown - waits for the current cycle to finish
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .command_tx
            .send(DeletionMessage::Shutdown { response_tx })
            .await
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}

/// Spawn a deletion worker and return its handle + join handle
pub fn spawn_deletion_worker<S: BlobStore + ?Sized>(
    queue: Arc<DeletionQueue<S>>,
    config: &DeletionConfig,
) -> (DeletionWorkerHandle<S>, tokio::task::JoinHandle<()>) {
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let worker = DeletionWorker {
        queue: queue.clone(),
        signal_rx,
        command_rx,
        sweep_interval: config.sweep_interval,
    };
    let task = tokio::spawn(worker.run());

    let handle = DeletionWorkerHandle {
        queue,
        signal_tx,
        command_tx,
    };
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::blob_store::InMemoryBlobStore;
    use crate::archive::simulated_store::{SimulatedBlobStore, SimulatedStoreConfig};

    const TENANT: &str = "53ff8153-7456-43ff-b9b4-e5deaeac5f09";
    const OTHER: &str = "0c1e5c0a-2b4f-4a5e-9d2c-7f1e2a3b4c5d";

    async fn seed(store: &InMemoryBlobStore, tenant: &str, n: usize) {
        for i in 0..n {
            let key = format!("{}/2021/01/{:02}/00/00/e{}", tenant, i % 28 + 1, i);
            store.put(&key, b"{}", &BlobAttributes::default()).await.unwrap();
        }
    }

    fn config(page_size: usize) -> ArchiveConfig {
        let mut config = ArchiveConfig::test();
        config.deletion.page_size = page_size;
        config
    }

    #[tokio::test]
    async fn test_purger_pages() {
        let store = Arc::new(InMemoryBlobStore::new());
        seed(&store, TENANT, 10).await;
        seed(&store, OTHER, 3).await;

        let purger = TenantPurger::new(store.clone(), 4);
        let stats = purger.delete_audit_events_for_tenant(TENANT).await.unwrap();

        assert_eq!(stats, PurgeStats { pages: 3, keys_deleted: 10 });
        assert_eq!(store.len(), 3);
        assert!(store.keys().iter().all(|k| k.starts_with(OTHER)));
    }

    #[tokio::test]
    async fn test_purger_refuses_short_id_without_touching_store() {
        let store = Arc::new(SimulatedBlobStore::new(
            Arc::new(InMemoryBlobStore::new()),
            1,
            SimulatedStoreConfig::no_faults(),
        ));
        let purger = TenantPurger::new(store.clone(), 256);

        let result = purger.delete_audit_events_for_tenant("short-id").await;

        assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))));
        let stats = store.stats();
        assert_eq!(stats.mutation_attempts(), 0);
        assert_eq!(stats.list_attempts, 0);
    }

    #[tokio::test]
    async fn test_purger_partial_delete_is_error() {
        let inner = Arc::new(InMemoryBlobStore::new());
        seed(&inner, TENANT, 5).await;
        let store = Arc::new(SimulatedBlobStore::new(
            inner,
            9,
            SimulatedStoreConfig {
                bulk_delete_reject_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        ));

        let result = TenantPurger::new(store, 256)
            .delete_audit_events_for_tenant(TENANT)
            .await;

        match result {
            Err(ArchiveError::PartialDelete {
                requested,
                deleted,
                failed_keys,
                ..
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(deleted, 0);
                assert_eq!(failed_keys.len(), 5);
            }
            other => panic!("expected PartialDelete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_persist_request_entry() {
        let store = Arc::new(InMemoryBlobStore::new());
        let queue = DeletionQueue::new(store.clone(), &config(256));

        queue.persist_request(TENANT).await.unwrap();

        let blob = store.get(&format!("_toDeleteQueue/{}", TENANT)).await.unwrap();
        assert_eq!(blob.data, TENANT.as_bytes());
        assert_eq!(blob.attributes.content_type.as_deref(), Some("text/plain"));
        assert_eq!(queue.pending_tenants().await.unwrap(), vec![TENANT.to_string()]);

        let attrs = queue.audit_attributes(TENANT).await.unwrap();
        assert!(attrs.deletion_pending);
        assert_eq!(attrs.archive_bucket, "test");
    }

    #[tokio::test]
    async fn test_purge_tenant_lists_tenant_prefix_twice() {
        let inner = Arc::new(InMemoryBlobStore::new());
        seed(&inner, TENANT, 6).await;
        let store = Arc::new(SimulatedBlobStore::new(inner.clone(), 4, SimulatedStoreConfig::no_faults()));
        // Built around validation: a single configured pass is raised to two
        let mut config = config(256);
        config.deletion.purge_passes = 1;
        let queue = DeletionQueue::new(store.clone(), &config);
        queue.persist_request(TENANT).await.unwrap();
        store.reset_stats();

        let stats = queue.purge_tenant(TENANT).await.unwrap();

        assert_eq!(stats.keys_deleted, 6);
        assert_eq!(store.stats().list_attempts, 2);
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn test_run_once_skips_marker_and_bad_entries() {
        let store = Arc::new(InMemoryBlobStore::new());
        seed(&store, TENANT, 20).await;
        let queue = DeletionQueue::new(store.clone(), &config(8));
        let attrs = BlobAttributes::default();

        queue.persist_request(TENANT).await.unwrap();
        store.put(DELETE_QUEUE_PREFIX, b"", &attrs).await.unwrap();
        store.put("_toDeleteQueue/short", b"short", &attrs).await.unwrap();

        let report = queue.run_once().await.unwrap();

        assert_eq!(report.purged, vec![TENANT.to_string()]);
        assert_eq!(report.skipped, vec!["short".to_string()]);
        assert_eq!(report.keys_deleted, 20);
        assert!(report.is_clean());
        assert!(!queue.is_pending(TENANT).await.unwrap());
        // Refused entries and the folder marker are left alone
        assert!(store.exists("_toDeleteQueue/short").await.unwrap());
        assert!(store.exists(DELETE_QUEUE_PREFIX).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_purge_keeps_entry() {
        let inner = Arc::new(InMemoryBlobStore::new());
        seed(&inner, TENANT, 10).await;
        let store = Arc::new(SimulatedBlobStore::new(
            inner.clone(),
            5,
            SimulatedStoreConfig::no_faults(),
        ));
        let queue = DeletionQueue::new(store.clone(), &config(4));
        queue.persist_request(TENANT).await.unwrap();

        store.fail_bulk_deletes_after(1);
        let report = queue.run_once().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(queue.is_pending(TENANT).await.unwrap());

        store.heal();
        let report = queue.run_once().await.unwrap();
        assert_eq!(report.purged, vec![TENANT.to_string()]);
        assert!(inner.keys().is_empty());
    }

    #[tokio::test]
    async fn test_worker_enqueue_and_drain() {
        let store = Arc::new(InMemoryBlobStore::new());
        seed(&store, TENANT, 30).await;
        let config = config(8);
        let queue = Arc::new(DeletionQueue::new(store.clone(), &config));
        let (handle, task) = spawn_deletion_worker(queue, &config.deletion);

        handle.enqueue(TENANT).await.unwrap();
        handle.trigger().unwrap();
        handle.trigger().unwrap();
        let report = handle.drain().await.unwrap();

        assert!(report.is_clean());
        assert!(store.is_empty());

        handle.shutdown().await;
        task.await.unwrap();
        assert!(matches!(handle.trigger(), Err(ArchiveError::WorkerUnavailable)));
    }

    #[tokio::test]
    async fn test_worker_enqueue_refuses_short_id() {
        let store = Arc::new(InMemoryBlobStore::new());
        let config = config(8);
        let queue = Arc::new(DeletionQueue::new(store.clone(), &config));
        let (handle, _task) = spawn_deletion_worker(queue, &config.deletion);

        let result = handle.enqueue("short-id").await;

        assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))));
        assert!(store.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_sweep_resumes_leftover_entry() {
        let store = Arc::new(InMemoryBlobStore::new());
        seed(&store, TENANT, 12).await;
        let mut config = config(8);
        config.deletion.sweep_interval = Duration::from_millis(10);

        // Entry left behind by an earlier process
        let queue = Arc::new(DeletionQueue::new(store.clone(), &config));
        queue.persist_request(TENANT).await.unwrap();

        let (handle, _task) = spawn_deletion_worker(queue, &config.deletion);
        for _ in 0..200 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(store.is_empty());
        handle.shutdown().await;
    }
}
