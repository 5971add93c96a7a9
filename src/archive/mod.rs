//! Audit Event Archive Store
//!
//! Multi-tenant archive of immutable audit events, one blob per event, in a
//! time-partitioned key space inside an object store.
//!
//! ## Architecture
//!
//! ```text
//! AuditArchive ──┐
//! RangeScanner ──┼──► KeyCodec ──► BlobStore (S3 / local fs / memory)
//! DeletionQueue ─┘                     ▲
//!      ▲                               │
//! DeletionWorker ── purge <tenant>/ ───┘
//! ```
//!
//! ## Key Features
//!
//! - **Idempotent writes**: SHA-256 compared before each put
//! - **Adaptive range scans**: hour prefixes within a month, day prefixes beyond
//! - **Resumable tenant purge**: requests persisted in the store itself

pub mod archive;
pub mod blob_store;
pub mod config;
pub mod deletion;
pub mod envelope;
pub mod error;
pub mod event;
pub mod key_codec;
pub mod scanner;
pub mod simulated_store;
pub mod tenant;
#[cfg(feature = "s3")]
pub mod s3_store;

pub use archive::AuditArchive;
pub use blob_store::{
    BlobAttributes, BlobStore, BulkDeleteResult, InMemoryBlobStore, ListResult, LocalFsBlobStore,
    ObjectMeta, PutResult, StoredBlob,
};
pub use config::{ArchiveConfig, BlobStoreType, DeletionConfig, DEFAULT_BUCKET, MIN_PURGE_PASSES};
pub use deletion::{
    spawn_deletion_worker, DeletionMessage, DeletionQueue, DeletionWorkerHandle, DrainReport,
    PurgeStats, TenantPurger, DELETE_QUEUE_PREFIX,
};
pub use envelope::{content_hash, ArchivedEventEnvelope};
pub use error::{ArchiveError, ArchiveResult};
pub use event::{ArchivableEvent, AuditEvent};
pub use key_codec::{ArchivedEventKey, DecodedKey, KeyCodec};
pub use scanner::{RangeScanner, ScanGranularity, ScanPlan, ScanStats};
pub use simulated_store::{SimulatedBlobStore, SimulatedStoreConfig, SimulatedStoreStats};
pub use tenant::{AuditTenantAttributes, AuditTenantRecord, TenantRecord};
#[cfg(feature = "s3")]
pub use config::S3Config;
#[cfg(feature = "s3")]
pub use s3_store::S3BlobStore;
