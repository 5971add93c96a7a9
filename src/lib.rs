pub mod archive;
pub mod observability;

pub use archive::{
    ArchiveConfig, ArchiveError, ArchiveResult, ArchivedEventEnvelope, AuditArchive, AuditEvent,
    BlobStore, DeletionQueue, InMemoryBlobStore, KeyCodec, RangeScanner,
};
pub use observability::{init_tracing, LoggingConfig};
