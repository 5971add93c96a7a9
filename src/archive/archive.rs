//! Archive writer and reader
//!
//! Idempotent, checksum-verified puts and integrity-aware gets of single
//! events. There is no in-process index or cache: every call goes to the
//! blob store, which is the only source of truth.

use super::blob_store::{BlobAttributes, BlobStore};
use super::config::ArchiveConfig;
use super::envelope::{
    content_hash, ArchivedEventEnvelope, CONTENT_HASH_METADATA, JSON_CONTENT_TYPE, ORG_METADATA,
    POD_METADATA,
};
use super::error::ArchiveResult;
use super::event::ArchivableEvent;
use super::key_codec::KeyCodec;
use super::tenant::TenantRecord;
use chrono::{DateTime, TimeZone};
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// Provenance tags written with each event
#[derive(Debug, Clone, Copy, Default)]
struct WriteTags<'a> {
    org: Option<&'a str>,
    pod: Option<&'a str>,
}

/// Reads and writes individual archived events
pub struct AuditArchive<S: BlobStore + ?Sized> {
    store: Arc<S>,
    pod: Option<String>,
}

impl<S: BlobStore + ?Sized> Clone for AuditArchive<S> {
    fn clone(&self) -> Self {
        AuditArchive {
            store: self.store.clone(),
            pod: self.pod.clone(),
        }
    }
}

impl<S: BlobStore + ?Sized> AuditArchive<S> {
    pub fn new(store: Arc<S>) -> Self {
        AuditArchive { store, pod: None }
    }

    /// Archive backed by `store`, tagging writes with the configured pod
    pub fn from_config(store: Arc<S>, config: &ArchiveConfig) -> Self {
        AuditArchive {
            store,
            pod: config.pod.clone(),
        }
    }

    /// Tag every plain `put` with this pod
    pub fn with_pod(mut self, pod: impl Into<String>) -> Self {
        self.pod = Some(pod.into());
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Fetch an event by identity. `Ok(None)` when it is not archived.
    pub async fn get<Tz: TimeZone>(
        &self,
        tenant_id: &str,
        created_at: &DateTime<Tz>,
        event_id: &str,
    ) -> ArchiveResult<Option<ArchivedEventEnvelope>> {
        let key = KeyCodec::encode(tenant_id, created_at, event_id)?;
        self.get_by_key(&key).await
    }

    /// Fetch an event by its raw store key, e.g. one handed out by a scan
    pub async fn get_by_key(&self, key: &str) -> ArchiveResult<Option<ArchivedEventEnvelope>> {
        let decoded = KeyCodec::decode(key)?;

        if !self.store.exists(key).await? {
            return Ok(None);
        }

        let blob = match self.store.get(key).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key = %key, "Archived event evaporated between existence check and read");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let event_json =
            String::from_utf8(blob.data).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;

        let (hash, hash_recomputed) = match blob.attributes.metadata(CONTENT_HASH_METADATA) {
            Some(hash) => (hash.to_string(), false),
            None => {
                let hash = content_hash(event_json.as_bytes());
                warn!(key = %key, hash = %hash, "Archived event has no contentHash metadata, recomputed");
                (hash, true)
            }
        };

        Ok(Some(ArchivedEventEnvelope {
            key: key.to_string(),
            tenant_id: decoded.tenant_id,
            event_id: decoded.event_id,
            event_json,
            content_hash: hash,
            store_checksum: blob.etag,
            already_existed: false,
            previous_differed: false,
            hash_recomputed,
        }))
    }

    /// Archive an event, tagged with this archive's pod
    pub async fn put<E: ArchivableEvent + ?Sized>(
        &self,
        tenant_id: &str,
        event: &E,
    ) -> ArchiveResult<ArchivedEventEnvelope> {
        let tags = WriteTags {
            org: None,
            pod: self.pod.as_deref(),
        };
        self.put_event(tenant_id, event, tags).await
    }

    /// Archive an event, tagged with the org and pod of `tenant`
    pub async fn put_in_context<E: ArchivableEvent + ?Sized>(
        &self,
        tenant: &TenantRecord,
        event: &E,
    ) -> ArchiveResult<ArchivedEventEnvelope> {
        let tags = WriteTags {
            org: Some(&tenant.org),
            pod: Some(&tenant.pod),
        };
        self.put_event(&tenant.tenant_id, event, tags).await
    }

    /// Archive an already-serialized payload under an explicit identity
    pub async fn put_json<Tz: TimeZone>(
        &self,
        tenant_id: &str,
        created_at: &DateTime<Tz>,
        event_id: &str,
        event_json: &str,
    ) -> ArchiveResult<ArchivedEventEnvelope> {
        let key = KeyCodec::encode(tenant_id, created_at, event_id)?;
        let tags = WriteTags {
            org: None,
            pod: self.pod.as_deref(),
        };
        self.write(key, event_json.to_string(), tags).await
    }

    async fn put_event<E: ArchivableEvent + ?Sized>(
        &self,
        tenant_id: &str,
        event: &E,
        tags: WriteTags<'_>,
    ) -> ArchiveResult<ArchivedEventEnvelope> {
        let key = KeyCodec::encode(tenant_id, &event.created_at(), event.event_id())?;
        let event_json = serde_json::to_string(event)?;
        self.write(key, event_json, tags).await
    }

    async fn write(
        &self,
        key: String,
        event_json: String,
        tags: WriteTags<'_>,
    ) -> ArchiveResult<ArchivedEventEnvelope> {
        let hash = content_hash(event_json.as_bytes());

        let mut previous_differed = false;
        if let Some(mut previous) = self.get_by_key(&key).await? {
            if previous.content_hash == hash {
                debug!(key = %key, "Redundant save skipped");
                previous.already_existed = true;
                return Ok(previous);
            }
            warn!(
                key = %key,
                old_hash = %previous.content_hash,
                new_hash = %hash,
                "Checksum mismatch for archived event, overwriting"
            );
            previous_differed = true;
        }

        let mut attributes = BlobAttributes::with_content_type(JSON_CONTENT_TYPE);
        attributes.insert_metadata(CONTENT_HASH_METADATA, &hash);
        if let Some(org) = tags.org {
            attributes.insert_metadata(ORG_METADATA, org);
        }
        if let Some(pod) = tags.pod {
            attributes.insert_metadata(POD_METADATA, pod);
        }

        let put = self
            .store
            .put(&key, event_json.as_bytes(), &attributes)
            .await?;

        let decoded = KeyCodec::decode(&key)?;
        Ok(ArchivedEventEnvelope {
            key,
            tenant_id: decoded.tenant_id,
            event_id: decoded.event_id,
            event_json,
            content_hash: hash,
            store_checksum: put.etag,
            already_existed: false,
            previous_differed,
            hash_recomputed: false,
        })
    }

    /// Delete an event by identity; deleting an absent event is a no-op
    pub async fn delete<Tz: TimeZone>(
        &self,
        tenant_id: &str,
        created_at: &DateTime<Tz>,
        event_id: &str,
    ) -> ArchiveResult<()> {
        let key = KeyCodec::encode(tenant_id, created_at, event_id)?;
        if self.store.exists(&key).await? {
            self.store.delete(&key).await?;
            debug!(key = %key, "Deleted archived event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::blob_store::InMemoryBlobStore;
    use crate::archive::event::AuditEvent;
    use chrono::Utc;

    const TENANT: &str = "53ff8153-7456-43ff-b9b4-e5deaeac5f09";

    fn event(id: &str, action: &str) -> AuditEvent {
        let created = Utc.with_ymd_and_hms(2021, 8, 19, 12, 53, 41).unwrap();
        AuditEvent::new(id, created, action)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = Arc::new(InMemoryBlobStore::new());
        let archive = AuditArchive::new(store.clone()).with_pod("dev01");
        let evt = event("evt-1", "USER_LOGIN");

        let put = archive.put(TENANT, &evt).await.unwrap();
        assert!(!put.already_existed);
        assert!(!put.previous_differed);
        assert_eq!(put.key, format!("{}/2021/08/19/12/53/evt-1", TENANT));

        let got = archive.get(TENANT, &evt.created, "evt-1").await.unwrap().unwrap();
        assert_eq!(got.content_hash, put.content_hash);
        assert_eq!(got.tenant_id, TENANT);
        assert_eq!(got.event::<AuditEvent>().unwrap(), evt);

        let blob = store.get(&put.key).await.unwrap();
        assert_eq!(blob.attributes.content_type.as_deref(), Some("application/json"));
        assert_eq!(blob.attributes.metadata("pod"), Some("dev01"));
        assert_eq!(blob.attributes.metadata("org"), None);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let archive = AuditArchive::new(Arc::new(InMemoryBlobStore::new()));
        let got = archive.get(TENANT, &Utc::now(), "nope").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_get_recomputes_missing_hash() {
        let store = Arc::new(InMemoryBlobStore::new());
        let archive = AuditArchive::new(store.clone());
        let key = format!("{}/2021/08/19/12/53/legacy", TENANT);
        store
            .put(&key, br#"{"id":"legacy"}"#, &BlobAttributes::default())
            .await
            .unwrap();

        let got = archive.get_by_key(&key).await.unwrap().unwrap();
        assert!(got.hash_recomputed);
        assert!(got.verify());
    }

    #[tokio::test]
    async fn test_put_in_context_tags_org_and_pod() {
        let store = Arc::new(InMemoryBlobStore::new());
        let archive = AuditArchive::new(store.clone()).with_pod("ignored");
        let tenant = TenantRecord::new(TENANT, "acme", "useast1");

        let put = archive.put_in_context(&tenant, &event("evt-2", "X")).await.unwrap();

        let blob = store.get(&put.key).await.unwrap();
        assert_eq!(blob.attributes.metadata("org"), Some("acme"));
        assert_eq!(blob.attributes.metadata("pod"), Some("useast1"));
        assert_eq!(blob.attributes.metadata("contentHash"), Some(put.content_hash.as_str()));
    }

    #[tokio::test]
    async fn test_get_by_key_rejects_malformed_key() {
        let archive = AuditArchive::new(Arc::new(InMemoryBlobStore::new()));
        assert!(archive.get_by_key("tenant/2021/evt").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let archive = AuditArchive::new(Arc::new(InMemoryBlobStore::new()));
        archive.delete(TENANT, &Utc::now(), "gone").await.unwrap();
    }
}
