//! Tenant records
//!
//! Generic tenant identity and the audit-specific facts about a tenant are
//! kept apart. The caller merges them into an `AuditTenantRecord`.

use serde::{Deserialize, Serialize};

/// Identity of a tenant and where it is hosted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub org: String,
    pub pod: String,
}

impl TenantRecord {
    pub fn new(tenant_id: impl Into<String>, org: impl Into<String>, pod: impl Into<String>) -> Self {
        TenantRecord {
            tenant_id: tenant_id.into(),
            org: org.into(),
            pod: pod.into(),
        }
    }
}

/// Audit-archive facts about a tenant, see `DeletionQueue::audit_attributes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTenantAttributes {
    pub archive_bucket: String,
    pub deletion_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTenantRecord {
    pub tenant: TenantRecord,
    pub audit: AuditTenantAttributes,
}

impl AuditTenantRecord {
    pub fn new(tenant: TenantRecord, audit: AuditTenantAttributes) -> Self {
        AuditTenantRecord { tenant, audit }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant.tenant_id
    }

    /// Whether new events should still be archived for this tenant
    pub fn accepts_writes(&self) -> bool {
        !self.audit.deletion_pending
    }
}
