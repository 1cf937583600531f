//! # SslCertificate Manager
//!
//! CRUD capability against the provider-side SslCertificate resource. The
//! provider resource is created imperatively, its defining fields (name,
//! domain list) are immutable once created, and provisioning happens
//! asynchronously on the provider side.
//!
//! The controller core only consumes the [`SslCertificateManager`] contract.
//! A real cloud-backed manager is injected by deployments that have one; this
//! module ships [`InMemorySslCertificateManager`], used by the test suite and
//! by dry-run deployments.
//!
//! Every certificate carries an ownership marker in its description linking it
//! back to the ManagedCertificate it was created for. Operations refuse to
//! touch certificates owned by a different id.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;

use crate::types::CertId;

/// Observed provider-side certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslCertificate {
    /// Provider resource name, assigned by the controller at creation time.
    pub name: String,
    /// Domains the certificate secures. Immutable once created.
    pub domains: Vec<String>,
    /// Provider provisioning status, e.g. `ACTIVE` or `PROVISIONING`.
    pub status: String,
    /// Per-domain provisioning status.
    pub domain_status: BTreeMap<String, String>,
    /// Expiry timestamp reported by the provider, RFC 3339.
    pub expire_time: Option<String>,
    /// Ownership marker: `managed-certificate:<namespace>/<name>`.
    pub description: String,
}

impl SslCertificate {
    /// Ownership marker value for certificates belonging to `id`.
    #[must_use]
    pub fn description_for(id: &CertId) -> String {
        format!("managed-certificate:{id}")
    }

    #[must_use]
    pub fn is_owned_by(&self, id: &CertId) -> bool {
        self.description == Self::description_for(id)
    }
}

/// Failure taxonomy for provider calls.
///
/// `NotFound` is the only classified failure; callers suppress it on delete
/// paths and propagate it elsewhere. Everything else is an opaque backend
/// error handed back unmodified - the controller does not distinguish
/// transient from permanent provider failures.
#[derive(Debug, Error)]
pub enum SslCertificateError {
    #[error("SslCertificate {name} not found")]
    NotFound { name: String },
    #[error("SslCertificate backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl SslCertificateError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Treat a `NotFound` failure as success. Used on delete paths, where an
/// already-absent certificate means cleanup is complete.
pub fn ignore_not_found(result: Result<(), SslCertificateError>) -> Result<(), SslCertificateError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// CRUD contract against the provider, keyed by certificate name and owning
/// ManagedCertificate id.
#[async_trait]
pub trait SslCertificateManager: Send + Sync {
    /// Whether a certificate with this name exists and belongs to `id`.
    async fn exists(&self, name: &str, id: &CertId) -> Result<bool, SslCertificateError>;

    /// Fetch the certificate. Fails with `NotFound` when absent.
    async fn get(&self, name: &str, id: &CertId) -> Result<SslCertificate, SslCertificateError>;

    /// Create a certificate for `domains`, marked as owned by `id`. The core
    /// only calls this after `exists` returned false.
    async fn create(
        &self,
        name: &str,
        domains: &[String],
        id: &CertId,
    ) -> Result<(), SslCertificateError>;

    /// Delete the certificate. Fails with `NotFound` when absent; callers on
    /// cleanup paths wrap this in [`ignore_not_found`].
    async fn delete(&self, name: &str, id: &CertId) -> Result<(), SslCertificateError>;
}

/// In-memory [`SslCertificateManager`] used in tests and dry-run deployments.
///
/// Newly created certificates come up with a configurable provisioning status
/// (`ACTIVE` by default so a create-then-get cycle converges in one pass).
#[derive(Debug)]
pub struct InMemorySslCertificateManager {
    certificates: Mutex<HashMap<String, SslCertificate>>,
    initial_status: String,
    create_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl Default for InMemorySslCertificateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySslCertificateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_status("ACTIVE")
    }

    /// Backend whose newly created certificates report `status`, e.g.
    /// `PROVISIONING` to simulate a provider that has not finished issuing.
    #[must_use]
    pub fn with_initial_status(status: &str) -> Self {
        Self {
            certificates: Mutex::new(HashMap::new()),
            initial_status: status.to_string(),
            create_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
        }
    }

    /// Number of create calls issued so far.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Number of delete calls issued so far.
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Overwrite the stored domain list for `name`, simulating a certificate
    /// that no longer matches desired intent.
    pub fn put_domains(&self, name: &str, domains: Vec<String>) {
        let mut certificates = self.certificates.lock().expect("certificate mutex poisoned");
        if let Some(cert) = certificates.get_mut(name) {
            cert.domain_status = domains
                .iter()
                .map(|d| (d.clone(), cert.status.clone()))
                .collect();
            cert.domains = domains;
        }
    }

    fn owned(
        name: &str,
        id: &CertId,
        cert: Option<&SslCertificate>,
    ) -> Result<Option<SslCertificate>, SslCertificateError> {
        match cert {
            None => Ok(None),
            Some(cert) if cert.is_owned_by(id) => Ok(Some(cert.clone())),
            Some(_) => Err(SslCertificateError::Backend(anyhow!(
                "SslCertificate {name} exists but is not owned by ManagedCertificate {id}"
            ))),
        }
    }
}

#[async_trait]
impl SslCertificateManager for InMemorySslCertificateManager {
    async fn exists(&self, name: &str, id: &CertId) -> Result<bool, SslCertificateError> {
        let certificates = self.certificates.lock().expect("certificate mutex poisoned");
        Ok(Self::owned(name, id, certificates.get(name))?.is_some())
    }

    async fn get(&self, name: &str, id: &CertId) -> Result<SslCertificate, SslCertificateError> {
        let certificates = self.certificates.lock().expect("certificate mutex poisoned");
        Self::owned(name, id, certificates.get(name))?
            .ok_or_else(|| SslCertificateError::NotFound {
                name: name.to_string(),
            })
    }

    async fn create(
        &self,
        name: &str,
        domains: &[String],
        id: &CertId,
    ) -> Result<(), SslCertificateError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        let mut certificates = self.certificates.lock().expect("certificate mutex poisoned");
        if let Some(existing) = certificates.get(name) {
            if !existing.is_owned_by(id) {
                return Err(SslCertificateError::Backend(anyhow!(
                    "SslCertificate {name} already exists and is not owned by ManagedCertificate {id}"
                )));
            }
            // Create on an already-created name is a retry after partial
            // failure; the stored certificate wins.
            return Ok(());
        }

        certificates.insert(
            name.to_string(),
            SslCertificate {
                name: name.to_string(),
                domains: domains.to_vec(),
                status: self.initial_status.clone(),
                domain_status: domains
                    .iter()
                    .map(|d| (d.clone(), self.initial_status.clone()))
                    .collect(),
                expire_time: None,
                description: SslCertificate::description_for(id),
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str, id: &CertId) -> Result<(), SslCertificateError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        let mut certificates = self.certificates.lock().expect("certificate mutex poisoned");
        match certificates.get(name) {
            None => Err(SslCertificateError::NotFound {
                name: name.to_string(),
            }),
            Some(cert) if !cert.is_owned_by(id) => Err(SslCertificateError::Backend(anyhow!(
                "refusing to delete SslCertificate {name}: not owned by ManagedCertificate {id}"
            ))),
            Some(_) => {
                certificates.remove(name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> CertId {
        CertId::new("default", "mcrt1")
    }

    fn domains() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let manager = InMemorySslCertificateManager::new();
        manager.create("mcrt-abc123", &domains(), &id()).await.unwrap();

        assert!(manager.exists("mcrt-abc123", &id()).await.unwrap());
        let cert = manager.get("mcrt-abc123", &id()).await.unwrap();
        assert_eq!(cert.domains, domains());
        assert_eq!(cert.status, "ACTIVE");
        assert!(cert.is_owned_by(&id()));
    }

    #[tokio::test]
    async fn test_get_absent_is_not_found() {
        let manager = InMemorySslCertificateManager::new();
        let err = manager.get("mcrt-missing", &id()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_found_and_suppressible() {
        let manager = InMemorySslCertificateManager::new();
        let result = manager.delete("mcrt-missing", &id()).await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
        assert!(ignore_not_found(result).is_ok());
    }

    #[tokio::test]
    async fn test_foreign_owner_is_rejected() {
        let manager = InMemorySslCertificateManager::new();
        let other = CertId::new("default", "mcrt2");
        manager.create("mcrt-abc123", &domains(), &id()).await.unwrap();

        assert!(manager.exists("mcrt-abc123", &other).await.is_err());
        assert!(manager.get("mcrt-abc123", &other).await.is_err());
        assert!(manager.delete("mcrt-abc123", &other).await.is_err());
        // The certificate survives the refused delete.
        assert!(manager.exists("mcrt-abc123", &id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_retry_keeps_original_certificate() {
        let manager = InMemorySslCertificateManager::new();
        manager.create("mcrt-abc123", &domains(), &id()).await.unwrap();
        manager
            .create("mcrt-abc123", &["example.org".to_string()], &id())
            .await
            .unwrap();

        let cert = manager.get("mcrt-abc123", &id()).await.unwrap();
        assert_eq!(cert.domains, domains());
        assert_eq!(manager.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_initial_status_is_configurable() {
        let manager = InMemorySslCertificateManager::with_initial_status("PROVISIONING");
        manager.create("mcrt-abc123", &domains(), &id()).await.unwrap();
        let cert = manager.get("mcrt-abc123", &id()).await.unwrap();
        assert_eq!(cert.status, "PROVISIONING");
        assert_eq!(cert.domain_status.get("example.com").unwrap(), "PROVISIONING");
    }
}
