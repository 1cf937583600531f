//! # Declarative Store
//!
//! Read/write access to ManagedCertificate objects. The sync core only needs
//! two operations: read the desired resource for an id, and persist a status
//! update. Behind the trait sits the Kubernetes API server; tests use the
//! in-memory fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

use crate::types::CertId;
use crate::ManagedCertificate;

/// Desired-state store for ManagedCertificate resources.
#[async_trait]
pub trait ManagedCertificateStore: Send + Sync {
    /// Current ManagedCertificate for `id`, or `None` when the resource has
    /// been deleted.
    async fn get(&self, id: &CertId) -> Result<Option<ManagedCertificate>>;

    /// Persist `mcrt`'s status subresource. The spec is never written.
    async fn update_status(&self, mcrt: &ManagedCertificate) -> Result<()>;
}

/// [`ManagedCertificateStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeManagedCertificateStore {
    client: Client,
}

impl std::fmt::Debug for KubeManagedCertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeManagedCertificateStore").finish_non_exhaustive()
    }
}

impl KubeManagedCertificateStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ManagedCertificate> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ManagedCertificateStore for KubeManagedCertificateStore {
    async fn get(&self, id: &CertId) -> Result<Option<ManagedCertificate>> {
        self.api(&id.namespace)
            .get_opt(&id.name)
            .await
            .with_context(|| format!("failed to get ManagedCertificate {id}"))
    }

    async fn update_status(&self, mcrt: &ManagedCertificate) -> Result<()> {
        let id = CertId::from_object(mcrt);
        let patch = serde_json::json!({
            "status": mcrt.status,
        });

        self.api(&id.namespace)
            .patch_status(
                &id.name,
                &PatchParams::apply("managed-certificate-controller"),
                &Patch::Merge(patch),
            )
            .await
            .with_context(|| format!("failed to update status of ManagedCertificate {id}"))?;
        Ok(())
    }
}

/// In-memory [`ManagedCertificateStore`] for tests.
#[derive(Debug, Default)]
pub struct FakeManagedCertificateStore {
    objects: std::sync::Mutex<std::collections::HashMap<CertId, ManagedCertificate>>,
}

impl FakeManagedCertificateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mcrt: ManagedCertificate) {
        let id = CertId::from_object(&mcrt);
        self.objects.lock().expect("store mutex poisoned").insert(id, mcrt);
    }

    /// Simulate deletion of the declarative resource.
    pub fn delete(&self, id: &CertId) {
        self.objects.lock().expect("store mutex poisoned").remove(id);
    }

    /// Stored object for `id`, status included.
    #[must_use]
    pub fn stored(&self, id: &CertId) -> Option<ManagedCertificate> {
        self.objects.lock().expect("store mutex poisoned").get(id).cloned()
    }
}

#[async_trait]
impl ManagedCertificateStore for FakeManagedCertificateStore {
    async fn get(&self, id: &CertId) -> Result<Option<ManagedCertificate>> {
        Ok(self.stored(id))
    }

    async fn update_status(&self, mcrt: &ManagedCertificate) -> Result<()> {
        let id = CertId::from_object(mcrt);
        let mut objects = self.objects.lock().expect("store mutex poisoned");
        let stored = objects
            .get_mut(&id)
            .with_context(|| format!("ManagedCertificate {id} not found"))?;
        stored.status = mcrt.status.clone();
        Ok(())
    }
}
