//! # Sync
//!
//! Core reconciliation pass for a single ManagedCertificate. One invocation
//! is a single best-effort step toward convergence, not a guarantee of it:
//! drift remediation in particular deliberately spans two passes, because the
//! provider forbids in-place mutation of a certificate's domains and a crash
//! between delete and recreate must leave a recoverable state (entry cleared,
//! next pass recreates from scratch) rather than an ambiguous one.
//!
//! ## Pass algorithm
//!
//! 1. Read the ManagedCertificate. Absent with no state entry: done. Absent
//!    with an entry: finalize deletion.
//! 2. Ensure a stable SslCertificate name, persisting it before any provider
//!    call so a retry after a crash reuses the name instead of orphaning a
//!    certificate.
//! 3. Soft-deleted: delete the SslCertificate and drop the entry.
//! 4. Create the SslCertificate if missing; report creation latency once per
//!    id unless excluded from SLO accounting.
//! 5. Fetch the observed certificate and compare against desired intent.
//! 6. Equal: copy provider status back and persist it. Not equal: delete the
//!    certificate, clear the entry, and return [`SyncOutcome::DriftRemediated`].
//!
//! The caller must guarantee at most one in-flight pass per id - the
//! read-modify-write sequence against the state store is not atomic. Errors
//! from collaborators abort the pass immediately and are returned unmodified;
//! retry and backoff belong to the controller harness.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::certificates;
use crate::metrics::Metrics;
use crate::random::NameGenerator;
use crate::sslcertificatemanager::{
    ignore_not_found, SslCertificate, SslCertificateError, SslCertificateManager,
};
use crate::state::State;
use crate::store::ManagedCertificateStore;
use crate::types::CertId;
use crate::ManagedCertificate;

/// Result of a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Desired and observed state agree (or there was nothing left to do).
    Synced,
    /// The SslCertificate had drifted from desired intent and was deleted;
    /// the caller should re-invoke sync shortly to recreate it.
    DriftRemediated,
}

/// Failure of a pass, tagged by the collaborator that produced it. Errors are
/// propagated unmodified; the core performs no retries and no further
/// classification.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    SslCertificate(#[from] SslCertificateError),
    #[error("state store error: {0}")]
    State(#[source] anyhow::Error),
    #[error("declarative store error: {0}")]
    Store(#[source] anyhow::Error),
    #[error("name generation error: {0}")]
    NameGeneration(#[source] anyhow::Error),
    #[error("status translation error: {0}")]
    Status(#[source] anyhow::Error),
}

/// The reconciler core. Collaborators are injected as trait objects; the
/// struct itself holds no mutable state.
pub struct Sync {
    store: Arc<dyn ManagedCertificateStore>,
    state: Arc<dyn State>,
    ssl: Arc<dyn SslCertificateManager>,
    metrics: Arc<dyn Metrics>,
    random: Arc<dyn NameGenerator>,
}

impl std::fmt::Debug for Sync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sync").finish_non_exhaustive()
    }
}

impl Sync {
    #[must_use]
    pub fn new(
        store: Arc<dyn ManagedCertificateStore>,
        state: Arc<dyn State>,
        ssl: Arc<dyn SslCertificateManager>,
        metrics: Arc<dyn Metrics>,
        random: Arc<dyn NameGenerator>,
    ) -> Self {
        Self {
            store,
            state,
            ssl,
            metrics,
            random,
        }
    }

    /// Run one reconciliation pass for `id`.
    pub async fn managed_certificate(&self, id: &CertId) -> Result<SyncOutcome, SyncError> {
        let Some(mut mcrt) = self.store.get(id).await.map_err(SyncError::Store)? else {
            let name = self
                .state
                .get_ssl_certificate_name(id)
                .map_err(SyncError::State)?;
            return match name {
                // No name means no certificate was ever created; there may
                // still be a flag-only entry (a setter on an untracked id
                // creates one), which must not outlive the resource. Removing
                // an untracked id is a no-op.
                None => {
                    self.state.remove(id).map_err(SyncError::State)?;
                    Ok(SyncOutcome::Synced)
                }
                Some(name) => {
                    info!("ManagedCertificate {id} already deleted");
                    self.delete_ssl_certificate(id, &name).await?;
                    Ok(SyncOutcome::Synced)
                }
            };
        };

        info!("Syncing ManagedCertificate {id}");

        let name = self.ensure_ssl_certificate_name(id)?;

        if self.state.is_soft_deleted(id).map_err(SyncError::State)? {
            info!("ManagedCertificate {id} is soft deleted, deleting SslCertificate {name}");
            self.delete_ssl_certificate(id, &name).await?;
            return Ok(SyncOutcome::Synced);
        }

        let Some(ssl_cert) = self.ensure_ssl_certificate(&name, id, &mcrt).await? else {
            return Ok(SyncOutcome::DriftRemediated);
        };

        certificates::copy_status(&ssl_cert, &mut mcrt).map_err(SyncError::Status)?;
        self.store
            .update_status(&mcrt)
            .await
            .map_err(SyncError::Store)?;
        Ok(SyncOutcome::Synced)
    }

    /// Stable SslCertificate name for `id`: reuse the recorded one, otherwise
    /// generate and persist a new name before any provider call is made.
    fn ensure_ssl_certificate_name(&self, id: &CertId) -> Result<String, SyncError> {
        if let Some(name) = self
            .state
            .get_ssl_certificate_name(id)
            .map_err(SyncError::State)?
        {
            return Ok(name);
        }

        let name = self.random.name().map_err(SyncError::NameGeneration)?;
        info!("Add to state SslCertificate name {name} for ManagedCertificate {id}");
        self.state
            .set_ssl_certificate_name(id, &name)
            .map_err(SyncError::State)?;
        Ok(name)
    }

    /// Report the time between the ManagedCertificate's creation and now,
    /// at most once per id and never for ids excluded from SLO accounting.
    fn observe_creation_latency_if_needed(
        &self,
        id: &CertId,
        mcrt: &ManagedCertificate,
    ) -> Result<(), SyncError> {
        if self.state.is_excluded_from_slo(id).map_err(SyncError::State)? {
            info!(
                "Skipping SslCertificate creation metric: {id} is excluded from SLO calculations"
            );
            return Ok(());
        }

        if self
            .state
            .is_ssl_certificate_creation_reported(id)
            .map_err(SyncError::State)?
        {
            return Ok(());
        }

        let Some(created) = mcrt.metadata.creation_timestamp.as_ref() else {
            warn!("ManagedCertificate {id} has no creation timestamp, skipping latency metric");
            return Ok(());
        };

        let latency = (Utc::now() - created.0).to_std().unwrap_or_default();
        self.metrics.observe_ssl_certificate_creation_latency(latency);
        self.state
            .set_ssl_certificate_creation_reported(id)
            .map_err(SyncError::State)?;
        Ok(())
    }

    /// Delete the SslCertificate and drop the state entry, in the order that
    /// keeps a crash recoverable: mark soft-deleted first, delete (an absent
    /// certificate counts as deleted), then remove the entry. The entry's
    /// removal is the single authoritative signal that cleanup is complete.
    async fn delete_ssl_certificate(&self, id: &CertId, name: &str) -> Result<(), SyncError> {
        info!("Mark entry for ManagedCertificate {id} as soft deleted");
        self.state.set_soft_deleted(id).map_err(SyncError::State)?;

        info!("Delete SslCertificate {name} for ManagedCertificate {id}");
        ignore_not_found(self.ssl.delete(name, id).await)?;

        info!("Remove entry for ManagedCertificate {id} from state");
        self.state.remove(id).map_err(SyncError::State)?;
        Ok(())
    }

    /// Make sure an SslCertificate named `name` exists and matches desired
    /// intent. Returns `None` when the certificate had drifted and was deleted.
    async fn ensure_ssl_certificate(
        &self,
        name: &str,
        id: &CertId,
        mcrt: &ManagedCertificate,
    ) -> Result<Option<SslCertificate>, SyncError> {
        if !self.ssl.exists(name, id).await? {
            self.ssl.create(name, &mcrt.spec.domains, id).await?;
            self.observe_creation_latency_if_needed(id, mcrt)?;
        }

        let ssl_cert = self.ssl.get(name, id).await?;

        if certificates::equal(mcrt, &ssl_cert) {
            return Ok(Some(ssl_cert));
        }

        info!(
            "ManagedCertificate {id} and SslCertificate {name} differ: desired domains {:?}, observed {:?}",
            mcrt.spec.domains, ssl_cert.domains
        );
        self.delete_ssl_certificate(id, name).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::RandomNameGenerator;
    use crate::sslcertificatemanager::InMemorySslCertificateManager;
    use crate::state::InMemoryState;
    use crate::store::FakeManagedCertificateStore;
    use crate::ManagedCertificateSpec;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingMetrics {
        observed: Mutex<Vec<Duration>>,
    }

    impl Metrics for RecordingMetrics {
        fn observe_ssl_certificate_creation_latency(&self, latency: Duration) {
            self.observed.lock().unwrap().push(latency);
        }
    }

    /// Manager that fails every create while `fail_create` is set, delegating
    /// everything else to the in-memory backend.
    struct FlakyManager {
        inner: InMemorySslCertificateManager,
        fail_create: AtomicBool,
    }

    #[async_trait]
    impl SslCertificateManager for FlakyManager {
        async fn exists(&self, name: &str, id: &CertId) -> Result<bool, SslCertificateError> {
            self.inner.exists(name, id).await
        }

        async fn get(
            &self,
            name: &str,
            id: &CertId,
        ) -> Result<SslCertificate, SslCertificateError> {
            self.inner.get(name, id).await
        }

        async fn create(
            &self,
            name: &str,
            domains: &[String],
            id: &CertId,
        ) -> Result<(), SslCertificateError> {
            if self.fail_create.load(Ordering::Relaxed) {
                return Err(SslCertificateError::Backend(anyhow::anyhow!(
                    "simulated backend outage"
                )));
            }
            self.inner.create(name, domains, id).await
        }

        async fn delete(&self, name: &str, id: &CertId) -> Result<(), SslCertificateError> {
            self.inner.delete(name, id).await
        }
    }

    struct Fixture {
        store: Arc<FakeManagedCertificateStore>,
        state: Arc<InMemoryState>,
        ssl: Arc<InMemorySslCertificateManager>,
        metrics: Arc<RecordingMetrics>,
        sync: Sync,
    }

    fn id() -> CertId {
        CertId::new("default", "mcrt1")
    }

    fn mcrt(id: &CertId, domains: &[&str]) -> ManagedCertificate {
        let mut mcrt = ManagedCertificate::new(
            &id.name,
            ManagedCertificateSpec {
                domains: domains.iter().map(ToString::to_string).collect(),
            },
        );
        mcrt.metadata.namespace = Some(id.namespace.clone());
        mcrt.metadata.creation_timestamp = Some(Time(Utc::now()));
        mcrt
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FakeManagedCertificateStore::new());
        let state = Arc::new(InMemoryState::new());
        let ssl = Arc::new(InMemorySslCertificateManager::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let sync = Sync::new(
            Arc::clone(&store) as Arc<dyn ManagedCertificateStore>,
            Arc::clone(&state) as Arc<dyn State>,
            Arc::clone(&ssl) as Arc<dyn SslCertificateManager>,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            Arc::new(RandomNameGenerator),
        );
        Fixture {
            store,
            state,
            ssl,
            metrics,
            sync,
        }
    }

    fn latency_observations(f: &Fixture) -> usize {
        f.metrics.observed.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_untracked_absent_resource_is_a_noop() {
        let f = fixture();
        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(f.ssl.create_calls(), 0);
        assert_eq!(f.ssl.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_flag_only_entry_is_finalized_when_resource_absent() {
        let f = fixture();
        // A flag setter creates an entry without a certificate name.
        f.state.set_excluded_from_slo(&id());

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert!(f.state.ids().unwrap().is_empty());
        assert_eq!(f.ssl.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_first_pass_creates_and_copies_status() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(f.ssl.create_calls(), 1);

        let name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();
        assert!(name.starts_with("mcrt-"));
        assert!(f.ssl.exists(&name, &id()).await.unwrap());

        let status = f.store.stored(&id()).unwrap().status.unwrap();
        assert_eq!(status.certificate_status, "Active");
        assert_eq!(status.certificate_name, name);
        assert_eq!(status.domain_status[0].domain, "example.com");
    }

    #[tokio::test]
    async fn test_name_is_stable_and_create_happens_once() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));

        f.sync.managed_certificate(&id()).await.unwrap();
        let first = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        f.sync.managed_certificate(&id()).await.unwrap();
        let second = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(f.ssl.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_creation_latency_is_reported_exactly_once() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));

        f.sync.managed_certificate(&id()).await.unwrap();
        f.sync.managed_certificate(&id()).await.unwrap();
        f.sync.managed_certificate(&id()).await.unwrap();

        assert_eq!(latency_observations(&f), 1);
        assert!(f
            .state
            .is_ssl_certificate_creation_reported(&id())
            .unwrap());
    }

    #[tokio::test]
    async fn test_creation_latency_skipped_when_excluded_from_slo() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.state.set_excluded_from_slo(&id());

        f.sync.managed_certificate(&id()).await.unwrap();

        assert_eq!(latency_observations(&f), 0);
        assert!(!f
            .state
            .is_ssl_certificate_creation_reported(&id())
            .unwrap());
    }

    #[tokio::test]
    async fn test_drift_deletes_certificate_and_clears_entry() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.sync.managed_certificate(&id()).await.unwrap();
        let old_name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        // Desired intent changes; the provider-side certificate cannot follow.
        f.store.insert(mcrt(&id(), &["example.org"]));

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::DriftRemediated);
        assert_eq!(f.state.get_ssl_certificate_name(&id()).unwrap(), None);
        assert_eq!(f.ssl.delete_calls(), 1);

        // The follow-up pass starts from scratch with a fresh name.
        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        let new_name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();
        assert_ne!(new_name, old_name);
        assert_eq!(f.ssl.create_calls(), 2);

        let status = f.store.stored(&id()).unwrap().status.unwrap();
        assert_eq!(status.certificate_name, new_name);
        assert_eq!(status.domain_status[0].domain, "example.org");
    }

    #[tokio::test]
    async fn test_provider_side_mutation_is_drift_too() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.sync.managed_certificate(&id()).await.unwrap();
        let name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        // Someone edits the certificate behind the controller's back.
        f.ssl.put_domains(&name, vec!["tampered.example.com".to_string()]);

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::DriftRemediated);
        assert!(!f.ssl.exists(&name, &id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_recreated_entry_reports_latency_again() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.sync.managed_certificate(&id()).await.unwrap();

        f.store.insert(mcrt(&id(), &["example.org"]));
        f.sync.managed_certificate(&id()).await.unwrap();
        f.sync.managed_certificate(&id()).await.unwrap();

        // One observation per certificate lifetime; the drift remediation
        // cleared the entry, so the recreation is eligible again.
        assert_eq!(latency_observations(&f), 2);
    }

    #[tokio::test]
    async fn test_deleted_resource_finalizes_and_later_passes_are_noops() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.sync.managed_certificate(&id()).await.unwrap();
        let name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        f.store.delete(&id());

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(f.state.get_ssl_certificate_name(&id()).unwrap(), None);
        assert!(!f.ssl.exists(&name, &id()).await.unwrap());

        let create_calls = f.ssl.create_calls();
        let delete_calls = f.ssl.delete_calls();
        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(f.ssl.create_calls(), create_calls);
        assert_eq!(f.ssl.delete_calls(), delete_calls);
    }

    #[tokio::test]
    async fn test_soft_deleted_entry_is_cleaned_up() {
        let f = fixture();
        f.store.insert(mcrt(&id(), &["example.com"]));
        f.sync.managed_certificate(&id()).await.unwrap();
        let name = f.state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        f.state.set_soft_deleted(&id()).unwrap();

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert!(!f.ssl.exists(&name, &id()).await.unwrap());
        assert_eq!(f.state.get_ssl_certificate_name(&id()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_deletion_tolerates_already_absent_certificate() {
        let f = fixture();
        // Name recorded but the certificate was never created (crash between
        // name persistence and create), and the resource is gone.
        f.state
            .set_ssl_certificate_name(&id(), "mcrt-neverborn")
            .unwrap();

        let outcome = f.sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(f.state.get_ssl_certificate_name(&id()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_create_resumes_with_the_same_name() {
        let store = Arc::new(FakeManagedCertificateStore::new());
        let state = Arc::new(InMemoryState::new());
        let flaky = Arc::new(FlakyManager {
            inner: InMemorySslCertificateManager::new(),
            fail_create: AtomicBool::new(true),
        });
        let metrics = Arc::new(RecordingMetrics::default());
        let sync = Sync::new(
            Arc::clone(&store) as Arc<dyn ManagedCertificateStore>,
            Arc::clone(&state) as Arc<dyn State>,
            Arc::clone(&flaky) as Arc<dyn SslCertificateManager>,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            Arc::new(RandomNameGenerator),
        );

        store.insert(mcrt(&id(), &["example.com"]));

        let err = sync.managed_certificate(&id()).await.unwrap_err();
        assert!(matches!(err, SyncError::SslCertificate(_)));
        // The name survived the failed pass.
        let name = state.get_ssl_certificate_name(&id()).unwrap().unwrap();

        flaky.fail_create.store(false, Ordering::Relaxed);
        let outcome = sync.managed_certificate(&id()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(
            state.get_ssl_certificate_name(&id()).unwrap().unwrap(),
            name
        );
        assert!(flaky.inner.exists(&name, &id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_provisioning_certificate_still_converges() {
        let store = Arc::new(FakeManagedCertificateStore::new());
        let state = Arc::new(InMemoryState::new());
        let ssl = Arc::new(InMemorySslCertificateManager::with_initial_status("PROVISIONING"));
        let metrics = Arc::new(RecordingMetrics::default());
        let sync = Sync::new(
            Arc::clone(&store) as Arc<dyn ManagedCertificateStore>,
            Arc::clone(&state) as Arc<dyn State>,
            Arc::clone(&ssl) as Arc<dyn SslCertificateManager>,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
            Arc::new(RandomNameGenerator),
        );

        store.insert(mcrt(&id(), &["example.com"]));
        let outcome = sync.managed_certificate(&id()).await.unwrap();

        // Provisioning is server-side progress, not drift.
        assert_eq!(outcome, SyncOutcome::Synced);
        let status = store.stored(&id()).unwrap().status.unwrap();
        assert_eq!(status.certificate_status, "Provisioning");
        assert_eq!(status.domain_status[0].status, "Provisioning");
    }
}
