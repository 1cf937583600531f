//! # Controller Harness
//!
//! Glue between kube-runtime's controller machinery and the sync core:
//!
//! - `reconcile` runs one sync pass for the object the watcher delivered and
//!   maps the outcome to a requeue action
//! - `error_policy` requeues failed objects with per-id Fibonacci backoff
//! - `sweep` periodically finalizes state entries whose ManagedCertificate no
//!   longer exists (without finalizers, the watcher stops delivering deleted
//!   objects, so cleanup needs its own trigger)
//!
//! kube-runtime never reconciles the same object concurrently, which provides
//! the single-flight-per-id guarantee the sync core requires. The sweep only
//! syncs ids whose object is gone, so it stays off the watcher's territory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube_runtime::controller::Action;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::backoff::BackoffRegistry;
use crate::event::EventSink;
use crate::metrics;
use crate::state::State;
use crate::store::ManagedCertificateStore;
use crate::sync::{Sync, SyncError, SyncOutcome};
use crate::types::CertId;
use crate::ManagedCertificate;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("sync failed: {0}")]
    SyncFailed(#[from] SyncError),
}

/// Shared context handed to every reconciliation.
pub struct Context {
    pub sync: Sync,
    pub state: Arc<dyn State>,
    pub store: Arc<dyn ManagedCertificateStore>,
    pub events: Option<EventSink>,
    pub backoffs: BackoffRegistry,
    /// Requeue interval after a converged pass.
    pub resync_interval: Duration,
    /// Requeue interval after a drift remediation; short, so the recreate
    /// pass happens promptly (but still as a separate invocation).
    pub drift_requeue: Duration,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

pub async fn reconcile(
    mcrt: Arc<ManagedCertificate>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcilerError> {
    let id = CertId::from_object(&mcrt);
    let start = Instant::now();
    metrics::increment_reconciliations();

    let result = ctx.sync.managed_certificate(&id).await;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if let Ok(ids) = ctx.state.ids() {
        metrics::set_tracked_certificates(ids.len() as i64);
    }

    match result {
        Ok(SyncOutcome::Synced) => {
            ctx.backoffs.reset(&id);
            let previously_bound = mcrt
                .status
                .as_ref()
                .is_some_and(|s| !s.certificate_name.is_empty());
            if !previously_bound {
                if let (Some(events), Ok(Some(name))) =
                    (&ctx.events, ctx.state.get_ssl_certificate_name(&id))
                {
                    events.create(&mcrt, &name).await;
                }
            }
            Ok(Action::requeue(ctx.resync_interval))
        }
        Ok(SyncOutcome::DriftRemediated) => {
            ctx.backoffs.reset(&id);
            metrics::increment_drift_remediations();
            warn!(
                "SslCertificate for ManagedCertificate {id} drifted from desired intent and was deleted, recreating on the next pass"
            );
            if let Some(events) = &ctx.events {
                let old_name = mcrt
                    .status
                    .as_ref()
                    .map(|s| s.certificate_name.as_str())
                    .unwrap_or_default();
                events.delete(&mcrt, old_name).await;
            }
            Ok(Action::requeue(ctx.drift_requeue))
        }
        Err(e) => {
            if let Some(events) = &ctx.events {
                events.backend_error(&mcrt, &e.to_string()).await;
            }
            Err(ReconcilerError::SyncFailed(e))
        }
    }
}

pub fn error_policy(
    mcrt: Arc<ManagedCertificate>,
    error: &ReconcilerError,
    ctx: Arc<Context>,
) -> Action {
    let id = CertId::from_object(&mcrt);
    metrics::increment_reconciliation_errors();
    let delay = ctx.backoffs.next_for(&id);
    error!(
        "Reconciliation error for ManagedCertificate {id}: {error} (requeue in {}s)",
        delay.as_secs()
    );
    Action::requeue(delay)
}

/// Periodically finalize tracked ids whose ManagedCertificate is gone.
///
/// Runs forever; spawn it alongside the controller. Ids with a live object
/// are left to the watcher so the two drivers never sync the same id.
pub async fn sweep(ctx: Arc<Context>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let ids = match ctx.state.ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!("State sweep failed to list tracked ids: {e}");
                continue;
            }
        };

        for id in ids {
            match ctx.store.get(&id).await {
                Ok(Some(_)) => {} // live object, the watcher owns it
                Ok(None) => {
                    info!("Sweep: finalizing deleted ManagedCertificate {id}");
                    if let Err(e) = ctx.sync.managed_certificate(&id).await {
                        metrics::increment_reconciliation_errors();
                        error!("Sweep: failed to finalize {id}: {e}");
                    }
                }
                Err(e) => {
                    error!("Sweep: failed to look up ManagedCertificate {id}: {e}");
                }
            }
        }
    }
}
