//! # Managed Certificate Controller
//!
//! A Kubernetes controller that provisions managed SSL certificates in a
//! cloud provider from declarative `ManagedCertificate` resources.
//!
//! ## Overview
//!
//! 1. **Watching ManagedCertificates** - across all namespaces
//! 2. **Stable naming** - each resource gets a collision-resistant
//!    SslCertificate name, recorded before any provider call
//! 3. **Provisioning** - missing SslCertificates are created; observed
//!    provider status is copied back onto the resource
//! 4. **Drift remediation** - certificates whose domains no longer match
//!    desired intent are deleted and recreated across two passes (providers
//!    do not support in-place updates of a certificate's domains)
//! 5. **SLO accounting** - creation latency is reported once per certificate
//! 6. **Prometheus metrics and probes** - HTTP endpoints for observability
//!
//! The provider backend is injected behind the `SslCertificateManager` trait.
//! This binary wires the in-memory backend; deployments with a real cloud
//! client supply their own via `controller::Context`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use tracing::{error, info, warn};

use managed_certificate_controller::backoff::BackoffRegistry;
use managed_certificate_controller::controller::{self, Context};
use managed_certificate_controller::event::EventSink;
use managed_certificate_controller::metrics::{self, PrometheusMetrics};
use managed_certificate_controller::random::RandomNameGenerator;
use managed_certificate_controller::server::{start_server, ServerState};
use managed_certificate_controller::sslcertificatemanager::{
    InMemorySslCertificateManager, SslCertificateManager,
};
use managed_certificate_controller::state::{InMemoryState, State};
use managed_certificate_controller::store::{KubeManagedCertificateStore, ManagedCertificateStore};
use managed_certificate_controller::sync::Sync;
use managed_certificate_controller::ManagedCertificate;

#[derive(Parser, Debug)]
#[command(
    name = "managed-certificate-controller",
    version,
    about = "Provisions managed SSL certificates from ManagedCertificate resources"
)]
struct Args {
    /// Port for the metrics and probe HTTP server.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    /// Seconds between re-syncs of a converged certificate.
    #[arg(long, default_value_t = 600)]
    resync_interval_seconds: u64,

    /// Seconds before re-syncing after a drift remediation.
    #[arg(long, default_value_t = 1)]
    drift_requeue_seconds: u64,

    /// Seconds between sweeps for deleted ManagedCertificates.
    #[arg(long, default_value_t = 300)]
    sweep_interval_seconds: u64,

    /// Minimum error backoff in minutes.
    #[arg(long, default_value_t = 1)]
    backoff_min_minutes: u64,

    /// Maximum error backoff in minutes.
    #[arg(long, default_value_t = 10)]
    backoff_max_minutes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "managed_certificate_controller=info".into()),
        )
        .init();

    // kube's rustls-tls needs a process-wide crypto provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!(
        "Starting Managed Certificate Controller (build {} {})",
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME"),
    );

    metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("HTTP server error: {e}");
        }
    });

    let client = Client::try_default().await?;

    let store: Arc<dyn ManagedCertificateStore> =
        Arc::new(KubeManagedCertificateStore::new(client.clone()));
    let state: Arc<dyn State> = Arc::new(InMemoryState::new());

    // A real cloud backend is injected here in deployments that have one.
    warn!("No cloud backend configured, running against the in-memory SslCertificate backend");
    let ssl: Arc<dyn SslCertificateManager> = Arc::new(InMemorySslCertificateManager::new());

    let sync = Sync::new(
        Arc::clone(&store),
        Arc::clone(&state),
        ssl,
        Arc::new(PrometheusMetrics),
        Arc::new(RandomNameGenerator),
    );

    let ctx = Arc::new(Context {
        sync,
        state,
        store,
        events: Some(EventSink::new(client.clone())),
        backoffs: BackoffRegistry::new(args.backoff_min_minutes, args.backoff_max_minutes),
        resync_interval: Duration::from_secs(args.resync_interval_seconds),
        drift_requeue: Duration::from_secs(args.drift_requeue_seconds),
    });

    // Finalizes state entries whose ManagedCertificate has been deleted.
    tokio::spawn(controller::sweep(
        Arc::clone(&ctx),
        Duration::from_secs(args.sweep_interval_seconds),
    ));

    let certificates: Api<ManagedCertificate> = Api::all(client);

    server_state.is_ready.store(true, Ordering::Relaxed);

    Controller::new(certificates, watcher::Config::default())
        .shutdown_on_signal()
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(|_| std::future::ready(()))
        .await;

    info!("Controller stopped");

    Ok(())
}
