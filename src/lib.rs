//! # Managed Certificate Controller Library
//!
//! This library provides the core functionality for the Managed Certificate
//! Controller: a reconciliation state machine that keeps declarative
//! `ManagedCertificate` resources consistent with imperatively-created
//! SslCertificate resources in a cloud provider.
//!
//! ## Reconciliation Flow
//!
//! 1. Read the ManagedCertificate for an id
//! 2. Ensure a stable SslCertificate name is recorded in the state store
//! 3. Finalize deletion when the resource is gone or soft-deleted
//! 4. Create the SslCertificate if it does not exist (reporting creation
//!    latency once per id)
//! 5. Compare desired vs. observed configuration
//! 6. Converged: copy provider status back onto the resource.
//!    Drifted: delete the certificate and signal a retry - providers do not
//!    support in-place mutation of a certificate's domains, so remediation is
//!    destroy-and-recreate across two passes
//!
//! Tests for the sync algorithm are included in the module files
//! (e.g., sync.rs).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod backoff;
pub mod certificates;
pub mod controller;
pub mod event;
pub mod metrics;
pub mod random;
pub mod server;
pub mod sslcertificatemanager;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;

/// ManagedCertificate Custom Resource Definition
///
/// Declares a set of domains to secure with a provider-managed SSL
/// certificate. The controller owns the `status` subresource; users only
/// write the spec.
///
/// # Example
///
/// ```yaml
/// apiVersion: certificate-management.microscaler.io/v1
/// kind: ManagedCertificate
/// metadata:
///   name: example-cert
///   namespace: default
/// spec:
///   domains:
///     - example.com
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "certificate-management.microscaler.io",
    version = "v1",
    kind = "ManagedCertificate",
    namespaced,
    status = "ManagedCertificateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCertificateSpec {
    /// Domains the provisioned certificate must secure.
    pub domains: Vec<String>,
}

/// Status of the ManagedCertificate resource
///
/// Populated by the controller from the observed SslCertificate; never set by
/// users.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCertificateStatus {
    /// Overall provisioning status, e.g. `Active` or `Provisioning`.
    #[serde(default)]
    pub certificate_status: String,
    /// Per-domain provisioning status.
    #[serde(default)]
    pub domain_status: Vec<DomainStatus>,
    /// Name of the provider-side SslCertificate backing this resource.
    #[serde(default)]
    pub certificate_name: String,
    /// Certificate expiry reported by the provider, RFC 3339.
    #[serde(default)]
    pub expire_time: Option<String>,
}

/// Provisioning status of a single domain
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    pub domain: String,
    pub status: String,
}
