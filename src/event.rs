//! # Events
//!
//! Human-facing Kubernetes Events attached to ManagedCertificate objects.
//! Emitted by the controller harness on notable transitions; purely
//! informational and best-effort - a failed publish is logged and dropped,
//! never surfaced to the reconciliation core.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::ManagedCertificate;

const COMPONENT: &str = "managed-certificate-controller";

const REASON_CREATE: &str = "Create";
const REASON_DELETE: &str = "Delete";
const REASON_BACKEND_ERROR: &str = "BackendError";

/// Event publisher for ManagedCertificate transitions.
#[derive(Clone)]
pub struct EventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

impl EventSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: COMPONENT.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    /// An SslCertificate was created for this ManagedCertificate.
    pub async fn create(&self, mcrt: &ManagedCertificate, ssl_certificate_name: &str) {
        self.publish(
            mcrt,
            EventType::Normal,
            REASON_CREATE,
            format!("Create SslCertificate {ssl_certificate_name}"),
        )
        .await;
    }

    /// The SslCertificate backing this ManagedCertificate was deleted.
    pub async fn delete(&self, mcrt: &ManagedCertificate, ssl_certificate_name: &str) {
        self.publish(
            mcrt,
            EventType::Normal,
            REASON_DELETE,
            format!("Delete SslCertificate {ssl_certificate_name}"),
        )
        .await;
    }

    /// A provider or store call failed while reconciling this object.
    pub async fn backend_error(&self, mcrt: &ManagedCertificate, error: &str) {
        self.publish(mcrt, EventType::Warning, REASON_BACKEND_ERROR, error.to_string())
            .await;
    }

    async fn publish(&self, mcrt: &ManagedCertificate, type_: EventType, reason: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &mcrt.object_ref(&())).await {
            warn!("Failed to publish {reason} event: {e}");
        }
    }
}
