//! # CRD Generator
//!
//! Generates the Kubernetes CustomResourceDefinition YAML for the
//! `ManagedCertificate` resource from its Rust type definition.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/managedcertificate.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;

use managed_certificate_controller::ManagedCertificate;

fn main() {
    let crd = ManagedCertificate::crd();
    print!(
        "{}",
        serde_yaml::to_string(&crd).expect("CRD serialization should never fail")
    );
}
