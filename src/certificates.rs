//! # Drift Comparator
//!
//! Decides whether a ManagedCertificate and an observed SslCertificate
//! represent the same configuration, and copies provider status back onto the
//! ManagedCertificate.
//!
//! Only fields that originate from desired intent participate in the
//! comparison - today that is the domain list. Server-populated fields
//! (provisioning status, expiry) are ignored: a certificate that is still
//! provisioning is not drifted.

use anyhow::{bail, Result};

use crate::sslcertificatemanager::SslCertificate;
use crate::{DomainStatus, ManagedCertificate, ManagedCertificateStatus};

/// Whether `mcrt` and `ssl_cert` agree on the desired configuration.
/// Order-insensitive on domains.
#[must_use]
pub fn equal(mcrt: &ManagedCertificate, ssl_cert: &SslCertificate) -> bool {
    let mut desired = mcrt.spec.domains.clone();
    let mut observed = ssl_cert.domains.clone();
    desired.sort();
    observed.sort();
    desired == observed
}

/// Copy the observed provider status onto `mcrt`'s status subresource.
///
/// Translates provider status vocabulary into the CRD's; the spec is left
/// untouched. Fails on a status string the controller does not know, rather
/// than writing something misleading.
pub fn copy_status(ssl_cert: &SslCertificate, mcrt: &mut ManagedCertificate) -> Result<()> {
    let mut domain_status = Vec::with_capacity(ssl_cert.domain_status.len());
    for (domain, status) in &ssl_cert.domain_status {
        domain_status.push(DomainStatus {
            domain: domain.clone(),
            status: translate_domain_status(status)?.to_string(),
        });
    }

    mcrt.status = Some(ManagedCertificateStatus {
        certificate_status: translate_certificate_status(&ssl_cert.status)?.to_string(),
        domain_status,
        certificate_name: ssl_cert.name.clone(),
        expire_time: ssl_cert.expire_time.clone(),
    });
    Ok(())
}

fn translate_certificate_status(status: &str) -> Result<&'static str> {
    Ok(match status {
        "" | "MANAGED_CERTIFICATE_STATUS_UNSPECIFIED" => "",
        "ACTIVE" => "Active",
        "PROVISIONING" => "Provisioning",
        "PROVISIONING_FAILED" => "ProvisioningFailed",
        "PROVISIONING_FAILED_PERMANENTLY" => "ProvisioningFailedPermanently",
        "RENEWAL_FAILED" => "RenewalFailed",
        other => bail!("unknown SslCertificate status: {other}"),
    })
}

fn translate_domain_status(status: &str) -> Result<&'static str> {
    Ok(match status {
        "ACTIVE" => "Active",
        "PROVISIONING" => "Provisioning",
        "FAILED_NOT_VISIBLE" => "FailedNotVisible",
        "FAILED_CAA_CHECKING" => "FailedCaaChecking",
        "FAILED_CAA_FORBIDDEN" => "FailedCaaForbidden",
        "FAILED_RATE_LIMITED" => "FailedRateLimited",
        other => bail!("unknown SslCertificate domain status: {other}"),
    })
}
