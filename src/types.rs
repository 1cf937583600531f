//! Identity key for a ManagedCertificate and its provider-side SslCertificate.

use std::fmt;

use crate::ManagedCertificate;

/// Stable `(namespace, name)` key identifying one ManagedCertificate and the
/// SslCertificate provisioned for it. Used as the sole lookup key into the
/// state store, the SslCertificate manager, and the declarative store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CertId {
    pub namespace: String,
    pub name: String,
}

impl CertId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the id from a ManagedCertificate object. Objects delivered by
    /// the watcher always carry both fields; missing metadata maps to empty
    /// strings rather than panicking.
    #[must_use]
    pub fn from_object(mcrt: &ManagedCertificate) -> Self {
        Self {
            namespace: mcrt.metadata.namespace.clone().unwrap_or_default(),
            name: mcrt.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for CertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_namespace_slash_name() {
        let id = CertId::new("default", "mcrt1");
        assert_eq!(id.to_string(), "default/mcrt1");
    }

    #[test]
    fn test_ids_with_same_fields_are_equal() {
        assert_eq!(CertId::new("ns", "a"), CertId::new("ns", "a"));
        assert_ne!(CertId::new("ns", "a"), CertId::new("ns", "b"));
        assert_ne!(CertId::new("ns1", "a"), CertId::new("ns2", "a"));
    }
}
