//! # State Store
//!
//! Tracks, per ManagedCertificate id, the name of the SslCertificate assigned
//! to it and three lifecycle flags:
//!
//! - `soft_deleted` - the ManagedCertificate is gone but provider-side cleanup
//!   is still pending
//! - `excluded_from_slo` - never report creation latency for this id
//! - `creation_reported` - creation latency has been reported already
//!
//! The SslCertificate name is assigned at most once per entry and never
//! changes while the entry exists. It must be persisted before any create
//! call is issued against the provider, so a retry after a crash rediscovers
//! the earlier creation attempt by name instead of leaking an orphan.
//!
//! An entry is removed only once deletion of the SslCertificate has been
//! confirmed (or the certificate turned out to be absent already).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use crate::types::CertId;

/// Per-id tracking record.
#[derive(Debug, Clone, Default)]
struct Entry {
    ssl_certificate_name: Option<String>,
    soft_deleted: bool,
    excluded_from_slo: bool,
    creation_reported: bool,
}

/// Keyed store for per-certificate reconciliation state.
///
/// Implementations may be backed by durable storage (a ConfigMap, etcd); every
/// operation is therefore fallible even though the in-memory reference
/// implementation cannot fail. Lookups on an untracked id return `Ok(None)` /
/// `Ok(false)` - "not tracked" is expected control flow, not an error.
pub trait State: Send + Sync {
    /// SslCertificate name recorded for `id`, if the id is tracked and a name
    /// has been assigned.
    fn get_ssl_certificate_name(&self, id: &CertId) -> Result<Option<String>>;

    /// Record the SslCertificate name for `id`, creating the entry if needed.
    fn set_ssl_certificate_name(&self, id: &CertId, name: &str) -> Result<()>;

    fn is_soft_deleted(&self, id: &CertId) -> Result<bool>;
    fn set_soft_deleted(&self, id: &CertId) -> Result<()>;

    fn is_excluded_from_slo(&self, id: &CertId) -> Result<bool>;

    fn is_ssl_certificate_creation_reported(&self, id: &CertId) -> Result<bool>;
    fn set_ssl_certificate_creation_reported(&self, id: &CertId) -> Result<()>;

    /// Drop the entry for `id` entirely. Removing an untracked id is a no-op.
    fn remove(&self, id: &CertId) -> Result<()>;

    /// All tracked ids. The controller sweep uses this to re-sync entries
    /// whose ManagedCertificate no longer exists.
    fn ids(&self) -> Result<Vec<CertId>>;
}

/// In-memory reference implementation of [`State`].
///
/// The controller requires at most one sync per id in flight at a time; under
/// that discipline a plain mutex around the map is sufficient.
#[derive(Debug, Default)]
pub struct InMemoryState {
    entries: Mutex<HashMap<CertId, Entry>>,
}

impl InMemoryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(&self, id: &CertId, f: impl FnOnce(&mut Entry) -> T) -> T {
        let mut entries = self.entries.lock().expect("state mutex poisoned");
        f(entries.entry(id.clone()).or_default())
    }

    fn read<T>(&self, id: &CertId, f: impl FnOnce(Option<&Entry>) -> T) -> T {
        let entries = self.entries.lock().expect("state mutex poisoned");
        f(entries.get(id))
    }
}

impl State for InMemoryState {
    fn get_ssl_certificate_name(&self, id: &CertId) -> Result<Option<String>> {
        Ok(self.read(id, |e| e.and_then(|e| e.ssl_certificate_name.clone())))
    }

    fn set_ssl_certificate_name(&self, id: &CertId, name: &str) -> Result<()> {
        self.with_entry(id, |e| e.ssl_certificate_name = Some(name.to_string()));
        Ok(())
    }

    fn is_soft_deleted(&self, id: &CertId) -> Result<bool> {
        Ok(self.read(id, |e| e.is_some_and(|e| e.soft_deleted)))
    }

    fn set_soft_deleted(&self, id: &CertId) -> Result<()> {
        self.with_entry(id, |e| e.soft_deleted = true);
        Ok(())
    }

    fn is_excluded_from_slo(&self, id: &CertId) -> Result<bool> {
        Ok(self.read(id, |e| e.is_some_and(|e| e.excluded_from_slo)))
    }

    fn is_ssl_certificate_creation_reported(&self, id: &CertId) -> Result<bool> {
        Ok(self.read(id, |e| e.is_some_and(|e| e.creation_reported)))
    }

    fn set_ssl_certificate_creation_reported(&self, id: &CertId) -> Result<()> {
        self.with_entry(id, |e| e.creation_reported = true);
        Ok(())
    }

    fn remove(&self, id: &CertId) -> Result<()> {
        self.entries
            .lock()
            .expect("state mutex poisoned")
            .remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<CertId>> {
        let entries = self.entries.lock().expect("state mutex poisoned");
        Ok(entries.keys().cloned().collect())
    }
}

impl InMemoryState {
    /// Mark an id as excluded from SLO latency accounting. Exists so tests and
    /// operators can opt certificates out; the sync pass only reads the flag.
    pub fn set_excluded_from_slo(&self, id: &CertId) {
        self.with_entry(id, |e| e.excluded_from_slo = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> CertId {
        CertId::new("default", "mcrt1")
    }

    #[test]
    fn test_untracked_id_reads_as_absent() {
        let state = InMemoryState::new();
        assert_eq!(state.get_ssl_certificate_name(&id()).unwrap(), None);
        assert!(!state.is_soft_deleted(&id()).unwrap());
        assert!(!state.is_excluded_from_slo(&id()).unwrap());
        assert!(!state.is_ssl_certificate_creation_reported(&id()).unwrap());
        assert!(state.ids().unwrap().is_empty());
    }

    #[test]
    fn test_name_round_trip() {
        let state = InMemoryState::new();
        state.set_ssl_certificate_name(&id(), "mcrt-abc123").unwrap();
        assert_eq!(
            state.get_ssl_certificate_name(&id()).unwrap(),
            Some("mcrt-abc123".to_string())
        );
        assert_eq!(state.ids().unwrap(), vec![id()]);
    }

    #[test]
    fn test_flags_are_independent() {
        let state = InMemoryState::new();
        state.set_soft_deleted(&id()).unwrap();
        assert!(state.is_soft_deleted(&id()).unwrap());
        assert!(!state.is_ssl_certificate_creation_reported(&id()).unwrap());

        state.set_ssl_certificate_creation_reported(&id()).unwrap();
        assert!(state.is_ssl_certificate_creation_reported(&id()).unwrap());
    }

    #[test]
    fn test_remove_clears_everything() {
        let state = InMemoryState::new();
        state.set_ssl_certificate_name(&id(), "mcrt-abc123").unwrap();
        state.set_soft_deleted(&id()).unwrap();
        state.remove(&id()).unwrap();

        assert_eq!(state.get_ssl_certificate_name(&id()).unwrap(), None);
        assert!(!state.is_soft_deleted(&id()).unwrap());
        assert!(state.ids().unwrap().is_empty());
    }

    #[test]
    fn test_remove_untracked_is_noop() {
        let state = InMemoryState::new();
        state.remove(&id()).unwrap();
    }

    #[test]
    fn test_entries_are_keyed_per_id() {
        let state = InMemoryState::new();
        let other = CertId::new("default", "mcrt2");
        state.set_ssl_certificate_name(&id(), "mcrt-abc123").unwrap();
        state.set_soft_deleted(&other).unwrap();

        assert!(!state.is_soft_deleted(&id()).unwrap());
        assert_eq!(state.get_ssl_certificate_name(&other).unwrap(), None);
    }
}
