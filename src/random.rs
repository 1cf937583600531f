//! Collision-resistant SslCertificate name generation.
//!
//! Provider-side certificate names are immutable once created, flat within a
//! project, and must be valid cloud resource names (lower case alphanumerics
//! and dashes, starting with a letter). Names are drawn from a v4 UUID under a
//! fixed `mcrt-` prefix so certificates created by this controller are
//! recognizable and never collide with each other in practice.

use anyhow::Result;
use uuid::Uuid;

/// Source of new SslCertificate names.
pub trait NameGenerator: Send + Sync {
    /// Produce a fresh name. Each call returns a distinct value.
    fn name(&self) -> Result<String>;
}

/// Default [`NameGenerator`] backed by v4 UUIDs.
#[derive(Debug, Clone, Default)]
pub struct RandomNameGenerator;

impl NameGenerator for RandomNameGenerator {
    fn name(&self) -> Result<String> {
        Ok(format!("mcrt-{}", Uuid::new_v4().simple()))
    }
}
