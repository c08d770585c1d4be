use crate::{role::RoleName, trusted::TrustedMetadata};

/// Where the trust anchor of an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorOrigin {
    /// Root already held in the local cache
    Local,
    /// Root fetched from the remote on first use
    Remote,
    /// Remote root accepted against the pinned root keys after the cached root was lost
    Pinned,
}

/// Where the accepted copy of a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Remote,
}

/// What happened when the accepted copy was written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    /// The cache already holds these bytes
    NotNeeded,
    Written,
    /// The write failed; the update carried on without it
    Failed(String),
}

/// Outcome of one role in an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOutcome {
    pub role: RoleName,
    pub version: u64,
    pub source: Source,
    pub persisted: Persisted,
}

/// Result of a successful [`Repository::update`](crate::client::Repository::update).
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub for_write: bool,
    pub anchor_origin: AnchorOrigin,
    /// Number of root versions accepted during this update
    pub root_rotations: u64,
    /// One entry per accepted role, in update order
    pub roles: Vec<RoleOutcome>,
    pub metadata: TrustedMetadata,
}

impl UpdateReport {
    pub fn outcome(&self, role: &RoleName) -> Option<&RoleOutcome> {
        self.roles.iter().find(|outcome| &outcome.role == role)
    }

    /// Roles whose accepted copy could not be cached.
    pub fn persistence_failures(&self) -> impl Iterator<Item = &RoleOutcome> {
        self.roles
            .iter()
            .filter(|outcome| matches!(outcome.persisted, Persisted::Failed(_)))
    }
}
