use chrono::{DateTime, Utc};

use crate::{metadata::DocumentType, role::RoleName};

/// Errors returned by [`Repository::update`](crate::client::Repository::update).
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// No root is available locally and the remote server does not know the repository.
    #[error("repository {gun} does not exist")]
    RepositoryNotExist {
        /// Globally unique name of the repository
        gun: String,
    },

    /// A required document is absent both locally and remotely.
    #[error("{role} metadata not found")]
    MetaNotFound {
        /// Role whose document is missing
        role: RoleName,
    },

    /// A document was rejected and no valid fallback exists.
    #[error("{role} metadata failed validation: {reason}")]
    ValidationFailed {
        /// Role of the rejected document
        role: RoleName,
        /// Why the document was rejected
        reason: Rejection,
    },

    /// The metadata cache could not store or read back a document the update depends on.
    #[error("failed to persist {role} metadata: {source}")]
    PersistenceFailed {
        /// Role whose document could not be persisted
        role: RoleName,
        /// Underlying cache error
        #[source]
        source: anyhow::Error,
    },

    /// The remote source failed for a reason other than "not found".
    #[error("failed to fetch {role} metadata: {source}")]
    Remote {
        /// Role that was being fetched
        role: RoleName,
        /// Underlying transport error
        #[source]
        source: anyhow::Error,
    },
}

impl UpdateError {
    /// The role the error refers to, if any.
    pub fn role(&self) -> Option<&RoleName> {
        match self {
            UpdateError::RepositoryNotExist { .. } => None,
            UpdateError::MetaNotFound { role }
            | UpdateError::ValidationFailed { role, .. }
            | UpdateError::PersistenceFailed { role, .. }
            | UpdateError::Remote { role, .. } => Some(role),
        }
    }

    pub(crate) fn validation(role: &RoleName) -> impl FnOnce(Rejection) -> UpdateError + '_ {
        move |reason| UpdateError::ValidationFailed {
            role: role.clone(),
            reason,
        }
    }
}

/// Reason a metadata document was rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("expected {expected} metadata, found {found:?}")]
    WrongType {
        expected: DocumentType,
        found: String,
    },

    #[error("signature threshold not met: {valid} valid of {threshold} required")]
    ThresholdNotMet { valid: usize, threshold: u32 },

    #[error("metadata expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("rollback detected: trusted version {trusted}, received {received}")]
    Rollback { trusted: u64, received: u64 },

    #[error("version mismatch: expected {expected}, received {received}")]
    VersionMismatch { expected: u64, received: u64 },

    #[error("length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("sha256 mismatch: expected {expected}, received {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("metadata is {actual} bytes, limit is {limit}")]
    TooLarge { limit: u64, actual: u64 },

    #[error("no keys declared for role {0}")]
    UnknownRole(String),

    #[error("root rotation exceeded {0} steps")]
    TooManyRotations(u64),
}

impl Rejection {
    pub(crate) fn malformed(e: impl std::fmt::Display) -> Self {
        Rejection::Malformed(e.to_string())
    }
}
