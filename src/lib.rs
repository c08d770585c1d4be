//! Client side trust updates for signed repository metadata.
//!
//! This crate keeps a local cache of TUF-style metadata (root, timestamp, snapshot, targets and
//! delegated targets) in sync with an untrusted server, refusing anything that breaks the
//! locally anchored chain of trust.

/// JCS canonical JSON, hashes and file metadata
pub mod canonical;

/// Repository handle and the update pipeline
pub mod client;

/// Repository configuration
pub mod config;

/// Signed metadata envelopes
pub mod envelope;

/// Update errors and rejection reasons
pub mod error;

/// Public keys and key ids
pub mod key;

/// Root, timestamp, snapshot and targets documents
pub mod metadata;

/// Local metadata cache backends (local filesystem, in-memory)
pub mod metadata_store;

/// Remote metadata sources (HTTP, store mirror)
pub mod remote;

/// Role names
pub mod role;

/// Metadata signers (ed25519, p256)
pub mod signer;

/// Test fixtures: a signed in-memory repository and cache corruption helpers
#[cfg(feature = "testutils")]
pub mod testutils;

/// Documents accepted by an update and target lookup
pub mod trusted;

/// Signature, expiry, version and hash checks
pub mod validator;

pub use client::{Repository, UpdateReport};
pub use config::RepositoryConfig;
pub use error::{Rejection, UpdateError};
pub use role::RoleName;
