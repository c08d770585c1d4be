use anyhow::anyhow;
use log::{debug, warn};

use super::{
    pins::{PinnedRoot, PINNED_ROOT},
    report::Persisted,
};
use crate::{
    canonical::FileMeta,
    envelope::SignedMetadata,
    error::{Rejection, UpdateError},
    metadata::{Authority, Metadata, Root},
    metadata_store::MetadataStore,
    role::RoleName,
    validator::Validator,
};

/// What the cache holds for one role.
#[derive(Debug)]
pub(crate) enum LocalState<T> {
    Missing,
    /// Present but unusable. `version_floor` is the version of the copy when its signatures
    /// still verify, 0 otherwise.
    Invalid {
        reason: Rejection,
        version_floor: u64,
    },
    Valid(SignedMetadata<T>),
}

impl<T: Metadata> LocalState<T> {
    /// Lowest version a fetched replacement may have.
    pub fn version_floor(&self) -> u64 {
        match self {
            LocalState::Missing => 0,
            LocalState::Invalid { version_floor, .. } => *version_floor,
            LocalState::Valid(document) => document.version(),
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            LocalState::Valid(document) => Some(&document.raw),
            _ => None,
        }
    }
}

/// Reads and writes the metadata cache on behalf of an update.
pub(crate) struct Cache<'a> {
    store: &'a dyn MetadataStore,
}

impl<'a> Cache<'a> {
    pub fn new(store: &'a dyn MetadataStore) -> Self {
        Self { store }
    }

    /// Raw cached bytes; read errors are logged and treated as absent.
    pub async fn read(&self, name: &str) -> Option<Vec<u8>> {
        match self.store.get(name).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to read cached {name}: {e}");
                None
            }
        }
    }

    /// Loads and checks the cached copy of `role`.
    ///
    /// Signatures are checked first so that only an authentic copy can raise the version floor.
    pub async fn load<T: Metadata>(
        &self,
        role: &RoleName,
        authority: &Authority,
        expected: Option<&FileMeta>,
        validator: &Validator,
    ) -> LocalState<T> {
        let Some(raw) = self.read(role.as_str()).await else {
            debug!("no cached {role}");
            return LocalState::Missing;
        };

        let document = match SignedMetadata::<T>::parse(raw) {
            Ok(document) => document,
            Err(reason) => return invalid(role, reason, 0),
        };
        if let Err(reason) = validator.check_signatures(&document, authority) {
            return invalid(role, reason, 0);
        }

        let version_floor = document.version();
        let checks = validator
            .check_expiry(document.signed.expires())
            .and_then(|()| match expected {
                Some(expected) => check_reference(validator, &document, expected),
                None => Ok(()),
            });
        match checks {
            Ok(()) => {
                debug!("cached {role} version {version_floor} is valid");
                LocalState::Valid(document)
            }
            Err(reason) => invalid(role, reason, version_floor),
        }
    }

    /// Writes the trusted root and pins its keys. Failure aborts the update.
    pub async fn persist_root(&self, root: &SignedMetadata<Root>) -> Result<(), UpdateError> {
        let pinned = pinned_keys(root)?;
        self.store
            .set(RoleName::Root.as_str(), &root.raw)
            .await
            .map_err(root_persistence)?;
        self.pin(&pinned).await
    }

    /// Pinned root keys; unreadable pins are logged and treated as absent.
    pub async fn pinned_root(&self) -> Option<PinnedRoot> {
        let raw = self.read(PINNED_ROOT).await?;
        match PinnedRoot::from_slice(&raw) {
            Ok(pinned) => Some(pinned),
            Err(reason) => {
                warn!("pinned root keys are unusable: {reason}");
                None
            }
        }
    }

    /// Pins the keys of `root` unless they are pinned already.
    pub async fn ensure_pinned(&self, root: &SignedMetadata<Root>) -> Result<(), UpdateError> {
        let current = pinned_keys(root)?;
        if self.pinned_root().await.as_ref() == Some(&current) {
            return Ok(());
        }
        self.pin(&current).await
    }

    async fn pin(&self, pinned: &PinnedRoot) -> Result<(), UpdateError> {
        let raw = pinned.to_vec().map_err(|e| root_persistence(e.into()))?;
        self.store
            .set(PINNED_ROOT, &raw)
            .await
            .map_err(root_persistence)?;
        debug!("pinned root keys of version {}", pinned.version);
        Ok(())
    }

    /// Reads the root back from the cache; it must be present after an accepted update.
    pub async fn read_back_root(&self) -> Result<Vec<u8>, UpdateError> {
        self.store
            .get(RoleName::Root.as_str())
            .await
            .map_err(root_persistence)?
            .ok_or_else(|| root_persistence(anyhow!("root is missing from the cache")))
    }

    /// Best-effort write of a non-root document.
    pub async fn persist(&self, role: &RoleName, raw: &[u8]) -> Persisted {
        match self.store.set(role.as_str(), raw).await {
            Ok(()) => Persisted::Written,
            Err(e) => {
                warn!("failed to cache {role}, continuing without it: {e}");
                Persisted::Failed(e.to_string())
            }
        }
    }
}

fn pinned_keys(root: &SignedMetadata<Root>) -> Result<PinnedRoot, UpdateError> {
    PinnedRoot::of(root).map_err(UpdateError::validation(&RoleName::Root))
}

fn root_persistence(source: anyhow::Error) -> UpdateError {
    UpdateError::PersistenceFailed {
        role: RoleName::Root,
        source,
    }
}

fn invalid<T>(role: &RoleName, reason: Rejection, version_floor: u64) -> LocalState<T> {
    warn!("cached {role} is unusable: {reason}");
    LocalState::Invalid {
        reason,
        version_floor,
    }
}

fn check_reference<T: Metadata>(
    validator: &Validator,
    document: &SignedMetadata<T>,
    expected: &FileMeta,
) -> Result<(), Rejection> {
    validator.check_file_meta(&document.raw, expected)?;
    match expected.version {
        Some(version) if version != document.version() => Err(Rejection::VersionMismatch {
            expected: version,
            received: document.version(),
        }),
        _ => Ok(()),
    }
}
