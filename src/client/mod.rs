//! Repository handle and the trust update pipeline.
//!
//! An update runs in a fixed order: resolve the trust anchor, walk root rotations, then accept
//! timestamp, snapshot and targets (with delegations), each checked against the document
//! before it.

mod anchor;
mod cache;
mod pins;
mod report;
mod rotation;
mod update;

use std::sync::Arc;

use log::{info, trace};
use tokio::sync::Mutex;

pub use report::{AnchorOrigin, Persisted, RoleOutcome, Source, UpdateReport};

use crate::{
    config::RepositoryConfig,
    error::UpdateError,
    metadata_store::MetadataStore,
    remote::RemoteStore,
    role::RoleName,
    validator::Validator,
};

/// A single repository: a local metadata cache kept in sync with an untrusted remote.
///
/// Clones share one update lock. Separately constructed values over the same cache are not
/// serialized against each other, so keep one `Repository` per cache and clone it.
#[derive(Clone)]
pub struct Repository {
    config: RepositoryConfig,
    cache: Arc<dyn MetadataStore>,
    remote: Arc<dyn RemoteStore>,
    update_lock: Arc<Mutex<()>>,
}

impl Repository {
    pub fn new(
        config: RepositoryConfig,
        cache: Arc<dyn MetadataStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            cache,
            remote,
            update_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Builds a repository backed by the filesystem cache and the HTTP remote named in the
    /// config.
    #[cfg(all(feature = "store-local", feature = "remote-http"))]
    pub fn from_config(config: RepositoryConfig) -> anyhow::Result<Self> {
        use anyhow::anyhow;

        use crate::{metadata_store::LocalFs, remote::HttpRemote};

        let cache_dir = config
            .cache_dir
            .clone()
            .ok_or_else(|| anyhow!("cache_dir is required"))?;
        let server_url = config
            .server_url
            .clone()
            .ok_or_else(|| anyhow!("server_url is required"))?;

        let cache = LocalFs::new(&cache_dir, &config.gun)?;
        let remote = HttpRemote::new(&server_url, &config.gun, config.request_timeout())?;

        Ok(Self::new(config, Arc::new(cache), Arc::new(remote)))
    }

    pub fn gun(&self) -> &str {
        &self.config.gun
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn MetadataStore> {
        &self.cache
    }

    /// Brings the local cache up to date with the remote.
    ///
    /// Updates through this value and its clones are serialized. `for_write` is reported back
    /// but does not relax any check.
    pub async fn update(&self, for_write: bool) -> Result<UpdateReport, UpdateError> {
        let _guard = self.update_lock.lock().await;
        info!("updating {} (for_write: {for_write})", self.gun());

        let session = Session {
            config: &self.config,
            cache: cache::Cache::new(self.cache.as_ref()),
            remote: self.remote.as_ref(),
            validator: Validator::default(),
        };
        update::run(&session, for_write).await
    }
}

/// Everything one update needs, borrowed from the repository.
pub(crate) struct Session<'a> {
    pub config: &'a RepositoryConfig,
    pub cache: cache::Cache<'a>,
    pub remote: &'a dyn RemoteStore,
    pub validator: Validator,
}

impl Session<'_> {
    /// Fetches `name` on behalf of `role`; `Ok(None)` is "not found".
    pub async fn fetch(
        &self,
        role: &RoleName,
        name: &str,
        max_size: u64,
    ) -> Result<Option<Vec<u8>>, UpdateError> {
        trace!("fetching {name} for {role}");
        self.remote
            .fetch(name, max_size)
            .await
            .map_err(|source| UpdateError::Remote {
                role: role.clone(),
                source,
            })
    }

    pub fn size_limit(&self) -> u64 {
        self.config.max_metadata_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "store-memory")]
    #[tokio::test]
    async fn clones_share_the_update_lock() {
        use crate::{metadata_store::InMemoryStore, remote::StoreRemote};

        let repo = Repository::new(
            RepositoryConfig::new("example.com/app"),
            Arc::new(InMemoryStore::new()),
            Arc::new(StoreRemote::new(Arc::new(InMemoryStore::new()))),
        );
        let clone = repo.clone();

        let guard = repo.update_lock.lock().await;
        assert!(clone.update_lock.try_lock().is_err());
        drop(guard);
        assert!(clone.update_lock.try_lock().is_ok());
    }

    #[cfg(all(feature = "store-local", feature = "remote-http"))]
    #[test]
    fn from_config_requires_cache_and_server() {
        let config = RepositoryConfig::new("example.com/app");
        assert!(Repository::from_config(config.clone()).is_err());
        assert!(Repository::from_config(
            config
                .clone()
                .with_cache_dir(std::env::temp_dir().join("tuf-client"))
        )
        .is_err());

        let repo = Repository::from_config(
            config
                .with_cache_dir(std::env::temp_dir().join("tuf-client"))
                .with_server_url("https://notary.example.com"),
        )
        .unwrap();
        assert_eq!(repo.gun(), "example.com/app");
        assert_eq!(repo.config().max_root_rotations, 256);
    }
}
