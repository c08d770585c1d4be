use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::metadata_store::MetadataStore;

#[cfg(feature = "remote-http")]
pub mod http;

#[cfg(feature = "remote-http")]
pub use http::HttpRemote;

/// Untrusted source of metadata documents.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document by name.
    ///
    /// `Ok(None)` means the server does not have the document. Implementations should refuse to
    /// read more than `max_size` bytes.
    async fn fetch(&self, name: &str, max_size: u64) -> Result<Option<Vec<u8>>>;
}

/// Serves the contents of a [`MetadataStore`] as a remote, e.g. a pre-synced mirror.
pub struct StoreRemote {
    store: Arc<dyn MetadataStore>,
}

impl StoreRemote {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RemoteStore for StoreRemote {
    async fn fetch(&self, name: &str, _max_size: u64) -> Result<Option<Vec<u8>>> {
        log::trace!("fetch {name} from store mirror.");
        self.store.get(name).await
    }
}
