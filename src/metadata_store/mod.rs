use anyhow::Result;
use async_trait::async_trait;

#[cfg(feature = "store-memory")]
pub mod in_memory;
#[cfg(feature = "store-local")]
pub mod local_fs;

#[cfg(feature = "store-memory")]
pub use in_memory::InMemoryStore;
#[cfg(feature = "store-local")]
pub use local_fs::LocalFs;

/// Local cache of metadata documents, keyed by name (`root`, `targets/a`, `2.root`, ...).
///
/// Writes for different names fail independently; the update engine decides which failures
/// are fatal.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Get a document from the store. `Ok(None)` if it is not present.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Put a document into the store, replacing any previous bytes.
    async fn set(&self, name: &str, meta: &[u8]) -> Result<()>;

    /// Remove a document. Removing an absent document is not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}
