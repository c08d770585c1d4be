use std::{collections::HashMap, sync::RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::metadata_store::MetadataStore;

/// In-memory metadata storage
///
/// Stores documents in a HashMap. Not persistent. Used for testing and as a source for
/// [`StoreRemote`](crate::remote::StoreRemote) mirrors.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    meta: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(meta: HashMap<String, Vec<u8>>) -> Self {
        Self {
            meta: RwLock::new(meta),
        }
    }

    /// Copy of everything currently stored.
    pub fn contents(&self) -> Result<HashMap<String, Vec<u8>>> {
        let meta = self
            .meta
            .read()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;
        Ok(meta.clone())
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        log::trace!("get {name}.");

        let meta = self
            .meta
            .read()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;

        Ok(meta.get(name).map(ToOwned::to_owned))
    }

    async fn set(&self, name: &str, bytes: &[u8]) -> Result<()> {
        log::trace!("set {name}. size: {}", bytes.len());

        let mut meta = self
            .meta
            .write()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;
        meta.insert(name.to_owned(), bytes.to_vec());

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        log::trace!("remove {name}.");

        let mut meta = self
            .meta
            .write()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;
        meta.remove(name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("root").await.unwrap(), None);

        store.set("root", b"one").await.unwrap();
        store.set("root", b"two").await.unwrap();
        assert_eq!(store.get("root").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.contents().unwrap().len(), 1);

        store.remove("root").await.unwrap();
        store.remove("root").await.unwrap();
        assert_eq!(store.get("root").await.unwrap(), None);
    }
}
