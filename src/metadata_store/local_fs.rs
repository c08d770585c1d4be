use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, trace};

use crate::metadata_store::MetadataStore;

/// Metadata cache on the local filesystem.
///
/// Documents live at `{base}/tuf/{gun}/metadata/{name}.json`; delegated role names containing
/// `/` map to subdirectories.
pub struct LocalFs {
    path: PathBuf,
}

impl LocalFs {
    pub fn new(base: &Path, gun: &str) -> Result<Self> {
        let mut path = base.join("tuf");
        path.push(relative_path(gun)?);
        path.push("metadata");
        Ok(Self { path })
    }

    /// Directory documents are stored under.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, name: &str) -> Result<PathBuf> {
        let mut path = self.path.join(relative_path(name)?);
        let file_name = match path.file_name() {
            Some(file_name) => format!("{}.json", file_name.to_string_lossy()),
            None => bail!("'{name}' does not name a file"),
        };
        path.set_file_name(file_name);
        Ok(path)
    }
}

/// Only plain, relative components are accepted.
fn relative_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains('\\') {
        bail!("invalid metadata name '{name}'");
    }
    let path = Path::new(name);
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("metadata name '{name}' must be a plain relative path");
    }
    Ok(path.to_path_buf())
}

#[async_trait]
impl MetadataStore for LocalFs {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        trace!("get {name}.");

        let path = self.file_for(name)?;
        match fs::read(&path) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, name: &str, meta: &[u8]) -> Result<()> {
        trace!("set {name}. size: {}", meta.len());

        let path = self.file_for(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // write then rename so readers never see a partial document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, meta)?;
        fs::rename(&tmp, &path)?;

        debug!("wrote {}", path.display());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        trace!("remove {name}.");

        let path = self.file_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (PathBuf, LocalFs) {
        let base = std::env::temp_dir().join(format!("tuf-client-{}", uuid::Uuid::new_v4()));
        let store = LocalFs::new(&base, "example.com/collection").unwrap();
        (base, store)
    }

    #[tokio::test]
    async fn stores_nested_role_names() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (base, store) = temp_store();

        assert_eq!(store.get("targets/a/b").await.unwrap(), None);
        store.set("targets/a/b", b"delegated").await.unwrap();
        store.set("root", b"root").await.unwrap();

        assert_eq!(
            store.get("targets/a/b").await.unwrap(),
            Some(b"delegated".to_vec())
        );
        assert!(base
            .join("tuf/example.com/collection/metadata/targets/a/b.json")
            .exists());
        assert!(store.path().join("root.json").exists());

        store.remove("targets/a/b").await.unwrap();
        store.remove("targets/a/b").await.unwrap();
        assert_eq!(store.get("targets/a/b").await.unwrap(), None);

        let _ = fs::remove_dir_all(base);
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let (base, store) = temp_store();

        for name in ["../root", "/etc/passwd", "targets/../../x", "", "a\\b", "./root"] {
            assert!(store.set(name, b"x").await.is_err(), "{name} accepted");
            assert!(store.get(name).await.is_err(), "{name} accepted");
        }
        assert!(LocalFs::new(&base, "../escape").is_err());

        let _ = fs::remove_dir_all(base);
    }
}
