use std::path::{Path, PathBuf};

use crate::Result;

/// Remote object store keyed by file name.
pub trait BlobStore: Send + Sync {
    /// Copy `key` into `dest`. Returns `false` when the object does not exist.
    fn fetch(&self, key: &str, dest: &Path) -> Result<bool>;

    /// Upload `src` as `key`, replacing any previous object.
    fn put(&self, key: &str, src: &Path) -> Result<()>;

    /// Keys of every stored object, in no particular order.
    fn list(&self) -> Result<Vec<String>>;
}

/// A remote mounted as a local directory.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for DirBlobStore {
    fn fetch(&self, key: &str, dest: &Path) -> Result<bool> {
        let src = self.root.join(key);
        if !src.is_file() {
            return Ok(false);
        }
        std::fs::copy(&src, dest)?;
        Ok(true)
    }

    fn put(&self, key: &str, src: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)?
            .into_temp_path();
        std::fs::copy(src, &temp)?;
        temp.persist(self.root.join(key)).map_err(|err| err.error)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                keys.push(name);
            }
        }
        Ok(keys)
    }
}
