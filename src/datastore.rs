// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage for verified metadata and the package index.

use crate::error::{self, Result};
use crate::schema::{INDEX_TAR, INDEX_TAR_GZ, ROOT_JSON, SNAPSHOT_JSON, TIMESTAMP_JSON};
use log::debug;
use snafu::ResultExt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// `Datastore` persists the client's verified view of a repository under a
/// fixed layout:
///
/// ```text
/// <cache-root>/
///   root.json            # current trusted root
///   timestamp.json       # last verified timestamp
///   snapshot.json        # last verified snapshot
///   00-index.tar(.gz)    # last verified index
/// ```
///
/// All replacement is write-to-temp-then-rename, so a crash or failed
/// verification can never leave a partial file as the current one. Files are
/// written with the exact bytes that were fetched and verified; nothing is
/// ever re-serialized, so a cached file always reproduces its recorded
/// digest.
#[derive(Debug, Clone)]
pub(crate) struct Datastore {
    dir: PathBuf,
}

impl Datastore {
    pub(crate) fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).context(error::CacheDirectoryCreateSnafu { path: &dir })?;
        Ok(Self { dir })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path of `file` if it is currently present in the store.
    pub(crate) fn path_if_exists(&self, file: &str) -> Option<PathBuf> {
        let path = self.dir.join(file);
        path.is_file().then_some(path)
    }

    /// Creates a temporary file in the store's directory, so a later
    /// `persist` is a same-filesystem atomic rename. Dropping the handle
    /// deletes the file.
    pub(crate) fn temp_file(&self, suffix: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(".fetch")
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .context(error::CacheTempFileSnafu { path: &self.dir })
    }

    /// Atomically installs `temp` as the current `file`.
    pub(crate) fn persist(&self, temp: NamedTempFile, file: &str) -> Result<PathBuf> {
        let path = self.dir.join(file);
        debug!("caching '{}'", path.display());
        temp.persist(&path)
            .context(error::CacheFilePersistSnafu { path: &path })?;
        Ok(path)
    }

    /// Atomically installs `temp` as the current index, removing the other
    /// compression form so exactly one index is ever current.
    pub(crate) fn persist_index(&self, temp: NamedTempFile, gzipped: bool) -> Result<PathBuf> {
        let (current, stale) = if gzipped {
            (INDEX_TAR_GZ, INDEX_TAR)
        } else {
            (INDEX_TAR, INDEX_TAR_GZ)
        };
        let path = self.persist(temp, current)?;
        self.remove(stale)?;
        Ok(path)
    }

    /// The current index file, preferring the uncompressed form when both
    /// exist (they never should; see `persist_index`).
    pub(crate) fn index_path(&self) -> Option<PathBuf> {
        self.path_if_exists(INDEX_TAR)
            .or_else(|| self.path_if_exists(INDEX_TAR_GZ))
    }

    /// Removes `file` from the store. Absence is not an error.
    pub(crate) fn remove(&self, file: &str) -> Result<()> {
        let path = self.dir.join(file);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed '{}'", path.display());
                Ok(())
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::CacheFileRemoveSnafu { path: &path }),
            },
        }
    }

    /// Drops the cached timestamp and snapshot. Called when a recovery pass
    /// installs a changed root: pins signed under superseded keys are no
    /// longer meaningful. The trust anchor and index are kept.
    pub(crate) fn clear(&self) -> Result<()> {
        self.remove(TIMESTAMP_JSON)?;
        self.remove(SNAPSHOT_JSON)
    }

    /// Installs a trust anchor if none exists yet. The caller vouches for
    /// `bytes`; this is the one write that does not flow through
    /// verification.
    pub(crate) fn seed_root(&self, bytes: &[u8]) -> Result<PathBuf> {
        if let Some(existing) = self.path_if_exists(ROOT_JSON) {
            return Ok(existing);
        }
        let mut temp = self.temp_file(".json")?;
        std::io::Write::write_all(&mut temp, bytes)
            .context(error::CacheFileWriteSnafu { path: temp.path() })?;
        self.persist(temp, ROOT_JSON)
    }
}

#[cfg(test)]
mod tests {
    use super::Datastore;
    use crate::schema::{INDEX_TAR, INDEX_TAR_GZ, SNAPSHOT_JSON, TIMESTAMP_JSON};
    use std::io::Write;

    fn datastore() -> (tempfile::TempDir, Datastore) {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn persist_makes_file_current() {
        let (_dir, store) = datastore();
        assert!(store.path_if_exists(TIMESTAMP_JSON).is_none());

        let mut temp = store.temp_file(".json").unwrap();
        temp.write_all(b"{}").unwrap();
        let path = store.persist(temp, TIMESTAMP_JSON).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"{}");
    }

    #[test]
    fn dropped_temp_files_disappear() {
        let (_dir, store) = datastore();
        let temp = store.temp_file(".json").unwrap();
        let path = temp.path().to_path_buf();
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn persisting_one_index_form_removes_the_other() {
        let (_dir, store) = datastore();

        let mut temp = store.temp_file(".tar.gz").unwrap();
        temp.write_all(b"gz").unwrap();
        store.persist_index(temp, true).unwrap();
        assert!(store.path_if_exists(INDEX_TAR_GZ).is_some());

        let mut temp = store.temp_file(".tar").unwrap();
        temp.write_all(b"tar").unwrap();
        store.persist_index(temp, false).unwrap();
        assert!(store.path_if_exists(INDEX_TAR).is_some());
        assert!(store.path_if_exists(INDEX_TAR_GZ).is_none());
    }

    #[test]
    fn clear_keeps_root_and_index() {
        let (_dir, store) = datastore();
        for file in [
            super::ROOT_JSON,
            TIMESTAMP_JSON,
            SNAPSHOT_JSON,
            INDEX_TAR_GZ,
        ] {
            let mut temp = store.temp_file("").unwrap();
            temp.write_all(b"x").unwrap();
            store.persist(temp, file).unwrap();
        }

        store.clear().unwrap();
        assert!(store.path_if_exists(super::ROOT_JSON).is_some());
        assert!(store.path_if_exists(INDEX_TAR_GZ).is_some());
        assert!(store.path_if_exists(TIMESTAMP_JSON).is_none());
        assert!(store.path_if_exists(SNAPSHOT_JSON).is_none());
    }
}
