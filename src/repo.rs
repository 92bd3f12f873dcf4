// SPDX-License-Identifier: MIT OR Apache-2.0

//! The abstract repository interface and its filesystem-backed reference
//! implementation.
//!
//! The update engine speaks only to the [`Repository`] trait: named remote
//! files with known length ceilings, a fixed-layout local cache, and a
//! progress sink. Everything about *how* bytes move — URL construction,
//! temp files, atomic installation — lives behind it.

use crate::datastore::Datastore;
use crate::error::{self, Error, Result};
use crate::io::copy_bounded;
use crate::package::PackageId;
use crate::schema::{RoleType, INDEX_TAR, INDEX_TAR_GZ, ROOT_JSON, SNAPSHOT_JSON, TIMESTAMP_JSON};
use crate::transport::Transport;
use crate::Limits;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use snafu::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tempfile::NamedTempFile;
use url::Url;

/// A remote file the update engine may ask for, along with the best length
/// bound the protocol provides for it.
#[derive(Debug, Clone)]
pub enum RemoteFile {
    /// `timestamp.json`. Nothing pins its length, so the download is
    /// bounded only by a conservative limit.
    Timestamp,
    /// `root.json`. During a normal update the snapshot supplies the
    /// length; during root recovery nothing does.
    Root { length: Option<u64> },
    /// `snapshot.json`, with the length the timestamp pinned.
    Snapshot { length: u64 },
    /// The package index. The transport may deliver either compression
    /// form; the lengths come from the snapshot.
    Index {
        tar_gz_length: u64,
        tar_length: Option<u64>,
    },
    /// A package archive, with the length its targets metadata pinned.
    PackageArchive { id: PackageId, length: u64 },
}

/// What a repository does with a downloaded file once its callback has
/// verified it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Install as the current cached document for `RoleType`.
    CacheAs(RoleType),
    /// Install as the current package index.
    CacheIndex,
    /// Discard after the callback returns; package archives are handed to
    /// the caller, not cached.
    DontCache,
}

impl RemoteFile {
    /// The caching policy for this file.
    pub fn must_cache(&self) -> CachePolicy {
        match self {
            RemoteFile::Timestamp => CachePolicy::CacheAs(RoleType::Timestamp),
            RemoteFile::Root { .. } => CachePolicy::CacheAs(RoleType::Root),
            RemoteFile::Snapshot { .. } => CachePolicy::CacheAs(RoleType::Snapshot),
            RemoteFile::Index { .. } => CachePolicy::CacheIndex,
            RemoteFile::PackageArchive { .. } => CachePolicy::DontCache,
        }
    }
}

/// A file the client may have cached locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedFile {
    Root,
    Timestamp,
    Snapshot,
    Index,
}

/// Progress and warning events surfaced to the embedding application.
///
/// Fatal failures are returned through `Result`s, never logged here.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The trust root was rotated during a normal update cycle.
    RootUpdated { version: u64 },
    /// A verification failure the engine will answer with root recovery.
    VerificationFailure {
        role: Option<RoleType>,
        detail: String,
    },
}

/// The capability bundle the update engine runs against.
pub trait Repository {
    /// Downloads `file` to a temporary path and invokes `f` with it.
    ///
    /// The download never exceeds the length bound carried by `file` (or
    /// the repository's conservative limit when the bound is unknown). If
    /// `f` succeeds and [`RemoteFile::must_cache`] says so, the temporary
    /// file is atomically installed in the cache; on any failure it is
    /// discarded. Either way the temporary file is released.
    ///
    /// For [`RemoteFile::Index`] the delivered path ends in `.tar.gz` or
    /// `.tar` depending on which form the transport produced.
    fn with_remote<R, F>(&self, file: &RemoteFile, f: F) -> Result<R>
    where
        F: FnOnce(&Path) -> Result<R>;

    /// The path of `file` if it is currently cached.
    fn get_cached(&self, file: CachedFile) -> Option<PathBuf>;

    /// The path of the cached trust anchor. The client cannot operate
    /// without one, so absence is an error.
    fn get_cached_root(&self) -> Result<PathBuf>;

    /// Drops the cached timestamp and snapshot (the trust anchor and index
    /// are kept).
    fn clear_cache(&self) -> Result<()>;

    /// Reads one small file out of the cached package index.
    fn read_from_index(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Delivers a progress or warning event.
    fn log(&self, event: &Event);
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A [`Repository`] over any [`Transport`], with a local cache directory.
///
/// Pointing it at a `file://` mirror with [`FilesystemTransport`] gives a
/// fully local client; an HTTP transport makes it a network client without
/// any change to policy.
///
/// [`FilesystemTransport`]: crate::FilesystemTransport
#[derive(Debug, Clone)]
pub struct FilesystemRepository<T> {
    transport: T,
    base_url: Url,
    datastore: Datastore,
    limits: Limits,
}

/// A downloaded temporary file, tagged with which index form it holds when
/// the download was an index.
struct Fetched {
    temp: NamedTempFile,
    gzipped: bool,
}

impl<T: Transport> FilesystemRepository<T> {
    /// Creates a repository client over `transport`.
    ///
    /// `base_url` is the mirror's metadata root (it should end in `/`);
    /// `cache_dir` is created if needed.
    pub fn new(transport: T, base_url: Url, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            transport,
            base_url,
            datastore: Datastore::new(cache_dir.into())?,
            limits: Limits::default(),
        })
    }

    /// Replaces the download limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Installs `bytes` as the trust anchor if the cache has none yet. The
    /// caller is asserting it obtained these bytes through a channel it
    /// trusts; every later root replacement is verified against this one.
    pub fn install_trust_anchor(&self, bytes: &[u8]) -> Result<PathBuf> {
        self.datastore.seed_root(bytes)
    }

    fn fetch_one(
        &self,
        server_path: &str,
        suffix: &str,
        max_size: u64,
        specifier: &'static str,
    ) -> Result<NamedTempFile> {
        let url = self
            .base_url
            .join(server_path)
            .context(error::JoinUrlSnafu {
                path: server_path,
                url: self.base_url.clone(),
            })?;
        debug!("fetching '{url}'");
        let reader = self
            .transport
            .fetch(url)
            .context(error::TransportSnafu)?;
        let mut temp = self.datastore.temp_file(suffix)?;
        let temp_path = temp.path().to_path_buf();
        copy_bounded(reader, temp.as_file_mut(), &temp_path, max_size, specifier)?;
        Ok(temp)
    }

    fn fetch_to_temp(&self, file: &RemoteFile) -> Result<Fetched> {
        match file {
            RemoteFile::Timestamp => Ok(Fetched {
                temp: self.fetch_one(
                    TIMESTAMP_JSON,
                    ".json",
                    self.limits.max_timestamp_size,
                    "max_timestamp_size argument",
                )?,
                gzipped: false,
            }),
            RemoteFile::Root { length } => {
                let (max_size, specifier) = match length {
                    Some(length) => (*length, SNAPSHOT_JSON),
                    None => (self.limits.max_root_size, "max_root_size argument"),
                };
                Ok(Fetched {
                    temp: self.fetch_one(ROOT_JSON, ".json", max_size, specifier)?,
                    gzipped: false,
                })
            }
            RemoteFile::Snapshot { length } => Ok(Fetched {
                temp: self.fetch_one(SNAPSHOT_JSON, ".json", *length, TIMESTAMP_JSON)?,
                gzipped: false,
            }),
            RemoteFile::Index {
                tar_gz_length,
                tar_length,
            } => {
                match self.fetch_one(INDEX_TAR_GZ, ".tar.gz", *tar_gz_length, SNAPSHOT_JSON) {
                    Ok(temp) => Ok(Fetched {
                        temp,
                        gzipped: true,
                    }),
                    // The snapshot pins an uncompressed form too; a mirror
                    // that only carries that form is still usable.
                    Err(Error::Transport { source }) if source.is_not_found() => {
                        let tar_length = tar_length.ok_or(Error::Transport { source })?;
                        warn!("'{INDEX_TAR_GZ}' not found, falling back to '{INDEX_TAR}'");
                        Ok(Fetched {
                            temp: self.fetch_one(INDEX_TAR, ".tar", tar_length, SNAPSHOT_JSON)?,
                            gzipped: false,
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            RemoteFile::PackageArchive { id, length } => Ok(Fetched {
                temp: self.fetch_one(&id.archive_path(), ".tar.gz", *length, "targets.json")?,
                gzipped: true,
            }),
        }
    }
}

/// Where a role's document lives in the cache. Targets documents are read
/// out of the index and never cached standalone.
fn cache_file_name(role: RoleType) -> Option<&'static str> {
    match role {
        RoleType::Root => Some(ROOT_JSON),
        RoleType::Timestamp => Some(TIMESTAMP_JSON),
        RoleType::Snapshot => Some(SNAPSHOT_JSON),
        RoleType::Targets => None,
    }
}

impl<T: Transport> Repository for FilesystemRepository<T> {
    fn with_remote<R, F>(&self, file: &RemoteFile, f: F) -> Result<R>
    where
        F: FnOnce(&Path) -> Result<R>,
    {
        let fetched = self.fetch_to_temp(file)?;
        // A callback failure drops `fetched` and with it the temp file;
        // nothing reaches the cache unverified.
        let value = f(fetched.temp.path())?;
        match file.must_cache() {
            CachePolicy::CacheAs(role) => {
                if let Some(name) = cache_file_name(role) {
                    self.datastore.persist(fetched.temp, name)?;
                }
            }
            CachePolicy::CacheIndex => {
                self.datastore.persist_index(fetched.temp, fetched.gzipped)?;
            }
            CachePolicy::DontCache => {}
        }
        Ok(value)
    }

    fn get_cached(&self, file: CachedFile) -> Option<PathBuf> {
        match file {
            CachedFile::Root => self.datastore.path_if_exists(ROOT_JSON),
            CachedFile::Timestamp => self.datastore.path_if_exists(TIMESTAMP_JSON),
            CachedFile::Snapshot => self.datastore.path_if_exists(SNAPSHOT_JSON),
            CachedFile::Index => self.datastore.index_path(),
        }
    }

    fn get_cached_root(&self) -> Result<PathBuf> {
        self.datastore
            .path_if_exists(ROOT_JSON)
            .ok_or_else(|| Error::MissingTrustRoot {
                path: self.datastore.dir().join(ROOT_JSON),
            })
    }

    fn clear_cache(&self) -> Result<()> {
        self.datastore.clear()
    }

    fn read_from_index(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let index_path = match self.datastore.index_path() {
            Some(index_path) => index_path,
            None => return Ok(None),
        };
        let file = File::open(&index_path).context(error::CacheFileReadSnafu {
            path: &index_path,
        })?;
        let gzipped = index_path.extension().is_some_and(|ext| ext == "gz");
        let reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut archive = Archive::new(reader);
        let entries = archive.entries().context(error::IndexReadSnafu {
            path: &index_path,
        })?;
        for entry in entries {
            let mut entry = entry.context(error::IndexReadSnafu {
                path: &index_path,
            })?;
            let matches = {
                let entry_path = entry.path().context(error::IndexReadSnafu {
                    path: &index_path,
                })?;
                entry_path == Path::new(path)
            };
            if matches {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .context(error::IndexReadSnafu {
                        path: &index_path,
                    })?;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    fn log(&self, event: &Event) {
        match event {
            Event::RootUpdated { version } => info!("trust root updated to version {version}"),
            Event::VerificationFailure { role, detail } => match role {
                Some(role) => warn!("verification of {role} metadata failed: {detail}"),
                None => warn!("verification failed: {detail}"),
            },
        }
    }
}
