// SPDX-License-Identifier: MIT OR Apache-2.0

//! The update engine: one `check_for_updates` call per client refresh.
//!
//! A cycle downloads and verifies metadata in strict order — timestamp,
//! snapshot, replacement root if the snapshot names one, index — and issues
//! no download until the document before it verified. A verification
//! failure anywhere in the cycle is answered exactly once per call by
//! re-fetching the root under the current trust anchor's keys and retrying;
//! a second failure is fatal.

use crate::error::{self, Error, Result};
use crate::io::{verify_bytes, verify_stream};
use crate::package::PackageId;
use crate::repo::{CachedFile, Event, RemoteFile, Repository};
use crate::schema::{
    FileInfo, RoleType, Root, Signed, Snapshot, Targets, Timestamp, INDEX_TAR, INDEX_TAR_GZ,
    ROOT_JSON, SNAPSHOT_JSON,
};
use crate::trust::{self, parse_signed, Trusted};
use crate::Limits;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use snafu::{ensure, OptionExt, ResultExt};
use std::cell::Cell;
use std::fs::{self, File};
use std::path::Path;

/// The outcome of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The repository has published nothing new; no cache file was touched
    /// except the re-verified timestamp.
    UpToDate,
    /// New metadata was verified and cached, including a fresh index when
    /// the snapshot said its contents changed.
    Updated,
}

/// Protocol position, traced on every transition. `Recovering` is entered
/// from any verifying phase when verification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Timestamping,
    Snapshotting,
    UpdatingRoot,
    IndexRefreshing,
    Recovering,
}

/// A secure repository client over some [`Repository`].
///
/// The engine is synchronous and keeps no state between calls beyond the
/// repository's cache; callers running refreshes from several processes
/// must provide their own mutual exclusion.
#[derive(Debug)]
pub struct Client<R> {
    repository: R,
    limits: Limits,
    phase: Cell<Phase>,
}

impl<R: Repository> Client<R> {
    pub fn new(repository: R) -> Self {
        Self::with_limits(repository, Limits::default())
    }

    pub fn with_limits(repository: R, limits: Limits) -> Self {
        Self {
            repository,
            limits,
            phase: Cell::new(Phase::Idle),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    fn enter_phase(&self, next: Phase) {
        let current = self.phase.replace(next);
        if current != next {
            debug!("update phase {current:?} -> {next:?}");
        }
    }

    /// Runs one check-for-updates cycle against the repository.
    ///
    /// Requires a trust anchor in the cache (see
    /// [`FilesystemRepository::install_trust_anchor`]). On success the
    /// cached timestamp, snapshot, and index reflect the repository's
    /// current state; on failure the cache holds whatever was verified
    /// before the failing step, never the failing bytes themselves.
    ///
    /// [`FilesystemRepository::install_trust_anchor`]:
    /// crate::FilesystemRepository::install_trust_anchor
    pub fn check_for_updates(&self, now: DateTime<Utc>) -> Result<UpdateStatus> {
        let status = match self.update_once(now, None) {
            Ok(status) => status,
            Err(err) if err.is_verification() => {
                self.enter_phase(Phase::Recovering);
                warn!("verification failed, re-fetching trust root: {err}");
                self.repository.log(&Event::VerificationFailure {
                    role: err.role(),
                    detail: err.to_string(),
                });
                let root = self.recover_root(now)?;
                self.update_once(now, Some(root)).map_err(|second| {
                    if second.is_verification() {
                        Error::RecoveryFailed {
                            source: Box::new(second),
                        }
                    } else {
                        second
                    }
                })?
            }
            Err(err) => return Err(err),
        };
        self.enter_phase(Phase::Idle);
        Ok(status)
    }

    /// One pass through the protocol. `root_override` carries the root a
    /// recovery pass just installed, so the retry does not trip over the
    /// cached root's expiry again.
    fn update_once(
        &self,
        now: DateTime<Utc>,
        root_override: Option<Trusted<Root>>,
    ) -> Result<UpdateStatus> {
        let mut trusted_root = match root_override {
            Some(root) => root,
            None => self.load_cached_root(now)?,
        };

        let mut root_updates: u32 = 0;
        let mut updated = false;
        loop {
            self.enter_phase(Phase::Timestamping);
            let cached_timestamp_version = self
                .read_cached::<Timestamp>(CachedFile::Timestamp)
                .map(|t| t.signed.version);
            let trusted_timestamp = self.repository.with_remote(&RemoteFile::Timestamp, |path| {
                let bytes = read_file(path)?;
                let untrusted = parse_signed::<Timestamp>(&bytes)?;
                trust::verify_timestamp(untrusted, &trusted_root, now, cached_timestamp_version)
            })?;
            let snapshot_meta = trusted_timestamp
                .snapshot_meta()
                .context(error::MetaMissingSnafu {
                    file: SNAPSHOT_JSON,
                    role: RoleType::Timestamp,
                })?
                .clone();

            let cached_snapshot = self.read_cached::<Snapshot>(CachedFile::Snapshot);
            if let Some(cached) = &cached_snapshot {
                if cached.signed.version == snapshot_meta.version
                    && self.cached_index_matches(&cached.signed)
                {
                    debug!("snapshot version {} unchanged", snapshot_meta.version);
                    return Ok(if updated {
                        UpdateStatus::Updated
                    } else {
                        UpdateStatus::UpToDate
                    });
                }
            }

            self.enter_phase(Phase::Snapshotting);
            let cached_snapshot_version = cached_snapshot.as_ref().map(|s| s.signed.version);
            let trusted_snapshot = self.repository.with_remote(
                &RemoteFile::Snapshot {
                    length: snapshot_meta.length,
                },
                |path| {
                    let bytes = read_file(path)?;
                    let untrusted = parse_signed::<Snapshot>(&bytes)?;
                    trust::verify_snapshot(
                        untrusted,
                        &bytes,
                        &trusted_root,
                        &snapshot_meta,
                        now,
                        cached_snapshot_version,
                    )
                },
            )?;
            updated = true;

            let root_meta = trusted_snapshot
                .root_meta()
                .context(error::MetaMissingSnafu {
                    file: ROOT_JSON,
                    role: RoleType::Snapshot,
                })?;
            let root_version = root_meta.version.context(error::MetaMissingSnafu {
                file: format!("{ROOT_JSON} version"),
                role: RoleType::Snapshot,
            })?;
            if root_version > trusted_root.version {
                // The new root may change the keys of every role, so the
                // whole cycle restarts under it. Bounded: a snapshot chain
                // that keeps pointing at ever-newer roots is broken or
                // hostile.
                ensure!(
                    root_updates < self.limits.max_root_updates,
                    error::RootUpdateLoopSnafu {
                        max_root_updates: self.limits.max_root_updates,
                    }
                );
                root_updates += 1;
                self.enter_phase(Phase::UpdatingRoot);
                let root_info = FileInfo::from(root_meta);
                let old_root = trusted_root;
                trusted_root = self.repository.with_remote(
                    &RemoteFile::Root {
                        length: Some(root_info.length),
                    },
                    |path| {
                        let bytes = read_file(path)?;
                        verify_bytes(&bytes, root_info.length, &root_info.hashes, ROOT_JSON)?;
                        let untrusted = parse_signed::<Root>(&bytes)?;
                        trust::verify_root(untrusted, Some(&old_root), now)
                    },
                )?;
                self.repository.log(&Event::RootUpdated {
                    version: trusted_root.version,
                });
                continue;
            }

            if !self.cached_index_matches(&trusted_snapshot) {
                self.enter_phase(Phase::IndexRefreshing);
                self.fetch_index(&trusted_snapshot)?;
            }
            return Ok(UpdateStatus::Updated);
        }
    }

    /// Whether the on-disk index is exactly the one `snapshot` pins. The
    /// index is checked against the snapshot's own file info rather than
    /// against bookkeeping: a cycle that cached a snapshot but failed
    /// before refreshing the index must not look complete later.
    fn cached_index_matches(&self, snapshot: &Snapshot) -> bool {
        let path = match self.repository.get_cached(CachedFile::Index) {
            Some(path) => path,
            None => return false,
        };
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        let meta = if gzipped {
            snapshot.index_tar_gz_meta()
        } else {
            snapshot.index_tar_meta()
        };
        let meta = match meta {
            Some(meta) => meta,
            None => return false,
        };
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => return false,
        };
        verify_stream(file, &path, meta.length, &meta.hashes, "cached index").is_ok()
    }

    /// Downloads and verifies the package index named by `snapshot`,
    /// installing it as the cached index.
    fn fetch_index(&self, snapshot: &Trusted<Snapshot>) -> Result<()> {
        let tar_gz_meta = snapshot
            .index_tar_gz_meta()
            .context(error::MetaMissingSnafu {
                file: INDEX_TAR_GZ,
                role: RoleType::Snapshot,
            })?;
        let tar_meta = snapshot.index_tar_meta();
        let remote = RemoteFile::Index {
            tar_gz_length: tar_gz_meta.length,
            tar_length: tar_meta.map(|meta| meta.length),
        };
        self.repository.with_remote(&remote, |path| {
            let gzipped = path.extension().is_some_and(|ext| ext == "gz");
            let (meta, context) = if gzipped {
                (tar_gz_meta, INDEX_TAR_GZ)
            } else {
                let meta = tar_meta.context(error::MetaMissingSnafu {
                    file: INDEX_TAR,
                    role: RoleType::Snapshot,
                })?;
                (meta, INDEX_TAR)
            };
            let file = File::open(path).context(error::CacheFileReadSnafu { path })?;
            verify_stream(file, path, meta.length, &meta.hashes, context)
        })
    }

    /// Root recovery: re-fetch the root with no known length and verify it
    /// under the current anchor's key bindings. The anchor's expiry is
    /// irrelevant here; its keys still speak for the repository's owners,
    /// and a fresh root is the only way forward.
    fn recover_root(&self, now: DateTime<Utc>) -> Result<Trusted<Root>> {
        let old_root = self.load_cached_root_payload()?;
        let new_root = self
            .repository
            .with_remote(&RemoteFile::Root { length: None }, |path| {
                let bytes = read_file(path)?;
                let untrusted = parse_signed::<Root>(&bytes)?;
                trust::verify_root(untrusted, Some(&old_root), now)
            })?;

        // Version pins signed under superseded keys mean nothing once the
        // root has actually changed. When it has not, the cached timestamp
        // and snapshot must survive, or a forced recovery pass would wipe
        // the rollback floors.
        if *new_root != old_root {
            debug!("recovery installed a changed root, dropping cached pins");
            self.repository.clear_cache()?;
        }
        Ok(new_root)
    }

    fn load_cached_root_payload(&self) -> Result<Root> {
        let path = self.repository.get_cached_root()?;
        let bytes = fs::read(&path).context(error::CacheFileReadSnafu { path: &path })?;
        Ok(parse_signed::<Root>(&bytes)?.signed)
    }

    fn load_cached_root(&self, now: DateTime<Utc>) -> Result<Trusted<Root>> {
        let root = self.load_cached_root_payload()?;
        trust::check_expired(&root, now)?;
        Ok(Trusted::assume_cached(root))
    }

    /// Reads back a document this client previously verified and cached.
    /// An unreadable or corrupt file is treated as absent; the protocol
    /// then behaves as on first contact and re-fetches.
    fn read_cached<T: DeserializeOwned>(&self, file: CachedFile) -> Option<Signed<T>> {
        let path = self.repository.get_cached(file)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("ignoring unreadable cached file '{}': {err}", path.display());
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(signed) => Some(signed),
            Err(err) => {
                warn!("ignoring corrupt cached file '{}': {err}", path.display());
                None
            }
        }
    }

    /// Reads one package's metadata out of the cached index and verifies
    /// it. Nothing is downloaded; the index was fetched (at most once) by
    /// the last refresh.
    ///
    /// `file_info` is checked against the document's exact bytes when the
    /// caller has a binding for them, e.g. from a lockfile.
    pub fn package_targets(
        &self,
        pkg: &PackageId,
        now: DateTime<Utc>,
        file_info: Option<&FileInfo>,
    ) -> Result<Trusted<Targets>> {
        let path = pkg.metadata_path();
        let bytes = self
            .repository
            .read_from_index(&path)?
            .context(error::IndexFileMissingSnafu { path: &path })?;
        let untrusted = parse_signed::<Targets>(&bytes)?;
        let root = self.load_cached_root(now)?;
        trust::verify_targets(untrusted, &bytes, &root, file_info, now)
    }

    /// Downloads a package archive, verifies it against its targets
    /// metadata, and writes the verified bytes to `dest`. Returns the
    /// number of bytes written. Archives are never cached.
    pub fn fetch_package(
        &self,
        pkg: &PackageId,
        targets: &Trusted<Targets>,
        dest: &Path,
    ) -> Result<u64> {
        let archive_name = pkg.archive_name();
        let target = targets
            .find_target(&archive_name)
            .context(error::TargetNotFoundSnafu {
                target: &archive_name,
            })?;
        let remote = RemoteFile::PackageArchive {
            id: pkg.clone(),
            length: target.length,
        };
        self.repository.with_remote(&remote, |temp| {
            let file = File::open(temp).context(error::CacheFileReadSnafu { path: temp })?;
            verify_stream(file, temp, target.length, &target.hashes, &archive_name)?;
            // Only verified bytes reach the destination.
            fs::copy(temp, dest).context(error::DestinationWriteSnafu { path: dest })
        })
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).context(error::CacheFileReadSnafu { path })
}
