// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utilities for integration tests: a signing mirror builder and an
//! event-recording repository wrapper. Not every test module uses every
//! helper, so we suppress unused warnings.

use chrono::{DateTime, TimeZone, Utc};
use rampart::schema::key::Key;
use rampart::schema::{
    Hashes, Role, RoleKeys, RoleType, Root, Signature, Signed, Snapshot, SnapshotMeta, Target,
    Targets, Timestamp, TimestampMeta, INDEX_TAR_GZ, ROOT_JSON, SNAPSHOT_JSON, TIMESTAMP_JSON,
};
use rampart::{
    CachedFile, Client, Event, FilesystemRepository, FilesystemTransport, RemoteFile, Repository,
    Result, Sign,
};
use ring::signature::Ed25519KeyPair;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use url::Url;

/// Converts a directory path into a `file://` URL with a trailing slash.
#[allow(unused)]
pub fn dir_url<P: AsRef<Path>>(path: P) -> Url {
    Url::from_directory_path(path).unwrap()
}

#[allow(unused)]
pub fn keypair() -> Ed25519KeyPair {
    let rng = ring::rand::SystemRandom::new();
    let document = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    Ed25519KeyPair::from_pkcs8(document.as_ref()).unwrap()
}

/// One signing key per role, stored as PKCS#8 so keys can be shared
/// between repository generations (`Ed25519KeyPair` itself is not `Clone`).
#[derive(Clone)]
pub struct Keys {
    root: Vec<u8>,
    timestamp: Vec<u8>,
    snapshot: Vec<u8>,
    targets: Vec<u8>,
}

fn generate_pkcs8() -> Vec<u8> {
    let rng = ring::rand::SystemRandom::new();
    Ed25519KeyPair::generate_pkcs8(&rng)
        .unwrap()
        .as_ref()
        .to_vec()
}

impl Keys {
    #[allow(unused)]
    pub fn generate() -> Self {
        Keys {
            root: generate_pkcs8(),
            timestamp: generate_pkcs8(),
            snapshot: generate_pkcs8(),
            targets: generate_pkcs8(),
        }
    }

    /// The same non-root keys with a fresh root key, for rotation tests.
    #[allow(unused)]
    pub fn rotate_root(&self) -> Self {
        let mut rotated = self.clone();
        rotated.root = generate_pkcs8();
        rotated
    }

    pub fn root_key(&self) -> Ed25519KeyPair {
        Ed25519KeyPair::from_pkcs8(&self.root).unwrap()
    }

    pub fn timestamp_key(&self) -> Ed25519KeyPair {
        Ed25519KeyPair::from_pkcs8(&self.timestamp).unwrap()
    }

    pub fn snapshot_key(&self) -> Ed25519KeyPair {
        Ed25519KeyPair::from_pkcs8(&self.snapshot).unwrap()
    }

    pub fn targets_key(&self) -> Ed25519KeyPair {
        Ed25519KeyPair::from_pkcs8(&self.targets).unwrap()
    }
}

#[allow(unused)]
pub fn default_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2035, 1, 1, 0, 0, 0).unwrap()
}

#[allow(unused)]
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

/// Signs `payload` over its canonical form with each signer.
#[allow(unused)]
pub fn sign_envelope<T: Role + Serialize>(payload: T, signers: &[&dyn Sign]) -> Signed<T> {
    let canonical = payload.canonical_form().unwrap();
    let signatures = signers
        .iter()
        .map(|signer| Signature {
            keyid: signer.metadata_key().key_id().unwrap(),
            sig: signer.sign(&canonical).unwrap().into(),
        })
        .collect();
    Signed {
        signed: payload,
        signatures,
    }
}

#[allow(unused)]
pub fn hashes_of(bytes: &[u8]) -> Hashes {
    Hashes {
        sha256: Some(
            ring::digest::digest(&ring::digest::SHA256, bytes)
                .as_ref()
                .to_vec()
                .into(),
        ),
        sha512: None,
        _extra: HashMap::new(),
    }
}

/// Serializes a signed document the way publishers do (pretty JSON plus a
/// trailing newline), writes it under the mirror, and returns the exact
/// bytes other roles must pin.
#[allow(unused)]
pub fn write_signed<T: Serialize>(path: &Path, signed: &Signed<T>) -> Vec<u8> {
    let mut buffer = serde_json::to_vec_pretty(signed).unwrap();
    buffer.push(b'\n');
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, &buffer).unwrap();
    buffer
}

/// A package published into the test mirror.
pub struct Package {
    pub name: String,
    pub version: String,
    pub contents: Vec<u8>,
}

impl Package {
    #[allow(unused)]
    pub fn new(name: &str, version: &str, contents: &[u8]) -> Self {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            contents: contents.to_vec(),
        }
    }

    fn archive_name(&self) -> String {
        format!("{}-{}.tar.gz", self.name, self.version)
    }
}

/// Everything one publication run writes to the mirror.
pub struct PublishSpec {
    pub root_version: u64,
    pub timestamp_version: u64,
    pub snapshot_version: u64,
    pub packages: Vec<Package>,
    pub expires: DateTime<Utc>,
    pub timestamp_expires: Option<DateTime<Utc>>,
    /// Override the snapshot length the timestamp claims (endless-data
    /// scenarios).
    pub claimed_snapshot_length: Option<u64>,
    /// Override the index sha256 the snapshot claims (mix-and-match
    /// scenarios).
    pub claimed_index_sha256: Option<Vec<u8>>,
}

impl Default for PublishSpec {
    fn default() -> Self {
        PublishSpec {
            root_version: 1,
            timestamp_version: 1,
            snapshot_version: 1,
            packages: Vec::new(),
            expires: default_expiry(),
            timestamp_expires: None,
            claimed_snapshot_length: None,
            claimed_index_sha256: None,
        }
    }
}

/// A mirror directory plus a cache directory, with helpers to publish
/// signed repository states into the mirror.
pub struct TestRepo {
    pub dir: TempDir,
    pub keys: Keys,
}

impl TestRepo {
    #[allow(unused)]
    pub fn new() -> Self {
        TestRepo {
            dir: TempDir::new().unwrap(),
            keys: Keys::generate(),
        }
    }

    pub fn mirror(&self) -> PathBuf {
        self.dir.path().join("mirror")
    }

    pub fn cache(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    #[allow(unused)]
    pub fn cached_bytes(&self, file: &str) -> Option<Vec<u8>> {
        fs::read(self.cache().join(file)).ok()
    }

    /// Builds the root payload for `keys` with every role at threshold 1.
    pub fn root_payload(keys: &Keys, version: u64, expires: DateTime<Utc>) -> Root {
        let mut key_table = HashMap::new();
        let mut roles = HashMap::new();
        for (role, signer) in [
            (RoleType::Root, keys.root_key()),
            (RoleType::Timestamp, keys.timestamp_key()),
            (RoleType::Snapshot, keys.snapshot_key()),
            (RoleType::Targets, keys.targets_key()),
        ] {
            let key: Key = signer.metadata_key();
            let keyid = key.key_id().unwrap();
            key_table.insert(keyid.clone(), key);
            roles.insert(
                role,
                RoleKeys {
                    keyids: vec![keyid],
                    threshold: NonZeroU64::new(1).unwrap(),
                    _extra: HashMap::new(),
                },
            );
        }
        Root {
            version,
            expires,
            keys: key_table,
            roles,
            _extra: HashMap::new(),
        }
    }

    /// Builds the index tarball: per-package `targets.json` documents
    /// signed by the targets key, at `<name>/<version>/targets.json`.
    fn build_index(&self, spec: &PublishSpec) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for package in &spec.packages {
            let targets = Targets {
                version: 1,
                expires: spec.expires,
                targets: HashMap::from([(
                    package.archive_name(),
                    Target {
                        length: package.contents.len() as u64,
                        hashes: hashes_of(&package.contents),
                        custom: HashMap::new(),
                        _extra: HashMap::new(),
                    },
                )]),
                _extra: HashMap::new(),
            };
            let signed = sign_envelope(targets, &[&self.keys.targets_key()]);
            let mut bytes = serde_json::to_vec_pretty(&signed).unwrap();
            bytes.push(b'\n');

            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{}/{}/targets.json", package.name, package.version),
                    bytes.as_slice(),
                )
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// Publishes a full repository state signed by `keys`.
    ///
    /// `extra_root_signers` co-sign the root document; a rotation publishes
    /// with the new keys and the outgoing root key here.
    #[allow(unused)]
    pub fn publish_with(
        &self,
        keys: &Keys,
        spec: &PublishSpec,
        extra_root_signers: &[&dyn Sign],
    ) {
        let mirror = self.mirror();

        // root.json
        let root = Self::root_payload(keys, spec.root_version, spec.expires);
        let root_key = keys.root_key();
        let mut root_signers: Vec<&dyn Sign> = vec![&root_key];
        root_signers.extend_from_slice(extra_root_signers);
        let root_bytes = write_signed(&mirror.join(ROOT_JSON), &sign_envelope(root, &root_signers));

        // package archives and the index
        for package in &spec.packages {
            let path = mirror
                .join(&package.name)
                .join(&package.version)
                .join(package.archive_name());
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, &package.contents).unwrap();
        }
        let index_bytes = self.build_index(spec);
        fs::create_dir_all(&mirror).unwrap();
        fs::write(mirror.join(INDEX_TAR_GZ), &index_bytes).unwrap();

        // snapshot.json
        let mut index_hashes = hashes_of(&index_bytes);
        if let Some(claimed) = &spec.claimed_index_sha256 {
            index_hashes.sha256 = Some(claimed.clone().into());
        }
        let snapshot = Snapshot {
            version: spec.snapshot_version,
            expires: spec.expires,
            meta: HashMap::from([
                (
                    ROOT_JSON.to_string(),
                    SnapshotMeta {
                        length: root_bytes.len() as u64,
                        hashes: hashes_of(&root_bytes),
                        version: Some(spec.root_version),
                        _extra: HashMap::new(),
                    },
                ),
                (
                    INDEX_TAR_GZ.to_string(),
                    SnapshotMeta {
                        length: index_bytes.len() as u64,
                        hashes: index_hashes,
                        version: None,
                        _extra: HashMap::new(),
                    },
                ),
            ]),
            _extra: HashMap::new(),
        };
        let snapshot_bytes = write_signed(
            &mirror.join(SNAPSHOT_JSON),
            &sign_envelope(snapshot, &[&keys.snapshot_key()]),
        );

        // timestamp.json
        let timestamp = Timestamp {
            version: spec.timestamp_version,
            expires: spec.timestamp_expires.unwrap_or(spec.expires),
            meta: HashMap::from([(
                SNAPSHOT_JSON.to_string(),
                TimestampMeta {
                    length: spec
                        .claimed_snapshot_length
                        .unwrap_or(snapshot_bytes.len() as u64),
                    hashes: hashes_of(&snapshot_bytes),
                    version: spec.snapshot_version,
                    _extra: HashMap::new(),
                },
            )]),
            _extra: HashMap::new(),
        };
        write_signed(
            &mirror.join(TIMESTAMP_JSON),
            &sign_envelope(timestamp, &[&keys.timestamp_key()]),
        );
    }

    #[allow(unused)]
    pub fn publish(&self, spec: &PublishSpec) {
        self.publish_with(&self.keys, spec, &[]);
    }

    /// A client over this repo's mirror and cache, with the mirror's
    /// current root installed as the trust anchor if none is yet, and an
    /// event recorder around the repository.
    #[allow(unused)]
    pub fn client(&self) -> (Client<RecordingRepo>, Rc<RefCell<Vec<Event>>>) {
        let repository = FilesystemRepository::new(
            FilesystemTransport,
            dir_url(self.mirror()),
            self.cache(),
        )
        .unwrap();
        repository
            .install_trust_anchor(&fs::read(self.mirror().join(ROOT_JSON)).unwrap())
            .unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let recording = RecordingRepo {
            inner: repository,
            events: Rc::clone(&events),
        };
        (Client::new(recording), events)
    }
}

/// Wraps the real repository, recording every event it logs.
pub struct RecordingRepo {
    pub inner: FilesystemRepository<FilesystemTransport>,
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl Repository for RecordingRepo {
    fn with_remote<R, F>(&self, file: &RemoteFile, f: F) -> Result<R>
    where
        F: FnOnce(&Path) -> Result<R>,
    {
        self.inner.with_remote(file, f)
    }

    fn get_cached(&self, file: CachedFile) -> Option<PathBuf> {
        self.inner.get_cached(file)
    }

    fn get_cached_root(&self) -> Result<PathBuf> {
        self.inner.get_cached_root()
    }

    fn clear_cache(&self) -> Result<()> {
        self.inner.clear_cache()
    }

    fn read_from_index(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read_from_index(path)
    }

    fn log(&self, event: &Event) {
        self.events.borrow_mut().push(event.clone());
        self.inner.log(event);
    }
}
