// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signed metadata documents a repository serves.
//!
//! Four roles cooperate to authenticate a repository: `root` binds keys to
//! roles, `timestamp` pins the current snapshot, `snapshot` pins the current
//! root and package index, and per-package `targets` documents pin the
//! package archives themselves. Every document travels inside a [`Signed`]
//! envelope whose signatures cover the canonical form of the payload.

mod de;
pub mod decoded;
mod error;
pub mod key;

pub use crate::schema::error::{Error, Result};

use crate::encode::CanonicalFormatter;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use std::collections::HashMap;
use std::num::NonZeroU64;

/// File name of the root document, both on the mirror and in meta tables.
pub const ROOT_JSON: &str = "root.json";
/// File name of the timestamp document.
pub const TIMESTAMP_JSON: &str = "timestamp.json";
/// File name of the snapshot document.
pub const SNAPSHOT_JSON: &str = "snapshot.json";
/// File name of the gzip-compressed package index.
pub const INDEX_TAR_GZ: &str = "00-index.tar.gz";
/// File name of the uncompressed package index.
pub const INDEX_TAR: &str = "00-index.tar";

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other
    /// roles. Revocation and replacement of any key, including root's own,
    /// is done by publishing a new root document.
    Root,
    /// The timestamp role pins the current snapshot and is re-signed
    /// frequently to limit how long a client can be kept unaware of new
    /// publications.
    Timestamp,
    /// The snapshot role pins the current root document and package index.
    Snapshot,
    /// The targets role signs per-package metadata naming the package
    /// archives a client may install.
    Targets,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common trait implemented by all role payloads.
pub trait Role: Serialize {
    const TYPE: RoleType;

    /// When this document stops being trustworthy.
    fn expires(&self) -> DateTime<Utc>;

    /// Clients never replace a document with one of a smaller version.
    fn version(&self) -> u64;

    /// The canonical byte form of this payload; the bytes signatures cover.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .map_err(|source| Error::JsonSerialization {
                what: format!("{} role", Self::TYPE),
                source,
            })?;
        Ok(data)
    }
}

/// A signed metadata envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role payload covered by the signatures.
    pub signed: T,
    /// Signatures over the canonical form of `signed`.
    pub signatures: Vec<Signature>,
}

/// A signature and the ID of the key that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded<Hex>,
    /// The hex-encoded signature bytes.
    pub sig: Decoded<Hex>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root document: the key and threshold bindings every other
/// verification starts from.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    pub version: u64,

    pub expires: DateTime<Utc>,

    /// The public keys authorized somewhere in `roles`, keyed by key ID.
    /// Key IDs are recomputed from key content during deserialization and
    /// must match; duplicates are rejected.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// Which key IDs may sign for each role, and how many distinct
    /// signatures each role requires.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization, kept so the canonical
    /// form of this document survives a round trip.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs authorized for a role and the number of distinct signatures
/// required to accept a document for it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    pub keyids: Vec<Decoded<Hex>>,

    pub threshold: NonZeroU64,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// The key bindings for `role`, if this root lists any.
    pub fn role_keys(&self, role: RoleType) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp document. Its only job is to pin the current snapshot.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    pub version: u64,

    pub expires: DateTime<Utc>,

    /// File info table; must contain an entry for `snapshot.json`.
    pub meta: HashMap<String, TimestampMeta>,

    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// File info for the snapshot document pinned by a timestamp.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimestampMeta {
    /// Exact length in bytes of the snapshot document.
    pub length: u64,

    pub hashes: Hashes,

    /// Version of the pinned snapshot document.
    pub version: u64,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// File info for the snapshot document this timestamp pins.
    pub fn snapshot_meta(&self) -> Option<&TimestampMeta> {
        self.meta.get(SNAPSHOT_JSON)
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot document: pins the current root document and the package
/// index (in its `.tar.gz` form, and optionally its `.tar` form).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    pub version: u64,

    pub expires: DateTime<Utc>,

    /// File info table, keyed by file name (`root.json`,
    /// `00-index.tar.gz`, `00-index.tar`).
    pub meta: HashMap<String, SnapshotMeta>,

    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// File info for one file pinned by a snapshot.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// Exact length in bytes of the file.
    pub length: u64,

    pub hashes: Hashes,

    /// Version of the pinned document. Present for `root.json`; index
    /// entries carry no version of their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// File info for the root document this snapshot pins.
    pub fn root_meta(&self) -> Option<&SnapshotMeta> {
        self.meta.get(ROOT_JSON)
    }

    /// File info for the gzip-compressed package index.
    pub fn index_tar_gz_meta(&self) -> Option<&SnapshotMeta> {
        self.meta.get(INDEX_TAR_GZ)
    }

    /// File info for the uncompressed package index, if the repository
    /// publishes one.
    pub fn index_tar_meta(&self) -> Option<&SnapshotMeta> {
        self.meta.get(INDEX_TAR)
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A per-package targets document: maps target paths to the file info a
/// downloaded artifact must match.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    pub version: u64,

    pub expires: DateTime<Utc>,

    pub targets: HashMap<String, Target>,

    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// File info for one target file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// Exact length in bytes of the target file.
    pub length: u64,

    pub hashes: Hashes,

    /// Opaque application data carried alongside the file info.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Targets {
    /// Looks up the target named `path`.
    pub fn find_target(&self, path: &str) -> Option<&Target> {
        self.targets.get(path)
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The digest table of a file info record.
///
/// `sha256` is the digest every repository must publish; `sha512` is
/// optional. Digests of algorithms this crate does not recognize are
/// preserved in `_extra` and ignored during verification.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Decoded<Hex>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<Decoded<Hex>>,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// A length and digest pair binding a file's identity, supplied by callers
/// verifying per-package metadata obtained out of band.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FileInfo {
    pub length: u64,
    pub hashes: Hashes,
}

impl From<&SnapshotMeta> for FileInfo {
    fn from(meta: &SnapshotMeta) -> Self {
        Self {
            length: meta.length,
            hashes: meta.hashes.clone(),
        }
    }
}

impl From<&TimestampMeta> for FileInfo {
    fn from(meta: &TimestampMeta) -> Self {
        Self {
            length: meta.length,
            hashes: meta.hashes.clone(),
        }
    }
}

impl From<&Target> for FileInfo {
    fn from(target: &Target) -> Self {
        Self {
            length: target.length,
            hashes: target.hashes.clone(),
        }
    }
}
