// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error type for repository client operations.

use crate::schema::RoleType;
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;
use url::Url;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to create cache directory '{}': {}", path.display(), source))]
    CacheDirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read cached file '{}': {}", path.display(), source))]
    CacheFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    CacheFileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to remove cached file '{}': {}", path.display(), source))]
    CacheFileRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to move downloaded file into '{}': {}", path.display(), source))]
    CacheFilePersist {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Failed to create temporary file in '{}': {}", path.display(), source))]
    CacheTempFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The client cannot operate without a trust anchor in its cache.
    #[snafu(display("No trusted root document at '{}'", path.display()))]
    MissingTrustRoot { path: PathBuf },

    #[snafu(display("Transport error: {}", source))]
    Transport { source: TransportError },

    #[snafu(display("Failed reading download stream: {}", source))]
    TransportRead { source: std::io::Error },

    /// A download exceeded the length ceiling it was given. Without this
    /// check a hostile mirror could stream bytes forever.
    #[snafu(display(
        "Download exceeded the maximum of {} bytes specified by {}",
        max_size,
        specifier
    ))]
    MaxSizeExceeded {
        max_size: u64,
        specifier: &'static str,
    },

    #[snafu(display("Failed to parse {} metadata: {}", role, source))]
    ParseMetadata {
        role: RoleType,
        source: serde_json::Error,
    },

    #[snafu(display("Expected {} metadata but found '{}'", expected, found))]
    WrongMetadataType { expected: RoleType, found: String },

    #[snafu(display(
        "{} role requires {} valid signatures, found {}",
        role,
        threshold,
        valid
    ))]
    SignatureThreshold {
        role: RoleType,
        threshold: u64,
        valid: u64,
    },

    #[snafu(display("{} metadata expired at {}", role, expires))]
    ExpiredMetadata {
        role: RoleType,
        expires: DateTime<Utc>,
    },

    /// Strict version decrease: a rollback attack, or a mirror serving a
    /// stale capture of the repository.
    #[snafu(display(
        "Found version {} of {} metadata when we had already seen version {}",
        new_version,
        role,
        current_version
    ))]
    OlderMetadata {
        role: RoleType,
        current_version: u64,
        new_version: u64,
    },

    #[snafu(display("The trusted root does not define the {} role", role))]
    RoleNotInRoot { role: RoleType },

    #[snafu(display(
        "Length mismatch for {}: expected {} bytes, found {}",
        context,
        expected,
        found
    ))]
    LengthMismatch {
        context: String,
        expected: u64,
        found: u64,
    },

    #[snafu(display(
        "Hash mismatch for {}: expected {}, calculated {}",
        context,
        expected,
        calculated
    ))]
    HashMismatch {
        context: String,
        expected: String,
        calculated: String,
    },

    /// File info whose digest table contains no algorithm this crate
    /// recognizes cannot bind anything.
    #[snafu(display("File info for {} carries no recognized hash algorithm", context))]
    NoRecognizedHash { context: String },

    #[snafu(display("{} metadata is missing an entry for '{}'", role, file))]
    MetaMissing { file: String, role: RoleType },

    #[snafu(display("Failed to compute signed bytes for {} metadata: {}", role, source))]
    CanonicalForm {
        role: RoleType,
        source: crate::schema::Error,
    },

    #[snafu(display(
        "Snapshot kept referencing newer root documents after {} updates",
        max_root_updates
    ))]
    RootUpdateLoop { max_root_updates: u32 },

    /// Verification failed again after the one recovery pass the protocol
    /// allows per cycle.
    #[snafu(display(
        "Verification failed again after refreshing the trust root: {}",
        source
    ))]
    RecoveryFailed {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("The package index has no file named '{}'", path))]
    IndexFileMissing { path: String },

    #[snafu(display("Failed to read package index '{}': {}", path.display(), source))]
    IndexRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Targets metadata does not describe '{}'", target))]
    TargetNotFound { target: String },

    #[snafu(display("Invalid package {}: '{}'", field, value))]
    InvalidPackageId {
        field: &'static str,
        value: String,
    },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    DestinationWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to join '{}' to URL '{}': {}", path, url, source))]
    JoinUrl {
        path: String,
        url: Url,
        source: url::ParseError,
    },
}

impl Error {
    /// Whether this failure means the repository's metadata did not check
    /// out — the class of failure the update engine answers with a single
    /// root-recovery pass. Transport and local I/O failures are not
    /// verification failures and propagate unchanged.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            Error::ParseMetadata { .. }
                | Error::WrongMetadataType { .. }
                | Error::SignatureThreshold { .. }
                | Error::ExpiredMetadata { .. }
                | Error::OlderMetadata { .. }
                | Error::RoleNotInRoot { .. }
                | Error::LengthMismatch { .. }
                | Error::HashMismatch { .. }
                | Error::NoRecognizedHash { .. }
                | Error::MetaMissing { .. }
                | Error::MaxSizeExceeded { .. }
                | Error::CanonicalForm { .. }
        )
    }

    /// The role a verification failure concerns, when one is identifiable.
    pub fn role(&self) -> Option<RoleType> {
        match self {
            Error::ParseMetadata { role, .. }
            | Error::SignatureThreshold { role, .. }
            | Error::ExpiredMetadata { role, .. }
            | Error::OlderMetadata { role, .. }
            | Error::RoleNotInRoot { role, .. }
            | Error::MetaMissing { role, .. }
            | Error::CanonicalForm { role, .. } => Some(*role),
            Error::WrongMetadataType { expected, .. } => Some(*expected),
            _ => None,
        }
    }
}
