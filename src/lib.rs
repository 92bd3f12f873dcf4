// SPDX-License-Identifier: MIT OR Apache-2.0

//! `rampart` is a client for signed package repositories, built to keep
//! working against mirrors you do not trust.
//!
//! A repository publishes four kinds of signed metadata: `root` (which keys
//! speak for which role, and how many must agree), `timestamp` (the current
//! snapshot), `snapshot` (the current root and package index), and
//! per-package `targets` documents inside the index. The client downloads
//! them in that order, verifies each against what it already trusts, and
//! caches the result — so rollbacks, freezes, mix-and-match substitutions,
//! oversized streams, and stale mirrors all surface as typed errors instead
//! of bad installs.
//!
//! ```no_run
//! use rampart::{Client, FilesystemRepository, FilesystemTransport, PackageId};
//! use url::Url;
//!
//! # fn main() -> rampart::Result<()> {
//! let repository = FilesystemRepository::new(
//!     FilesystemTransport,
//!     Url::parse("file:///var/mirror/").expect("static url"),
//!     "/var/cache/rampart",
//! )?;
//! // The trust anchor comes from somewhere you already trust (an OS
//! // image, a signed installer); it is installed once.
//! let anchor = std::fs::read("/usr/share/rampart/root.json").expect("trust anchor");
//! repository.install_trust_anchor(&anchor)?;
//!
//! let client = Client::new(repository);
//! client.check_for_updates(chrono::Utc::now())?;
//!
//! let pkg = PackageId::new("acme", "1.2.0")?;
//! let targets = client.package_targets(&pkg, chrono::Utc::now(), None)?;
//! client.fetch_package(&pkg, &targets, "acme-1.2.0.tar.gz".as_ref())?;
//! # Ok(())
//! # }
//! ```
//!
//! Transports other than the built-in `file://` one plug in through the
//! [`Transport`] trait; alternative cache and download policy plugs in
//! through [`Repository`].

#![warn(rust_2018_idioms, missing_debug_implementations)]

mod datastore;
pub mod encode;
pub mod error;
mod io;
mod package;
mod repo;
pub mod schema;
mod sign;
mod transport;
mod trust;
mod update;

pub use crate::error::{Error, Result};
pub use crate::package::PackageId;
pub use crate::repo::{
    CachePolicy, CachedFile, Event, FilesystemRepository, RemoteFile, Repository,
};
pub use crate::sign::Sign;
pub use crate::transport::{FilesystemTransport, Transport, TransportError, TransportErrorKind};
pub use crate::trust::{
    verify_root, verify_snapshot, verify_targets, verify_timestamp, Trusted,
};
pub use crate::update::{Client, UpdateStatus};

/// Limits for downloads whose length nothing pins, and for how often the
/// engine will follow a root replacement within one cycle.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Ceiling for `root.json` during recovery, when no snapshot pins its
    /// length. Default 1 MiB.
    pub max_root_size: u64,

    /// Ceiling for `timestamp.json`, whose length nothing ever pins.
    /// Default 16 KiB.
    pub max_timestamp_size: u64,

    /// How many newer roots one cycle may install before concluding the
    /// snapshot chain is broken or hostile. Default 2.
    pub max_root_updates: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 1024 * 1024,
            max_timestamp_size: 16 * 1024,
            max_root_updates: 2,
        }
    }
}
