// SPDX-License-Identifier: MIT OR Apache-2.0

//! Package identity and the mirror paths derived from it.

use crate::error::{self, Result};
use snafu::ensure;
use std::fmt;

/// A `{name, version}` pair naming one package release.
///
/// The client treats both parts as opaque except for building mirror and
/// index paths, so the only validation is the minimum that keeps those paths
/// well-formed: non-empty, printable, and free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        validate("name", &name)?;
        validate("version", &version)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The archive file name, `<name>-<version>.tar.gz`; also the target
    /// path under which per-package metadata describes the archive.
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tar.gz", self.name, self.version)
    }

    /// The mirror path of the package archive,
    /// `<name>/<version>/<name>-<version>.tar.gz`.
    pub(crate) fn archive_path(&self) -> String {
        format!("{}/{}/{}", self.name, self.version, self.archive_name())
    }

    /// The index path of the per-package metadata,
    /// `<name>/<version>/targets.json`.
    pub(crate) fn metadata_path(&self) -> String {
        format!("{}/{}/targets.json", self.name, self.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

fn validate(field: &'static str, value: &str) -> Result<()> {
    ensure!(
        !value.is_empty()
            && value != "."
            && value != ".."
            && value
                .chars()
                .all(|c| !c.is_control() && c != '/' && c != '\\'),
        error::InvalidPackageIdSnafu { field, value }
    );
    Ok(())
}
