// SPDX-License-Identifier: MIT OR Apache-2.0

//! The verification step between parsed metadata and metadata the engine
//! may act on.
//!
//! A [`Trusted<T>`] can only be produced by the functions in this module
//! (or loaded back from this client's own cache), so any code holding one
//! knows the document passed signature, type, expiry, version, and
//! consistency checks. Parsed-but-unverified documents stay `Signed<T>` and
//! the engine cannot consume them.

use crate::error::{self, Error, Result};
use crate::io::verify_bytes;
use crate::schema::{
    FileInfo, Role, RoleType, Root, Signed, Snapshot, Targets, Timestamp, TimestampMeta,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use std::ops::Deref;

/// A metadata document that passed verification.
///
/// The field is private and there is no public constructor: the only way to
/// obtain one is through the `verify_*` functions below.
#[derive(Debug, Clone)]
pub struct Trusted<T> {
    inner: T,
}

impl<T> Trusted<T> {
    fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Wraps a document read back from this client's own cache. Everything
    /// in the cache was verified before it was written, so the wrapper is
    /// sound; nothing parsed from a remote source may pass through here.
    pub(crate) fn assume_cached(inner: T) -> Self {
        Self { inner }
    }
}

impl<T> Deref for Trusted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

/// Parses a signed envelope, reporting a role mismatch distinctly from
/// malformed JSON.
pub(crate) fn parse_signed<T>(bytes: &[u8]) -> Result<Signed<T>>
where
    T: Role + DeserializeOwned,
{
    let envelope: Signed<serde_json::Value> =
        serde_json::from_slice(bytes).context(error::ParseMetadataSnafu { role: T::TYPE })?;
    if let Some(found) = envelope.signed.get("_type").and_then(|t| t.as_str()) {
        ensure!(
            found == T::TYPE.to_string(),
            error::WrongMetadataTypeSnafu {
                expected: T::TYPE,
                found,
            }
        );
    }
    serde_json::from_slice(bytes).context(error::ParseMetadataSnafu { role: T::TYPE })
}

/// Counts valid signatures from keys `root` authorizes for `role` and
/// demands the role's threshold.
///
/// Signatures from unlisted key IDs, unknown key types, and unknown schemes
/// are skipped, never counted and never fatal; duplicate signatures from
/// one key count once.
fn check_signatures<T: Role>(root: &Root, signed: &Signed<T>, role: RoleType) -> Result<()> {
    let role_keys = root
        .role_keys(role)
        .ok_or(Error::RoleNotInRoot { role })?;
    let canonical = signed
        .signed
        .canonical_form()
        .context(error::CanonicalFormSnafu { role })?;

    let mut valid = HashSet::new();
    for signature in &signed.signatures {
        if !role_keys.keyids.contains(&signature.keyid) || valid.contains(&signature.keyid) {
            continue;
        }
        if let Some(key) = root.keys.get(&signature.keyid) {
            if key.verify(&canonical, &signature.sig) {
                valid.insert(&signature.keyid);
            }
        }
    }

    ensure!(
        valid.len() as u64 >= role_keys.threshold.get(),
        error::SignatureThresholdSnafu {
            role,
            threshold: role_keys.threshold.get(),
            valid: valid.len() as u64,
        }
    );
    Ok(())
}

pub(crate) fn check_expired<T: Role>(payload: &T, now: DateTime<Utc>) -> Result<()> {
    ensure!(
        payload.expires() > now,
        error::ExpiredMetadataSnafu {
            role: T::TYPE,
            expires: payload.expires(),
        }
    );
    Ok(())
}

fn check_version(role: RoleType, cached: Option<u64>, new: u64) -> Result<()> {
    if let Some(current_version) = cached {
        ensure!(
            new >= current_version,
            error::OlderMetadataSnafu {
                role,
                current_version,
                new_version: new,
            }
        );
    }
    Ok(())
}

/// Verifies a root document.
///
/// A replacement root must satisfy the root-role threshold of the root it
/// replaces *and* its own: the outgoing keys sign off the handover, and the
/// incoming document proves it can stand on its own afterwards. With no
/// prior root (trust bootstrap by the embedder) only the self-check runs.
pub fn verify_root(
    untrusted: Signed<Root>,
    old: Option<&Root>,
    now: DateTime<Utc>,
) -> Result<Trusted<Root>> {
    if let Some(old) = old {
        check_signatures(old, &untrusted, RoleType::Root)?;
        check_version(RoleType::Root, Some(old.version), untrusted.signed.version)?;
    }
    check_signatures(&untrusted.signed, &untrusted, RoleType::Root)?;
    check_expired(&untrusted.signed, now)?;
    Ok(Trusted::new(untrusted.signed))
}

/// Verifies a timestamp document under the trusted root.
pub fn verify_timestamp(
    untrusted: Signed<Timestamp>,
    root: &Trusted<Root>,
    now: DateTime<Utc>,
    cached_version: Option<u64>,
) -> Result<Trusted<Timestamp>> {
    check_signatures(root, &untrusted, RoleType::Timestamp)?;
    check_expired(&untrusted.signed, now)?;
    check_version(RoleType::Timestamp, cached_version, untrusted.signed.version)?;
    Ok(Trusted::new(untrusted.signed))
}

/// Verifies a snapshot document under the trusted root, including that the
/// exact downloaded bytes match the file info the timestamp pinned.
pub fn verify_snapshot(
    untrusted: Signed<Snapshot>,
    raw: &[u8],
    root: &Trusted<Root>,
    snapshot_meta: &TimestampMeta,
    now: DateTime<Utc>,
    cached_version: Option<u64>,
) -> Result<Trusted<Snapshot>> {
    verify_bytes(
        raw,
        snapshot_meta.length,
        &snapshot_meta.hashes,
        crate::schema::SNAPSHOT_JSON,
    )?;
    check_signatures(root, &untrusted, RoleType::Snapshot)?;
    check_expired(&untrusted.signed, now)?;
    check_version(RoleType::Snapshot, cached_version, untrusted.signed.version)?;
    Ok(Trusted::new(untrusted.signed))
}

/// Verifies a per-package targets document under the trusted root. When the
/// caller has file info for the document (from a lockfile or another signed
/// source), the exact bytes are checked against it first.
pub fn verify_targets(
    untrusted: Signed<Targets>,
    raw: &[u8],
    root: &Trusted<Root>,
    file_info: Option<&FileInfo>,
    now: DateTime<Utc>,
) -> Result<Trusted<Targets>> {
    if let Some(info) = file_info {
        verify_bytes(raw, info.length, &info.hashes, "targets.json")?;
    }
    check_signatures(root, &untrusted, RoleType::Targets)?;
    check_expired(&untrusted.signed, now)?;
    Ok(Trusted::new(untrusted.signed))
}
