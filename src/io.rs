// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length-bounded and digest-checked reads.

use crate::error::{self, Result};
use crate::schema::Hashes;
use ring::digest::{Context, SHA256, SHA512};
use snafu::{ensure, ResultExt};
use std::io::{Read, Write};
use std::path::Path;

/// Copies `reader` into `writer`, failing as soon as more than `max_size`
/// bytes appear. A repository that does not know a file's exact length still
/// supplies a conservative ceiling, so a hostile mirror cannot stream
/// forever.
pub(crate) fn copy_bounded<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    dest: &Path,
    max_size: u64,
    specifier: &'static str,
) -> Result<u64> {
    let mut buf = [0; 8 * 1024];
    let mut count: u64 = 0;
    loop {
        match reader.read(&mut buf).context(error::TransportReadSnafu)? {
            0 => break,
            n => {
                count = count.saturating_add(n as u64);
                ensure!(
                    count <= max_size,
                    error::MaxSizeExceededSnafu {
                        max_size,
                        specifier
                    }
                );
                writer
                    .write_all(&buf[..n])
                    .context(error::CacheFileWriteSnafu { path: dest })?;
            }
        }
    }
    writer
        .flush()
        .context(error::CacheFileWriteSnafu { path: dest })?;
    Ok(count)
}

/// Incremental digests over a byte stream, computing exactly the algorithms
/// a file info claim names (among those this crate recognizes).
pub(crate) struct DigestComputer {
    sha256: Option<Context>,
    sha512: Option<Context>,
    length: u64,
}

impl DigestComputer {
    /// Errors when `hashes` names no recognized algorithm: file info that
    /// binds nothing cannot be allowed to pass.
    pub(crate) fn new(hashes: &Hashes, context: &str) -> Result<Self> {
        ensure!(
            hashes.sha256.is_some() || hashes.sha512.is_some(),
            error::NoRecognizedHashSnafu { context }
        );
        Ok(Self {
            sha256: hashes.sha256.as_ref().map(|_| Context::new(&SHA256)),
            sha512: hashes.sha512.as_ref().map(|_| Context::new(&SHA512)),
            length: 0,
        })
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        if let Some(context) = &mut self.sha256 {
            context.update(data);
        }
        if let Some(context) = &mut self.sha512 {
            context.update(data);
        }
        self.length = self.length.saturating_add(data.len() as u64);
    }

    /// Checks the observed length and every claimed digest.
    pub(crate) fn verify(self, expected_length: u64, hashes: &Hashes, context: &str) -> Result<()> {
        ensure!(
            self.length == expected_length,
            error::LengthMismatchSnafu {
                context,
                expected: expected_length,
                found: self.length,
            }
        );
        if let (Some(digest), Some(expected)) = (self.sha256, &hashes.sha256) {
            let calculated = digest.finish();
            ensure!(
                calculated.as_ref() == expected.as_ref(),
                error::HashMismatchSnafu {
                    context,
                    expected: expected.to_string(),
                    calculated: hex::encode(calculated),
                }
            );
        }
        if let (Some(digest), Some(expected)) = (self.sha512, &hashes.sha512) {
            let calculated = digest.finish();
            ensure!(
                calculated.as_ref() == expected.as_ref(),
                error::HashMismatchSnafu {
                    context,
                    expected: expected.to_string(),
                    calculated: hex::encode(calculated),
                }
            );
        }
        Ok(())
    }
}

/// Verifies in-memory bytes against a file info claim.
pub(crate) fn verify_bytes(
    bytes: &[u8],
    expected_length: u64,
    hashes: &Hashes,
    context: &str,
) -> Result<()> {
    let mut computer = DigestComputer::new(hashes, context)?;
    computer.update(bytes);
    computer.verify(expected_length, hashes, context)
}

/// Verifies a file on disk against a file info claim, streaming so large
/// artifacts never need to fit in memory.
pub(crate) fn verify_stream<R: Read>(
    mut reader: R,
    path: &Path,
    expected_length: u64,
    hashes: &Hashes,
    context: &str,
) -> Result<()> {
    let mut computer = DigestComputer::new(hashes, context)?;
    let mut buf = [0; 8 * 1024];
    loop {
        match reader
            .read(&mut buf)
            .context(error::CacheFileReadSnafu { path })?
        {
            0 => break,
            n => computer.update(&buf[..n]),
        }
    }
    computer.verify(expected_length, hashes, context)
}

#[cfg(test)]
mod tests {
    use super::{copy_bounded, verify_bytes};
    use crate::error::Error;
    use crate::schema::Hashes;
    use hex_literal::hex;
    use std::path::Path;

    fn sha256_hashes(digest: &[u8]) -> Hashes {
        Hashes {
            sha256: Some(digest.to_vec().into()),
            sha512: None,
            _extra: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn copy_bounded_accepts_exact_fit() {
        let mut out = Vec::new();
        let n = copy_bounded(&b"hello"[..], &mut out, Path::new("out"), 5, "test").unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn copy_bounded_rejects_overflow() {
        let mut out = Vec::new();
        let err = copy_bounded(&b"hello"[..], &mut out, Path::new("out"), 4, "test").unwrap_err();
        assert!(matches!(err, Error::MaxSizeExceeded { max_size: 4, .. }));
    }

    #[test]
    fn verify_bytes_accepts_matching_claim() {
        let expected = hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        verify_bytes(b"hello", 5, &sha256_hashes(&expected), "test").unwrap();
    }

    #[test]
    fn verify_bytes_rejects_wrong_digest() {
        let expected = hex!("0000000000000000000000000000000000000000000000000000000000000000");
        let err = verify_bytes(b"hello", 5, &sha256_hashes(&expected), "test").unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[test]
    fn verify_bytes_rejects_wrong_length() {
        let expected = hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        let err = verify_bytes(b"hello", 6, &sha256_hashes(&expected), "test").unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
    }

    #[test]
    fn verify_bytes_requires_a_recognized_algorithm() {
        let mut unknown_only = Hashes::default();
        unknown_only
            ._extra
            .insert("blake2b".to_string(), serde_json::json!("aa"));
        let err = verify_bytes(b"hello", 5, &unknown_only, "test").unwrap_err();
        assert!(matches!(err, Error::NoRecognizedHash { .. }));
    }
}
