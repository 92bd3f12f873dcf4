// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between repository policy and the mechanics of moving bytes.

use snafu::Snafu;
use std::fmt::Debug;
use std::io::{ErrorKind, Read};
use url::Url;

/// A method for obtaining a remote file's bytes.
///
/// The repository layer decides *what* to fetch, in what order, and with
/// which length ceiling; a `Transport` only turns a URL into a byte stream.
/// The built-in [`FilesystemTransport`] serves `file://` mirrors; an HTTP
/// implementation plugs in from outside the crate through this trait.
pub trait Transport: Debug {
    /// Opens a reader for the file at `url`.
    fn fetch(&self, url: Url) -> std::result::Result<Box<dyn Read + Send>, TransportError>;
}

/// The kind of failure a [`Transport`] experienced during `fetch`.
///
/// `FileNotFound` is distinguished because the repository layer reacts to
/// it: a missing `00-index.tar.gz` triggers a fallback to the `.tar` form
/// when the snapshot pins one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The transport does not handle the URL's scheme (e.g. `file://` or
    /// `http://`).
    UnsupportedUrlScheme,
    /// The file cannot be found.
    FileNotFound,
    /// Any other failure, e.g. an I/O error or a broken connection.
    Other,
}

/// The error type [`Transport::fetch`] returns.
#[derive(Debug, Snafu)]
#[snafu(display("Failed to fetch '{}': {}", url, source))]
#[snafu(visibility(pub))]
pub struct TransportError {
    /// The kind of failure that occurred.
    pub kind: TransportErrorKind,
    /// The URL being fetched.
    pub url: String,
    /// The underlying failure.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new<S, E>(kind: TransportErrorKind, url: S, source: E) -> Self
    where
        S: AsRef<str>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: source.into(),
        }
    }

    /// A `TransportError` reporting an unhandled URL scheme.
    pub fn unsupported_scheme<S: AsRef<str>>(url: S) -> Self {
        Self::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "transport cannot handle the given URL scheme".to_string(),
        )
    }

    /// Whether the failure was the file simply not existing.
    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::FileNotFound
    }
}

/// A [`Transport`] over local files, for mirrors reachable through the
/// filesystem and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

impl Transport for FilesystemTransport {
    fn fetch(&self, url: Url) -> std::result::Result<Box<dyn Read + Send>, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(url));
        }

        let file = std::fs::File::open(url.path()).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, &url, e)
        })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::{FilesystemTransport, Transport};
    use std::io::Read;

    #[test]
    fn fetches_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, b"contents").unwrap();

        let url = url::Url::from_file_path(&path).unwrap();
        let mut reader = FilesystemTransport.fetch(url).unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"contents");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = url::Url::from_file_path(dir.path().join("absent")).unwrap();
        let err = match FilesystemTransport.fetch(url) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn rejects_other_schemes() {
        let err = match FilesystemTransport
            .fetch(url::Url::parse("http://mirror.example/root.json").unwrap())
        {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(
            err.kind,
            super::TransportErrorKind::UnsupportedUrlScheme
        );
    }
}
