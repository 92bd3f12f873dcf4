// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the metadata schema layer.

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A hex-encoded field failed to decode.
    #[snafu(display("Unable to decode hex string: {}", source))]
    HexDecode { source: hex::FromHexError },

    /// A key ID in a key table did not match the key it named.
    #[snafu(display("Key ID {} does not match calculated key ID {}", keyid, calculated))]
    InvalidKeyId { keyid: String, calculated: String },

    /// The same key ID appeared twice in a key table.
    #[snafu(display("Duplicate key ID {}", keyid))]
    DuplicateKeyId { keyid: String },

    /// Canonical serialization failed.
    #[snafu(display("Failed to serialize {} as canonical JSON: {}", what, source))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
    },

    /// A key ID was requested for a key whose type this crate does not
    /// recognize.
    #[snafu(display("Cannot compute a key ID for an unrecognized key type"))]
    UnrecognizedKeyType,
}
