// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed wrappers for fields that travel as an encoded string but are used
//! as raw bytes (key IDs, signatures, digests, public keys).

use crate::schema::error::{self, Result};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for binary data.
pub trait Encoding {
    fn encode(bytes: &[u8]) -> String;
    fn decode(encoded: &str) -> Result<Vec<u8>>;
}

/// Lowercase hexadecimal, the encoding every signed document in this crate
/// uses on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Hex;

impl Encoding for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(encoded: &str) -> Result<Vec<u8>> {
        hex::decode(encoded).context(error::HexDecodeSnafu)
    }
}

/// Decoded bytes plus the original string they arrived as.
///
/// The original string is kept so that re-serializing a parsed document
/// reproduces its signed bytes exactly, even when the producer used an
/// equivalent but different spelling (for example uppercase hex). Equality,
/// ordering, and hashing all use the decoded bytes.
pub struct Decoded<T> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<T>,
}

impl<T: Encoding> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = T::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<T> Decoded<T> {
    /// Consume this object and return its decoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<'de, T: Encoding> Deserialize<'de> for Decoded<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        let bytes = T::decode(&original).map_err(D::Error::custom)?;
        Ok(Self {
            bytes,
            original,
            spooky: PhantomData,
        })
    }
}

impl<T> Serialize for Decoded<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}

impl<T> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Clone for Decoded<T> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            original: self.original.clone(),
            spooky: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.original, f)
    }
}

impl<T> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl<T> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for Decoded<T> {}

impl<T> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<T> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoded, Hex};

    #[test]
    fn equality_ignores_spelling() {
        let lower: Decoded<Hex> = serde_json::from_str("\"00ff\"").unwrap();
        let upper: Decoded<Hex> = serde_json::from_str("\"00FF\"").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(&*lower, &[0x00, 0xff]);
    }

    #[test]
    fn serialization_preserves_original() {
        let upper: Decoded<Hex> = serde_json::from_str("\"00FF\"").unwrap();
        assert_eq!(serde_json::to_string(&upper).unwrap(), "\"00FF\"");
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(serde_json::from_str::<Decoded<Hex>>("\"zz\"").is_err());
    }
}
