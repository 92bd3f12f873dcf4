// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public key representation and signature verification.

use crate::encode::CanonicalFormatter;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use ring::digest::{digest, SHA256};
use ring::signature::UnparsedPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;

/// A public key as it appears in a root document's key table.
///
/// Ed25519 is the scheme every repository must provide. Keys of other types
/// parse into the `Unknown` variant, which preserves their exact wire form
/// (the signed bytes of the enclosing document depend on it) but never
/// produces a valid signature.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Key {
    /// An Ed25519 public key.
    Ed25519 {
        keytype: Ed25519KeyType,
        keyval: Ed25519Key,
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization, kept so the
        /// canonical form of the enclosing document survives a round trip.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// A key of a type or scheme this crate does not recognize.
    Unknown(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Ed25519KeyType {
    #[serde(rename = "ed25519")]
    Ed25519,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Ed25519Key {
    /// The hex-encoded public key bytes.
    pub public: Decoded<Hex>,

    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Ed25519Scheme {
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl Key {
    /// Calculates the key ID: the SHA-256 digest of the canonical encoding
    /// of `{"keytype": ..., "keyval": {"public": ...}}`, hex-lowercase.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let value = serde_json::to_value(self).context(error::JsonSerializationSnafu {
            what: "public key",
        })?;
        let keytype = value.get("keytype").context(error::UnrecognizedKeyTypeSnafu)?;
        let public = value
            .pointer("/keyval/public")
            .context(error::UnrecognizedKeyTypeSnafu)?;
        let id_form = serde_json::json!({
            "keytype": keytype,
            "keyval": { "public": public },
        });

        let mut canonical = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut canonical, CanonicalFormatter::new());
        id_form
            .serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key ID" })?;
        Ok(Decoded::from(digest(&SHA256, &canonical).as_ref().to_vec()))
    }

    /// Verifies `signature` over `msg`. An unrecognized key contributes no
    /// valid signature; it is not an error.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        match self {
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => UnparsedPublicKey::new(&ring::signature::ED25519, keyval.public.as_ref())
                .verify(msg, signature)
                .is_ok(),
            Key::Unknown(_) => false,
        }
    }
}
