// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signing seam used by repository producers and tests.
//!
//! The client core only ever *verifies*, but the administration tooling
//! that publishes metadata (and this crate's own test suite) needs to
//! produce signatures over the same canonical bytes. `Sign` is that
//! interface.

use crate::error::Result;
use crate::schema::key::{Ed25519Key, Ed25519KeyType, Ed25519Scheme, Key};
use ring::signature::KeyPair;
use std::collections::HashMap;

/// A keypair that can sign metadata.
pub trait Sign: Send + Sync {
    /// The public half in the form a root document's key table carries.
    fn metadata_key(&self) -> Key;

    /// Signs `msg` (the canonical form of a role payload).
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>>;
}

impl Sign for ring::signature::Ed25519KeyPair {
    fn metadata_key(&self) -> Key {
        Key::Ed25519 {
            keytype: Ed25519KeyType::Ed25519,
            keyval: Ed25519Key {
                public: KeyPair::public_key(self).as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        Ok(self.sign(msg).as_ref().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::Sign;
    use ring::signature::Ed25519KeyPair;

    #[test]
    fn signatures_verify_under_the_advertised_key() {
        let rng = ring::rand::SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8(document.as_ref()).unwrap();

        let key = keypair.metadata_key();
        let signature = Sign::sign(&keypair, b"message").unwrap();
        assert!(key.verify(b"message", &signature));
        assert!(!key.verify(b"other message", &signature));
    }
}
