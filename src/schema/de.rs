use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Error};
use crate::schema::key::Key;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;
use snafu::ensure;
use std::collections::HashMap;
use std::fmt;

/// Validates the key ID for each key during deserialization and fails if any
/// don't match.
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded<Hex>, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    // * fails if a key ID doesn't match its contents
    // * fails if there is a duplicate key ID
    // Keys of unrecognized types cannot have their ID recomputed; they are
    // stored as-is (they never verify anything, so a forged ID is inert).
    fn validate_and_insert_entry(
        keyid: Decoded<Hex>,
        key: Key,
        map: &mut HashMap<Decoded<Hex>, Key>,
    ) -> Result<(), Error> {
        let keyid_hex = hex::encode(&keyid);
        match key.key_id() {
            Ok(calculated) => {
                ensure!(
                    keyid == calculated,
                    error::InvalidKeyIdSnafu {
                        keyid: &keyid_hex,
                        calculated: hex::encode(&calculated),
                    }
                );
            }
            Err(Error::UnrecognizedKeyType) => {}
            Err(err) => return Err(err),
        }
        ensure!(
            map.insert(keyid, key).is_none(),
            error::DuplicateKeyIdSnafu { keyid: keyid_hex }
        );
        Ok(())
    }

    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = HashMap<Decoded<Hex>, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map")
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: serde::de::MapAccess<'de>,
        {
            let mut map = HashMap::new();
            while let Some((keyid, key)) = access.next_entry()? {
                validate_and_insert_entry(keyid, key, &mut map).map_err(M::Error::custom)?;
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(Visitor)
}

/// Deserializer for the `_extra` capture on role payloads: collects the
/// flattened leftovers but drops the `_type` tag, which serde already
/// represents through the enclosing struct's tag attribute.
pub(super) fn extra_skip_type<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut map = HashMap::deserialize(deserializer)?;
    map.remove("_type");
    Ok(map)
}
