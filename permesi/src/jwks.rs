//! Key sets as published at a JWKS endpoint

use serde::{Deserialize, Serialize};

use crate::{jwa, jwk, Jwk};

/// A set of verification keys published by a token issuer
///
/// Deserialization is tolerant: entries that are not usable RSA signing
/// keys are logged and skipped rather than failing the whole document,
/// so one exotic key in a provider's JWKS does not take the verifier
/// down.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

impl KeySet {
    /// Constructs an empty key set
    #[must_use]
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Gets the key with the given id, if it can verify `alg` signatures
    #[must_use]
    pub fn get_key(&self, kid: &jwk::KeyIdRef, alg: jwa::Algorithm) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|k| k.key_id() == Some(kid) && k.is_compatible(alg))
    }
}

impl FromIterator<Jwk> for KeySet {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeJwksVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeJwksVisitor {
        type Value = Vec<Jwk>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeJwk::Jwk(jwk) => values.push(jwk),
                    MaybeJwk::Unknown(key) => {
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kid = ?key.kid,
                            jwk.kty = ?key.kty,
                            jwk.alg = ?key.alg,
                            "ignoring unusable JWK"
                        );
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(Jwk),
        Unknown(JwkLike),
    }

    #[derive(serde::Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kid: Option<jwk::KeyId>,
        #[serde(default)]
        kty: Option<String>,
        #[serde(default)]
        alg: Option<String>,
    }

    deserializer.deserialize_seq(MaybeJwksVisitor)
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::{jwk::KeyIdRef, test};

    const JWKS_WITH_EC_KEY: &str = r#"
        {
            "keys": [
                {
                    "kid": "ec-1",
                    "kty": "EC",
                    "use": "sig",
                    "alg": "ES256",
                    "crv": "P-256",
                    "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                    "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
                }
            ]
        }
    "#;

    const JWKS_WITH_EMPTY_ENTRY: &str = r#"{"keys": [{}]}"#;

    #[test]
    fn skips_non_rsa_keys() -> Result<()> {
        let jwks: KeySet = serde_json::from_str(JWKS_WITH_EC_KEY)?;
        assert!(jwks.keys().is_empty());
        Ok(())
    }

    #[test]
    fn skips_empty_entries() -> Result<()> {
        let jwks: KeySet = serde_json::from_str(JWKS_WITH_EMPTY_ENTRY)?;
        assert!(jwks.keys().is_empty());
        Ok(())
    }

    #[test]
    fn decodes_published_key_set() -> Result<()> {
        let jwks: KeySet = serde_json::from_str(test::KEY_SET_JSON)?;
        assert_eq!(jwks.keys().len(), 1);
        assert!(jwks
            .get_key(KeyIdRef::from_str("key-1"), crate::jwa::Algorithm::Rs256)
            .is_some());
        assert!(jwks
            .get_key(KeyIdRef::from_str("key-9"), crate::jwa::Algorithm::Rs256)
            .is_none());
        Ok(())
    }
}
