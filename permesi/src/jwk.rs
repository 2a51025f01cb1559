//! Verification keys and their metadata

use aliri_base64::Base64Url;
use aliri_braid::braid;
use ring::signature::{RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA256};
use serde::{Deserialize, Serialize};

use crate::{
    error::{self, JwkVerifyError, KeyRejected},
    jwa,
};

/// An identifier for a verification key
#[braid(serde, ref_doc = "A borrowed reference to a key identifier ([`KeyId`])")]
pub struct KeyId;

/// The usage restriction carried on a key
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    /// The key may only be used for signatures
    #[serde(rename = "sig")]
    Signing,

    /// The key may only be used for encryption
    #[serde(rename = "enc")]
    Encryption,
}

/// An RSA public key, as published in a JWKS document
///
/// Construction validates that the modulus is large enough to be used
/// with the accepted signing algorithms. Keys of other types (`EC`,
/// `oct`, ...) fail conversion and are skipped by the tolerant key set
/// deserializer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyDto", into = "PublicKeyDto")]
pub struct RsaPublicKey {
    modulus: Base64Url,
    exponent: Base64Url,
}

impl RsaPublicKey {
    /// Constructs a public key from the raw modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is smaller than 2048 bits or the
    /// exponent is empty.
    pub fn new(modulus: Base64Url, exponent: Base64Url) -> Result<Self, KeyRejected> {
        if modulus.as_slice().len() < 256 {
            return Err(error::key_rejected("key modulus must be at least 2048 bits"));
        }
        if exponent.as_slice().is_empty() {
            return Err(error::key_rejected("key exponent must not be empty"));
        }

        Ok(Self { modulus, exponent })
    }

    /// The raw big-endian bytes of the modulus
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        self.modulus.as_slice()
    }

    /// The raw big-endian bytes of the public exponent
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        self.exponent.as_slice()
    }

    fn verify_signature(&self, data: &[u8], signature: &[u8]) -> Result<(), JwkVerifyError> {
        let components = RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        components
            .verify(&RSA_PKCS1_2048_8192_SHA256, data, signature)
            .map_err(|_| JwkVerifyError::SignatureMismatch)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct PublicKeyDto {
    kty: String,
    n: Base64Url,
    e: Base64Url,
}

impl TryFrom<PublicKeyDto> for RsaPublicKey {
    type Error = KeyRejected;

    fn try_from(dto: PublicKeyDto) -> Result<Self, Self::Error> {
        if dto.kty != "RSA" {
            return Err(error::key_rejected("key type is not RSA"));
        }

        Self::new(dto.n, dto.e)
    }
}

impl From<RsaPublicKey> for PublicKeyDto {
    fn from(key: RsaPublicKey) -> Self {
        Self {
            kty: String::from("RSA"),
            n: key.modulus,
            e: key.exponent,
        }
    }
}

/// A verification key along with its JWKS metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Jwk {
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    id: Option<KeyId>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,

    #[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<jwa::Algorithm>,

    #[serde(flatten)]
    key: RsaPublicKey,
}

impl Jwk {
    /// Constructs a key with no attached metadata
    pub const fn new(key: RsaPublicKey) -> Self {
        Self {
            id: None,
            usage: None,
            algorithm: None,
            key,
        }
    }

    /// Attaches a key id
    pub fn with_key_id(mut self, kid: impl Into<KeyId>) -> Self {
        self.id = Some(kid.into());
        self
    }

    /// Attaches a usage restriction
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attaches an algorithm restriction
    pub fn with_algorithm(mut self, alg: jwa::Algorithm) -> Self {
        self.algorithm = Some(alg);
        self
    }

    /// The key id, if published
    #[must_use]
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.id.as_deref()
    }

    /// The usage restriction, if published
    #[must_use]
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// The algorithm restriction, if published
    #[must_use]
    pub fn algorithm(&self) -> Option<jwa::Algorithm> {
        self.algorithm
    }

    /// Whether this key may verify signatures made with `alg`
    #[must_use]
    pub fn is_compatible(&self, alg: jwa::Algorithm) -> bool {
        self.algorithm.map_or(true, |a| a == alg)
            && self.usage.map_or(true, |u| u == Usage::Signing)
    }

    /// Verifies a signature over `data` using this key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is restricted to an incompatible
    /// algorithm or usage, or if the signature does not match.
    pub fn verify(
        &self,
        alg: jwa::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), JwkVerifyError> {
        if let Some(algorithm) = self.algorithm {
            if algorithm != alg {
                return Err(JwkVerifyError::IncompatibleAlgorithm { alg });
            }
        }

        if let Some(usage) = self.usage {
            if usage != Usage::Signing {
                return Err(JwkVerifyError::UsageMismatch);
            }
        }

        self.key.verify_signature(data, signature)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test;

    #[test]
    fn deserializes_published_rsa_key() -> Result<()> {
        let jwk: Jwk = serde_json::from_str(test::KEY_1_JWK_JSON)?;
        assert_eq!(jwk.key_id(), Some(KeyIdRef::from_str("key-1")));
        assert_eq!(jwk.usage(), Some(Usage::Signing));
        assert_eq!(jwk.algorithm(), Some(jwa::Algorithm::Rs256));
        assert!(jwk.is_compatible(jwa::Algorithm::Rs256));
        Ok(())
    }

    #[test]
    fn rejects_short_modulus() {
        let modulus = Base64Url::from_raw(vec![0xFF; 128]);
        let exponent = Base64Url::from_raw(vec![0x01, 0x00, 0x01]);
        assert!(RsaPublicKey::new(modulus, exponent).is_err());
    }

    #[test]
    fn rejects_non_rsa_key_type() {
        let err = serde_json::from_str::<Jwk>(
            r#"{"kty":"EC","kid":"ec-1","n":"AQAB","e":"AQAB"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn encryption_key_refuses_verification() -> Result<()> {
        let jwk: Jwk = serde_json::from_str(test::KEY_1_JWK_JSON)?;
        let jwk = jwk.with_usage(Usage::Encryption);
        let err = jwk
            .verify(jwa::Algorithm::Rs256, b"data", b"sig")
            .unwrap_err();
        assert!(matches!(err, JwkVerifyError::UsageMismatch));
        Ok(())
    }
}
