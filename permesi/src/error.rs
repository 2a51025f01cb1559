//! Common errors

use std::error::Error as StdError;

use thiserror::Error;

/// The credential cannot be parsed as a signed token
#[derive(Debug, Error)]
pub enum MalformedCredential {
    /// The credential contains a control character
    ///
    /// Control characters are rejected outright before any decoding is
    /// attempted, as a credential echoed into a header or log line could
    /// otherwise be used for header or log injection.
    #[error("credential contains a control character at position {position}")]
    ControlCharacter {
        /// The byte index of the offending character
        position: usize,
    },

    /// The credential does not split into header, payload, and signature
    #[error("credential is not a three-part token")]
    Structure,

    /// The token header section could not be decoded
    #[error("malformed token header")]
    Header(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The token payload section could not be decoded
    #[error("malformed token payload")]
    Payload(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The token signature section could not be decoded
    #[error("malformed token signature")]
    Signature(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The token header does not name the key that signed it
    #[error("token header does not name a signing key")]
    MissingKeyId,

    /// A claim required for validation is absent
    #[error("required {0} claim missing")]
    MissingRequiredClaim(&'static str),
}

pub(crate) fn malformed_header(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedCredential {
    MalformedCredential::Header(source.into())
}

pub(crate) fn malformed_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedCredential {
    MalformedCredential::Payload(source.into())
}

pub(crate) fn malformed_signature(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedCredential {
    MalformedCredential::Signature(source.into())
}

/// The remote key provider could not produce a key set
#[derive(Debug, Error)]
#[error("failed to fetch remote key set")]
pub struct FetchError {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl FetchError {
    /// Wraps the underlying cause of a failed key set fetch
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// The key was rejected
#[derive(Debug, Error)]
#[error("key rejected")]
pub struct KeyRejected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_rejected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyRejected {
    KeyRejected {
        source: source.into(),
    }
}

/// An error occurring while verifying a signature with a key
#[derive(Debug, Error)]
pub enum JwkVerifyError {
    /// The key cannot be used with the requested algorithm
    #[error("key incompatible with algorithm '{alg}'")]
    IncompatibleAlgorithm {
        /// The requested signing algorithm
        alg: crate::jwa::Algorithm,
    },

    /// The key has a specific usage that disallows signature verification
    #[error("key cannot be used for signature verification")]
    UsageMismatch,

    /// The signature did not match
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// An error occurring while resolving the key named by a credential
#[derive(Debug, Error)]
pub enum KeyResolveError {
    /// No key in the set matches the requested key id
    #[error("no key matches the requested key id")]
    NotFound,

    /// The remote key provider could not be reached
    #[error(transparent)]
    Unavailable(#[from] FetchError),
}

/// The complete set of faults that can reject a bearer credential
///
/// Every rejection produced by a
/// [`TokenVerifier`][crate::authority::TokenVerifier] is one of these
/// variants, so callers can match on the variant when deciding how to
/// render a challenge.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// No credential accompanied the request
    #[error("no bearer credential was presented")]
    MissingCredential,

    /// The credential could not be parsed as a signed token
    #[error("malformed bearer credential")]
    MalformedCredential(#[from] MalformedCredential),

    /// No known key matches the key id named by the credential
    #[error("no known key matches the credential")]
    UnknownKey,

    /// The credential's signature does not verify under the selected key
    #[error("credential signature mismatch")]
    SignatureInvalid,

    /// The credential has expired
    #[error("credential has expired")]
    Expired,

    /// The credential was issued by an untrusted issuer
    #[error("credential issuer is not trusted")]
    InvalidIssuer,

    /// The credential is not addressed to this service
    #[error("credential audience is not accepted")]
    InvalidAudience,

    /// The key provider could not be reached
    #[error("key provider unavailable")]
    Unavailable(#[from] FetchError),
}

impl From<KeyResolveError> for VerifyError {
    fn from(err: KeyResolveError) -> Self {
        match err {
            KeyResolveError::NotFound => Self::UnknownKey,
            KeyResolveError::Unavailable(source) => Self::Unavailable(source),
        }
    }
}

impl From<JwkVerifyError> for VerifyError {
    fn from(_: JwkVerifyError) -> Self {
        Self::SignatureInvalid
    }
}
