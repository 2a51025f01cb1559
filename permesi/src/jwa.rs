//! Supported signing algorithms

use std::fmt;

use serde::{Deserialize, Serialize};

/// A signing algorithm accepted on incoming credentials
///
/// Only `RS256` is accepted. Symmetric algorithms are deliberately
/// excluded so that a token asserting `HS256` cannot trick a verifier
/// into treating public key material as a shared secret, and `none` is
/// excluded because an unsigned token proves nothing. Tokens naming any
/// other algorithm fail header deserialization and are reported as
/// malformed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Algorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256
    #[serde(rename = "RS256")]
    Rs256,
}

impl Algorithm {
    /// The name of the algorithm as it appears in a token header
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
