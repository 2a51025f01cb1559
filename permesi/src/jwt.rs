//! Bearer tokens and the claims extracted from them

use std::{fmt, time::Duration};

use aliri_base64::{Base64Url, Base64UrlRef};
use aliri_braid::braid;
use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::{
    error::{self, MalformedCredential, VerifyError},
    jwa, jwk,
    role::RoleSet,
    scope::{Scope, ScopeToken},
    Jwk,
};

/// An issuer of bearer tokens
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// An audience a token is addressed to
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// The subject of a token
#[braid(serde, ref_doc = "A borrowed reference to a [`Subject`]")]
pub struct Subject;

/// A bearer token as presented by a caller
///
/// This type provides custom implementations of [`Display`][TokenRef#impl-Display] and
/// [`Debug`][TokenRef#impl-Debug] to prevent unintentional disclosures of sensitive values.
/// See the documentation on those trait implementations on the [`TokenRef`] type for more
/// information.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "\
    A borrowed reference to a bearer token ([`Token`])\n\
    \n\
    This type provides custom implementations of [`Display`][Self#impl-Display] and \
    [`Debug`][Self#impl-Debug] to prevent unintentional disclosures of sensitive values. \
    See the documentation on those trait implementations for more information.
    "
)]
#[must_use]
pub struct Token;

/// By default, this type holds potentially sensitive information. To prevent
/// unintentional disclosure of this value, this type will not print out its
/// contents without explicitly specifying the alternate debug format,
/// i.e. `{:#?}`. When specified in this form, it will print out the entire header
/// and payload, but will omit the token's signature. To change the number of
/// characters in the signature that should be printed, specify the amount as a
/// width in the format string, i.e. `{:#25?}`.
///
/// If not specified, a placeholder value will be printed out instead to indicate
/// that it is hiding sensitive information.
///
/// If, for any reason, the token does not contain a `.` character, then the limitations
/// specified above will apply to the token as a whole.
impl fmt::Debug for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            f.write_str("\"")?;
            let last_period = &self.0.rfind('.');
            if let Some(last_period) = *last_period {
                f.write_str(&self.0[..=last_period])?;
                limited_reveal(&self.0[last_period + 1..], &mut *f, 0)?;
            } else {
                limited_reveal(&self.0, &mut *f, 0)?;
            }
            f.write_str("\"")
        } else {
            f.write_str(concat!("***", "JWT", "***"))
        }
    }
}

/// By default, this type holds potentially sensitive information. To prevent
/// unintentional disclosure of this value, this type will not print out its
/// contents without explicitly specifying the alternate format,
/// i.e. `{:#}`. When specified in this form, it will print out the entire token by default.
/// However, if it is preferable to elide some of the characters in the signature, then that
/// can be modified by specify the quantity as a width in the format string, i.e. `{:#10}`.
///
/// If not specified, a placeholder value will be printed out instead to indicate
/// that it is hiding sensitive information.
impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            let last_period = &self.0.rfind('.');
            if let Some(last_period) = *last_period {
                f.write_str(&self.0[..=last_period])?;
                limited_reveal(&self.0[last_period + 1..], &mut *f, usize::MAX)
            } else {
                limited_reveal(&self.0, &mut *f, usize::MAX)
            }
        } else {
            f.write_str(concat!("***", "JWT", "***"))
        }
    }
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The headers of an incoming token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Headers {
    alg: jwa::Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<jwk::KeyId>,
}

impl Headers {
    /// The algorithm named by the token header
    #[must_use]
    pub fn alg(&self) -> jwa::Algorithm {
        self.alg
    }

    /// The id of the key that signed this token, if named
    #[must_use]
    pub fn kid(&self) -> Option<&jwk::KeyIdRef> {
        self.kid.as_deref()
    }
}

/// A token that has been split into its component parts
///
/// This structure is suitable for inspection to determine which key
/// should be used to verify the token.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Decomposed<'a> {
    header: Headers,
    message: &'a str,
    payload: &'a str,
    signature: Base64Url,
}

macro_rules! expect_two {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next()) {
            (Some(first), Some(second), None) => Some((first, second)),
            _ => None,
        }
    }};
}

impl TokenRef {
    /// Decomposes the token into its parts, preparing it for verification
    ///
    /// Tokens containing ASCII control characters are rejected before any
    /// decoding takes place.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed.
    pub fn decompose(&self) -> Result<Decomposed, MalformedCredential> {
        if let Some(position) = self.as_str().bytes().position(|b| b.is_ascii_control()) {
            return Err(MalformedCredential::ControlCharacter { position });
        }

        let (s_str, message) =
            expect_two!(self.as_str().rsplitn(2, '.')).ok_or(MalformedCredential::Structure)?;
        let (payload, h_str) =
            expect_two!(message.rsplitn(2, '.')).ok_or(MalformedCredential::Structure)?;
        let h_raw = Base64Url::from_encoded(h_str).map_err(error::malformed_header)?;
        let signature = Base64Url::from_encoded(s_str).map_err(error::malformed_signature)?;
        let header: Headers =
            serde_json::from_slice(h_raw.as_slice()).map_err(error::malformed_header)?;

        Ok(Decomposed {
            header,
            message,
            payload,
            signature,
        })
    }
}

impl<'a> Decomposed<'a> {
    /// The untrusted headers of the token
    ///
    /// **WARNING:** *These headers have not been validated and should not be
    /// trusted.* An adversary can place arbitrary data into the header and
    /// payload of a token. The only sound use of this data is to select the
    /// key used to verify the signature.
    pub fn untrusted_header(&self) -> &Headers {
        &self.header
    }

    /// The raw signature of the token
    pub fn signature(&self) -> &Base64UrlRef {
        &self.signature
    }

    /// Verifies the token's signature under `key` and decodes the payload
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify or if the payload
    /// cannot be decoded as a claims object.
    pub(crate) fn verify(self, key: &Jwk) -> Result<RawClaims, VerifyError> {
        key.verify(
            self.header.alg(),
            self.message.as_bytes(),
            self.signature.as_slice(),
        )?;

        let p_raw = Base64Url::from_encoded(self.payload).map_err(error::malformed_payload)?;
        let claims: RawClaims =
            serde_json::from_slice(p_raw.as_slice()).map_err(error::malformed_payload)?;

        Ok(claims)
    }
}

/// A set of zero or more [`Audience`]s
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<Audience>", into = "OneOrMany<Audience>")]
#[repr(transparent)]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// An empty audience set
    #[inline]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// An audience set with a single audience
    #[inline]
    pub fn single(aud: impl Into<Audience>) -> Self {
        Self(vec![aud.into()])
    }

    /// Indicates whether the audience set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates through references to the audiences in the set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(AsRef::as_ref)
    }
}

impl From<OneOrMany<Audience>> for Audiences {
    #[inline]
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl From<Audiences> for OneOrMany<Audience> {
    #[inline]
    fn from(mut vec: Audiences) -> Self {
        if vec.0.len() == 1 {
            Self::One(vec.0.pop().expect("vec has exactly one element"))
        } else {
            Self::Many(vec.0)
        }
    }
}

impl From<Vec<Audience>> for Audiences {
    #[inline]
    fn from(vals: Vec<Audience>) -> Self {
        Self(vals)
    }
}

impl From<Audience> for Audiences {
    #[inline]
    fn from(aud: Audience) -> Self {
        Self::single(aud)
    }
}

/// A type representing one or more items, primarily for serialization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// The claims payload exactly as carried by a token
///
/// Scope normalization and role collection happen when this is turned
/// into a [`ClaimSet`]; until then nothing here should be trusted.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub(crate) iss: Option<Issuer>,
    #[serde(default)]
    pub(crate) aud: Audiences,
    #[serde(default)]
    pub(crate) sub: Option<Subject>,
    #[serde(default)]
    pub(crate) iat: Option<UnixTime>,
    #[serde(default)]
    pub(crate) exp: Option<UnixTime>,
    #[serde(default)]
    pub(crate) preferred_username: Option<String>,
    #[serde(default)]
    pub(crate) scope: Option<String>,
    #[serde(default)]
    pub(crate) scopes: Vec<String>,
    #[serde(default)]
    pub(crate) roles: RoleSet,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
}

/// The verified identity and grants extracted from a credential
///
/// A claim set is only ever produced by a
/// [`TokenVerifier`][crate::authority::TokenVerifier], either from a
/// credential that passed every check or, on an unsecured verifier, as
/// the [anonymous][Self::is_anonymous] pseudo-identity.
#[derive(Clone, Debug)]
#[must_use]
pub struct ClaimSet {
    issuer: Option<Issuer>,
    audiences: Audiences,
    subject: Option<Subject>,
    issued_at: Option<UnixTime>,
    expiry: Option<UnixTime>,
    preferred_username: Option<String>,
    scope: Scope,
    roles: RoleSet,
    extra: serde_json::Map<String, serde_json::Value>,
    anonymous: bool,
}

impl ClaimSet {
    /// The pseudo-identity handed out by an unsecured verifier
    pub fn anonymous() -> Self {
        Self {
            issuer: None,
            audiences: Audiences::empty(),
            subject: None,
            issued_at: None,
            expiry: None,
            preferred_username: None,
            scope: Scope::empty(),
            roles: RoleSet::empty(),
            extra: serde_json::Map::new(),
            anonymous: true,
        }
    }

    pub(crate) fn from_raw(raw: RawClaims) -> Self {
        let scope = collect_scope(raw.scope.as_deref(), &raw.scopes);

        Self {
            issuer: raw.iss,
            audiences: raw.aud,
            subject: raw.sub,
            issued_at: raw.iat,
            expiry: raw.exp,
            preferred_username: raw.preferred_username,
            scope,
            roles: raw.roles,
            extra: raw.extra,
            anonymous: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(scope: Scope, roles: RoleSet) -> Self {
        Self {
            scope,
            roles,
            anonymous: false,
            ..Self::anonymous()
        }
    }

    /// The issuer of the credential
    #[must_use]
    pub fn issuer(&self) -> Option<&IssuerRef> {
        self.issuer.as_deref()
    }

    /// The audiences the credential is addressed to
    pub fn audiences(&self) -> &Audiences {
        &self.audiences
    }

    /// The subject of the credential
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.subject.as_deref()
    }

    /// When the credential was issued
    #[must_use]
    pub fn issued_at(&self) -> Option<UnixTime> {
        self.issued_at
    }

    /// When the credential ceases to be valid
    #[must_use]
    pub fn expiry(&self) -> Option<UnixTime> {
        self.expiry
    }

    /// The preferred username asserted by the credential
    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.preferred_username.as_deref()
    }

    /// The scope granted to the credential
    ///
    /// This is the union of the space-delimited `scope` claim and the
    /// `scopes` list claim.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The roles granted to the credential
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Any claim carried by the credential beyond the well-known set
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }

    /// Whether this is the anonymous pseudo-identity
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// A human-readable name for the credential holder
    ///
    /// Prefers the `preferred_username` claim, falling back to the
    /// subject, then to `"anonymous"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.preferred_username
            .as_deref()
            .or_else(|| self.subject.as_deref().map(SubjectRef::as_str))
            .unwrap_or("anonymous")
    }
}

fn collect_scope(scope: Option<&str>, scopes: &[String]) -> Scope {
    let mut set = Scope::empty();

    let tokens = scope
        .into_iter()
        .flat_map(str::split_whitespace)
        .chain(scopes.iter().map(String::as_str));

    for raw in tokens {
        match ScopeToken::try_from(raw) {
            Ok(token) => set.insert(token),
            Err(err) => {
                tracing::warn!(scope.token = raw, error = %err, "ignoring invalid scope token");
            }
        }
    }

    set
}

/// The validation plan applied to the claims of every credential
///
/// Expiry is always checked, with an optional leeway to absorb clock
/// skew between this service and the issuer. The `iat` claim is
/// recorded but never validated: identity providers routinely mint
/// tokens with `iat` slightly ahead of the verifier's clock, and only
/// `exp` bounds a token's validity.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ClaimsValidator {
    leeway: Duration,
    allowed_audiences: Vec<Audience>,
    issuer: Option<Issuer>,
}

impl ClaimsValidator {
    /// Constructs a validator that only checks expiry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows a grace period when validating the `exp` claim
    #[inline]
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// Allows a grace period (in seconds) when validating the `exp` claim
    #[inline]
    pub fn with_leeway_secs(self, leeway: u64) -> Self {
        Self {
            leeway: Duration::from_secs(leeway),
            ..self
        }
    }

    /// Requires that credentials name a particular issuer
    #[inline]
    pub fn require_issuer(self, issuer: Issuer) -> Self {
        Self {
            issuer: Some(issuer),
            ..self
        }
    }

    /// Adds a single audience to the set of accepted audiences
    #[inline]
    pub fn add_allowed_audience(self, audience: Audience) -> Self {
        let mut this = self;
        this.allowed_audiences.push(audience);
        this
    }

    /// Adds multiple audiences to the set of accepted audiences
    #[inline]
    pub fn extend_allowed_audiences<I: IntoIterator<Item = Audience>>(self, auds: I) -> Self {
        let mut this = self;
        this.allowed_audiences.extend(auds);
        this
    }

    pub(crate) fn validate(&self, claims: &RawClaims, now: UnixTime) -> Result<(), VerifyError> {
        if let Some(exp) = claims.exp {
            if exp.0 < now.0.saturating_sub(self.leeway.as_secs()) {
                return Err(VerifyError::Expired);
            }
        } else {
            return Err(MalformedCredential::MissingRequiredClaim("exp").into());
        }

        if !self.allowed_audiences.is_empty() {
            let found = claims
                .aud
                .iter()
                .any(|a| self.allowed_audiences.iter().any(|e| a == e));
            if !found {
                return Err(VerifyError::InvalidAudience);
            }
        }

        if let Some(allowed_iss) = &self.issuer {
            match &claims.iss {
                Some(iss) if iss == allowed_iss => {}
                _ => return Err(VerifyError::InvalidIssuer),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test;

    #[test]
    fn decomposes_a_signed_token() -> Result<()> {
        let token = TokenRef::from_str(test::TOKEN_ALICE);
        let decomposed = token.decompose()?;
        assert_eq!(decomposed.untrusted_header().alg(), jwa::Algorithm::Rs256);
        assert_eq!(
            decomposed.untrusted_header().kid(),
            Some(jwk::KeyIdRef::from_str("key-1"))
        );
        Ok(())
    }

    #[test]
    fn rejects_two_part_token() {
        let err = TokenRef::from_str("header.payload").decompose().unwrap_err();
        assert!(matches!(err, MalformedCredential::Structure));
    }

    #[test]
    fn rejects_embedded_control_characters() {
        let err = TokenRef::from_str("eyJ\r\nhbGci.payload.signature")
            .decompose()
            .unwrap_err();
        assert!(matches!(
            err,
            MalformedCredential::ControlCharacter { position: 3 }
        ));
    }

    #[test]
    fn rejects_unsupported_algorithm_in_header() {
        // {"alg":"none"}
        let token = Token::new("eyJhbGciOiJub25lIn0.e30.sig".to_string());
        let err = token.decompose().unwrap_err();
        assert!(matches!(err, MalformedCredential::Header(_)));
    }

    #[test]
    fn debug_and_display_are_redacted() {
        let token = Token::from_static(test::TOKEN_ALICE);
        assert_eq!(format!("{:?}", token), "***JWT***");
        assert_eq!(format!("{}", token), "***JWT***");
    }

    #[test]
    fn scope_claims_are_merged() {
        let raw = RawClaims {
            iss: None,
            aud: Audiences::empty(),
            sub: None,
            iat: None,
            exp: None,
            preferred_username: None,
            scope: Some(String::from("mcp:read mcp:tools")),
            scopes: vec![String::from("mcp:read"), String::from("mcp:prompts")],
            roles: RoleSet::empty(),
            extra: serde_json::Map::new(),
        };

        let claims = ClaimSet::from_raw(raw);
        assert_eq!(claims.scope().len(), 3);
    }

    #[test]
    fn missing_expiry_is_malformed() {
        let raw = RawClaims {
            iss: None,
            aud: Audiences::empty(),
            sub: None,
            iat: None,
            exp: None,
            preferred_username: None,
            scope: None,
            scopes: Vec::new(),
            roles: RoleSet::empty(),
            extra: serde_json::Map::new(),
        };

        let err = ClaimsValidator::new()
            .validate(&raw, UnixTime(test::TEST_NOW))
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::MalformedCredential(MalformedCredential::MissingRequiredClaim("exp"))
        ));
    }

    #[test]
    fn leeway_tolerates_recent_expiry() {
        let raw = RawClaims {
            iss: None,
            aud: Audiences::empty(),
            sub: None,
            iat: None,
            exp: Some(UnixTime(test::TEST_NOW - 30)),
            preferred_username: None,
            scope: None,
            scopes: Vec::new(),
            roles: RoleSet::empty(),
            extra: serde_json::Map::new(),
        };

        let strict = ClaimsValidator::new();
        assert!(matches!(
            strict.validate(&raw, UnixTime(test::TEST_NOW)),
            Err(VerifyError::Expired)
        ));

        let lenient = ClaimsValidator::new().with_leeway_secs(60);
        assert!(lenient.validate(&raw, UnixTime(test::TEST_NOW)).is_ok());
    }
}
