//! Key sources and the token verifier built on top of them

use std::{fmt, sync::Arc, time::Duration};

use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::{
    error::{FetchError, KeyResolveError, MalformedCredential, VerifyError},
    jwa,
    jwk::KeyIdRef,
    jwt::{ClaimSet, ClaimsValidator, TokenRef},
    Jwk, KeySet,
};

/// A source of key sets published by a token issuer
///
/// Implementations are expected to produce the issuer's current key
/// set on every call; caching and refresh policy belong to
/// [`RemoteKeySource`], not to the fetcher.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Produces the issuer's current key set
    ///
    /// # Errors
    ///
    /// Returns an error if the key set could not be obtained.
    async fn fetch_key_set(&self) -> Result<KeySet, FetchError>;
}

#[async_trait]
impl<T: KeySetFetcher + ?Sized> KeySetFetcher for Arc<T> {
    async fn fetch_key_set(&self) -> Result<KeySet, FetchError> {
        (**self).fetch_key_set().await
    }
}

/// Fetches key sets from a JWKS URL over HTTP
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "reqwest")]
impl HttpKeySetFetcher {
    /// Constructs a fetcher for the given JWKS URL
    ///
    /// Requests are bounded by `timeout` so that a wedged provider
    /// cannot hold verifications hostage.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The JWKS URL this fetcher reads from
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "reqwest")]
#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch_key_set(&self) -> Result<KeySet, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FetchError::new)?
            .error_for_status()
            .map_err(FetchError::new)?;

        let keys: KeySet = response.json().await.map_err(FetchError::new)?;

        tracing::debug!(
            jwks.url = %self.url,
            jwks.keys = keys.keys().len(),
            "fetched remote key set"
        );

        Ok(keys)
    }
}

struct CachedKeys {
    keys: KeySet,
    fetched_at: UnixTime,
}

/// A key source that keeps a remote key set cached
///
/// The cached set is trusted until its age reaches the configured
/// time-to-live. A credential naming a key id absent from a fresh
/// cache triggers at most one re-fetch, which is how newly rotated
/// keys are picked up without restarting the service. Concurrent
/// verifications that miss the cache coalesce onto a single fetch.
pub struct RemoteKeySource {
    fetcher: Box<dyn KeySetFetcher>,
    cache: ArcSwapOption<CachedKeys>,
    ttl: Duration,
    refresh: tokio::sync::Mutex<()>,
}

impl RemoteKeySource {
    /// Constructs a key source over the given fetcher
    pub fn new(fetcher: impl KeySetFetcher + 'static, ttl: Duration) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            cache: ArcSwapOption::new(None),
            ttl,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// The configured cache time-to-live
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, cached: &CachedKeys, now: UnixTime) -> bool {
        now.0.saturating_sub(cached.fetched_at.0) < self.ttl.as_secs()
    }

    /// Resolves the key with the given id, fetching at most once
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or if no
    /// key with the given id exists even after a re-fetch.
    pub async fn resolve(
        &self,
        kid: &KeyIdRef,
        alg: jwa::Algorithm,
        now: UnixTime,
    ) -> Result<Jwk, KeyResolveError> {
        let seen = self.cache.load_full();
        if let Some(cached) = &seen {
            if self.is_fresh(cached, now) {
                if let Some(key) = cached.keys.get_key(kid, alg) {
                    return Ok(key.clone());
                }
            }
        }

        // Cache miss, staleness, or an unrecognized key id: allow one fetch.
        let _refresh = self.refresh.lock().await;

        let current = self.cache.load_full();
        let refreshed_while_waiting = match (&seen, &current) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, Some(_)) => true,
            _ => false,
        };

        if refreshed_while_waiting {
            if let Some(cached) = &current {
                if self.is_fresh(cached, now) {
                    return cached
                        .keys
                        .get_key(kid, alg)
                        .cloned()
                        .ok_or(KeyResolveError::NotFound);
                }
            }
        }

        let keys = self.fetcher.fetch_key_set().await?;
        tracing::info!(jwks.keys = keys.keys().len(), "key set refreshed");

        let cached = Arc::new(CachedKeys {
            keys,
            fetched_at: now,
        });
        self.cache.store(Some(Arc::clone(&cached)));

        cached
            .keys
            .get_key(kid, alg)
            .cloned()
            .ok_or(KeyResolveError::NotFound)
    }
}

impl fmt::Debug for RemoteKeySource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteKeySource")
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.load().is_some())
            .finish_non_exhaustive()
    }
}

/// Where a verifier finds the keys it trusts
#[derive(Debug)]
pub enum KeySource {
    /// A fixed key set supplied at construction
    Local(KeySet),

    /// A cached remote key set
    Remote(RemoteKeySource),
}

impl KeySource {
    /// Resolves the key with the given id
    ///
    /// A local source never fetches; an unrecognized key id is simply
    /// not found.
    ///
    /// # Errors
    ///
    /// Returns an error if no key matches or the remote provider is
    /// unavailable.
    pub async fn resolve(
        &self,
        kid: &KeyIdRef,
        alg: jwa::Algorithm,
        now: UnixTime,
    ) -> Result<Jwk, KeyResolveError> {
        match self {
            Self::Local(keys) => keys
                .get_key(kid, alg)
                .cloned()
                .ok_or(KeyResolveError::NotFound),
            Self::Remote(source) => source.resolve(kid, alg, now).await,
        }
    }
}

impl From<KeySet> for KeySource {
    fn from(keys: KeySet) -> Self {
        Self::Local(keys)
    }
}

impl From<RemoteKeySource> for KeySource {
    fn from(source: RemoteKeySource) -> Self {
        Self::Remote(source)
    }
}

/// Verifies bearer credentials and produces trusted [`ClaimSet`]s
///
/// Verification runs a fixed ladder: decompose the token, resolve the
/// signing key, check the signature, then validate the claims. The
/// first failing rung rejects the credential with the corresponding
/// [`VerifyError`] variant.
#[derive(Debug)]
pub struct TokenVerifier<C = System> {
    key_source: Option<KeySource>,
    validator: ClaimsValidator,
    clock: C,
}

impl TokenVerifier {
    /// Constructs a verifier over the given key source
    pub fn new(key_source: impl Into<KeySource>, validator: ClaimsValidator) -> Self {
        Self {
            key_source: Some(key_source.into()),
            validator,
            clock: System,
        }
    }

    /// Constructs a verifier with no trust key at all
    ///
    /// An unsecured verifier accepts every request and hands out the
    /// anonymous identity. Each acceptance is logged at warning level,
    /// as this mode is only fit for local development.
    pub fn unsecured() -> Self {
        Self {
            key_source: None,
            validator: ClaimsValidator::default(),
            clock: System,
        }
    }
}

impl<C> TokenVerifier<C> {
    /// Replaces the clock used for expiry validation and cache aging
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TokenVerifier<C2> {
        TokenVerifier {
            key_source: self.key_source,
            validator: self.validator,
            clock,
        }
    }

    /// Whether this verifier was constructed without a trust key
    #[must_use]
    pub fn is_unsecured(&self) -> bool {
        self.key_source.is_none()
    }
}

impl<C: Clock> TokenVerifier<C> {
    /// Verifies the presented credential
    ///
    /// # Errors
    ///
    /// Returns the fault that rejected the credential.
    pub async fn verify(&self, credential: Option<&TokenRef>) -> Result<ClaimSet, VerifyError> {
        let Some(key_source) = &self.key_source else {
            tracing::warn!("verifier has no trust key configured; issuing anonymous identity");
            return Ok(ClaimSet::anonymous());
        };

        let token = credential.ok_or(VerifyError::MissingCredential)?;
        let decomposed = token.decompose()?;

        let kid = decomposed
            .untrusted_header()
            .kid()
            .ok_or(MalformedCredential::MissingKeyId)?;
        let alg = decomposed.untrusted_header().alg();

        let now = self.clock.now();
        let key = key_source.resolve(kid, alg, now).await?;

        let raw = decomposed.verify(&key)?;
        self.validator.validate(&raw, now)?;

        let claims = ClaimSet::from_raw(raw);
        tracing::debug!(auth.subject = claims.display_name(), "credential verified");
        Ok(claims)
    }
}
