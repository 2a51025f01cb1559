//! Deserializable configuration for verifiers and policies

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    authority::{KeySource, RemoteKeySource, TokenVerifier},
    jwt::{Audience, ClaimsValidator, Issuer},
    policy::AccessPolicy,
    role::Role,
    scope::{InvalidScopeToken, ScopeToken},
    Resource,
};

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Where a verifier's trusted keys come from
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum KeySourceConfig {
    /// A JWKS document read once from local disk
    LocalFile {
        /// Path to the JWKS document
        path: PathBuf,
    },

    /// A JWKS endpoint fetched over HTTP and cached
    Remote {
        /// URL of the JWKS endpoint
        jwks_url: String,
    },

    /// No trust key at all; every caller becomes anonymous
    Unsecured,
}

/// Configuration for a [`TokenVerifier`]
#[derive(Clone, Debug, Deserialize)]
pub struct VerifierConfig {
    /// The issuer credentials must name, if any
    #[serde(default)]
    pub issuer: Option<Issuer>,

    /// The audiences this service will accept credentials for
    #[serde(default)]
    pub audiences: Vec<Audience>,

    /// Where trusted keys come from
    pub keys: KeySourceConfig,

    /// How long a fetched key set stays fresh, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// The timeout applied to key set fetches, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Grace period applied when validating expiry, in seconds
    #[serde(default)]
    pub leeway_secs: u64,
}

/// An error occurring while building a verifier from configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The local key set file could not be read
    #[error("unable to read key set from {path}")]
    ReadKeySet {
        /// The configured path
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The local key set file could not be parsed
    #[error("unable to parse key set from {path}")]
    ParseKeySet {
        /// The configured path
        path: PathBuf,
        /// The underlying parse failure
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client for the JWKS endpoint could not be constructed
    #[cfg(feature = "reqwest")]
    #[error("unable to construct JWKS HTTP client")]
    HttpClient(#[from] reqwest::Error),
}

impl VerifierConfig {
    /// The claims validation plan described by this configuration
    pub fn validator(&self) -> ClaimsValidator {
        let mut validator = ClaimsValidator::new()
            .with_leeway_secs(self.leeway_secs)
            .extend_allowed_audiences(self.audiences.iter().cloned());
        if let Some(issuer) = &self.issuer {
            validator = validator.require_issuer(issuer.clone());
        }
        validator
    }

    /// How long a fetched key set stays fresh
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// The timeout applied to key set fetches
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Builds the configured verifier
    ///
    /// # Errors
    ///
    /// Returns an error if a local key set cannot be loaded or the
    /// JWKS HTTP client cannot be constructed.
    #[cfg(feature = "reqwest")]
    pub fn build(&self) -> Result<TokenVerifier, ConfigError> {
        let source = match &self.keys {
            KeySourceConfig::Unsecured => return Ok(TokenVerifier::unsecured()),
            KeySourceConfig::LocalFile { path } => KeySource::Local(load_key_set(path)?),
            KeySourceConfig::Remote { jwks_url } => {
                let fetcher =
                    crate::authority::HttpKeySetFetcher::new(jwks_url.clone(), self.fetch_timeout())?;
                KeySource::Remote(RemoteKeySource::new(fetcher, self.cache_ttl()))
            }
        };

        Ok(TokenVerifier::new(source, self.validator()))
    }

    /// Builds the configured verifier using a caller-supplied fetcher
    ///
    /// The fetcher stands in for the HTTP client whenever a remote key
    /// source is configured; local and unsecured sources ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if a local key set cannot be loaded.
    pub fn build_with_fetcher(
        &self,
        fetcher: impl crate::authority::KeySetFetcher + 'static,
    ) -> Result<TokenVerifier, ConfigError> {
        let source = match &self.keys {
            KeySourceConfig::Unsecured => return Ok(TokenVerifier::unsecured()),
            KeySourceConfig::LocalFile { path } => KeySource::Local(load_key_set(path)?),
            KeySourceConfig::Remote { .. } => {
                KeySource::Remote(RemoteKeySource::new(fetcher, self.cache_ttl()))
            }
        };

        Ok(TokenVerifier::new(source, self.validator()))
    }
}

fn load_key_set(path: &PathBuf) -> Result<crate::KeySet, ConfigError> {
    let raw = std::fs::read(path).map_err(|source| ConfigError::ReadKeySet {
        path: path.clone(),
        source,
    })?;

    serde_json::from_slice(&raw).map_err(|source| ConfigError::ParseKeySet {
        path: path.clone(),
        source,
    })
}

fn default_scope_prefix() -> String {
    String::from("mcp")
}

fn default_admin_role() -> Role {
    Role::from_static("admin")
}

/// Configuration for an [`AccessPolicy`]
#[derive(Clone, Debug, Deserialize)]
pub struct PolicyConfig {
    /// The prefix qualifying resource names into scope tokens
    #[serde(default = "default_scope_prefix")]
    pub scope_prefix: String,

    /// The role that bypasses scope checks
    #[serde(default = "default_admin_role")]
    pub admin_role: Role,

    /// Resources withheld from the generic read grant
    #[serde(default)]
    pub exclude_from_read: Vec<Resource>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            scope_prefix: default_scope_prefix(),
            admin_role: default_admin_role(),
            exclude_from_read: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Builds the configured policy
    ///
    /// # Errors
    ///
    /// Returns an error if the scope prefix cannot form a valid scope
    /// token.
    pub fn build(&self) -> Result<AccessPolicy, InvalidScopeToken> {
        ScopeToken::new(format!("{}:read", self.scope_prefix))?;

        let mut policy = AccessPolicy::with_scope_prefix(self.scope_prefix.clone())
            .with_admin_role(self.admin_role.clone());
        for resource in &self.exclude_from_read {
            policy = policy.exclude_from_read(resource.clone());
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::{
        policy::{Action, ResourceRef},
        test,
    };

    const FULL_CONFIG: &str = r#"
        issuer = "https://issuer.example.com"
        audiences = ["rpc-server"]

        [keys]
        type = "remote"
        jwks_url = "https://issuer.example.com/.well-known/jwks.json"
    "#;

    #[test]
    fn defaults_are_applied() -> Result<()> {
        let config: VerifierConfig = toml::from_str(FULL_CONFIG)?;
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.leeway_secs, 0);
        assert!(matches!(config.keys, KeySourceConfig::Remote { .. }));
        Ok(())
    }

    #[test]
    fn unsecured_config_builds_unsecured_verifier() -> Result<()> {
        let config: VerifierConfig = toml::from_str(
            r#"
                [keys]
                type = "unsecured"
            "#,
        )?;

        #[cfg(feature = "reqwest")]
        assert!(config.build()?.is_unsecured());
        let _ = &config;
        Ok(())
    }

    #[test]
    fn local_file_key_set_is_loaded() -> Result<()> {
        let path = std::env::temp_dir().join("permesi-config-test-jwks.json");
        std::fs::write(&path, test::KEY_SET_JSON)?;

        let config: VerifierConfig = toml::from_str(&format!(
            r#"
                issuer = "https://issuer.example.com"

                [keys]
                type = "local-file"
                path = "{}"
            "#,
            path.display()
        ))?;

        #[cfg(feature = "reqwest")]
        assert!(!config.build()?.is_unsecured());

        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn missing_key_set_file_is_an_error() {
        let config: VerifierConfig = toml::from_str(
            r#"
                [keys]
                type = "local-file"
                path = "/nonexistent/jwks.json"
            "#,
        )
        .unwrap();

        #[cfg(feature = "reqwest")]
        assert!(matches!(
            config.build(),
            Err(ConfigError::ReadKeySet { .. })
        ));
        let _ = &config;
    }

    #[test]
    fn policy_config_builds_exclusions() -> Result<()> {
        let config: PolicyConfig = toml::from_str(
            r#"
                exclude_from_read = ["tools", "prompts"]
            "#,
        )?;

        let policy = config.build()?;
        let reader = crate::jwt::ClaimSet::for_tests(
            crate::Scope::try_from("mcp:read")?,
            crate::role::RoleSet::empty(),
        );

        assert!(policy
            .allow(&reader, ResourceRef::from_str("tools"), Action::Read)
            .is_err());
        assert!(policy
            .allow(&reader, ResourceRef::from_str("status"), Action::Read)
            .is_ok());
        Ok(())
    }

    #[test]
    fn invalid_scope_prefix_is_an_error() {
        let config = PolicyConfig {
            scope_prefix: String::from("bad prefix"),
            ..PolicyConfig::default()
        };
        assert!(config.build().is_err());
    }
}
