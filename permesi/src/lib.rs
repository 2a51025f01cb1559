//! Bearer credential verification and authorization for RPC services
//!
//! This crate verifies RS256-signed bearer tokens against a local or
//! remote (JWKS) key set and evaluates an [`AccessPolicy`] over the
//! resulting [`ClaimSet`]. Remote key sets are cached with a
//! time-to-live and re-fetched at most once per verification when a
//! credential names an unrecognized key, which is how issuer key
//! rotation is absorbed without restarts.
//!
//! ```
//! use permesi::{AccessPolicy, Action, ResourceRef};
//! use permesi::jwt::ClaimSet;
//!
//! let policy = AccessPolicy::strict();
//! let anonymous = ClaimSet::anonymous();
//!
//! assert!(policy
//!     .allow(&anonymous, ResourceRef::from_str("tools"), Action::Read)
//!     .is_err());
//! ```
//!
//! # Feature flags
//!
//! When using this crate and the `reqwest` feature to enable fetching
//! of remote key sets, this crate does not automatically enable TLS
//! support in `reqwest` itself. If your application already uses
//! `reqwest` with some TLS settings (native/OpenSSL/rustls), then this
//! crate will use those settings automatically. However, if the only
//! reason you are using `reqwest` is transitively through this crate,
//! you may need to enable the `default-tls` or `rustls-tls` feature to
//! enable support for calling out to an HTTPS endpoint.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod authority;
pub mod config;
pub mod error;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jwt;
pub mod policy;
pub mod role;
pub mod scope;

#[cfg(test)]
pub(crate) mod test;

#[cfg(feature = "reqwest")]
pub use authority::HttpKeySetFetcher;
pub use authority::{KeySetFetcher, KeySource, RemoteKeySource, TokenVerifier};
pub use error::VerifyError;
pub use jwk::Jwk;
pub use jwks::KeySet;
pub use jwt::{ClaimSet, Token, TokenRef};
pub use policy::{AccessDenied, AccessPolicy, Action, Resource, ResourceRef};
pub use role::{Role, RoleRef};
pub use scope::{Scope, ScopeToken, ScopeTokenRef};
