//! An authenticated JSON-RPC request dispatcher
//!
//! This crate routes JSON-RPC 2.0 request bodies through credential
//! verification and policy authorization (both from [`permesi`]) and
//! into registered async method handlers. Notifications are
//! acknowledged without authentication, rejected credentials produce
//! an HTTP challenge, and every other path yields a response envelope
//! with the appropriate JSON-RPC error code.
//!
//! ```
//! use permesi::{AccessPolicy, TokenVerifier};
//! use permesi_rpc::{Challenge, Dispatcher, MethodRegistry, Permission};
//!
//! let registry = MethodRegistry::builder()
//!     .method("ping", None, |_params, _claims| async {
//!         Ok(serde_json::json!("pong"))
//!     })
//!     .method("tools/call", Permission::execute("tools"), |params, _claims| async move {
//!         Ok(params.unwrap_or(serde_json::Value::Null))
//!     })
//!     .build();
//!
//! let dispatcher = Dispatcher::new(
//!     registry,
//!     TokenVerifier::unsecured(),
//!     AccessPolicy::permissive(),
//!     Challenge::new("my-server"),
//! );
//! assert_eq!(dispatcher.registry().len(), 2);
//! ```

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

pub mod dispatch;
pub mod envelope;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod test;

pub use dispatch::{DispatchConfig, DispatchOrder, Dispatcher, Outcome, ReplyKind};
pub use envelope::{code, Envelope, Fault, RequestId, Response};
pub use registry::{BoxError, MethodRegistry, MethodRegistryBuilder, Permission};
pub use transport::{into_response, Challenge, ResourceMetadata};
