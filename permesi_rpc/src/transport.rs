//! Rendering outcomes onto HTTP

use std::fmt::Write;

use http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::dispatch::{Outcome, ReplyKind};

/// The challenge advertised alongside `401 Unauthorized` responses
///
/// Renders as a `WWW-Authenticate: Bearer ...` header carrying the
/// realm and, when configured, a pointer to the protected resource
/// metadata document so that clients can discover the authorization
/// server on their own.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Challenge {
    realm: String,
    resource_metadata: Option<String>,
}

impl Challenge {
    /// A challenge for the given realm
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            resource_metadata: None,
        }
    }

    /// Attaches the URL of the protected resource metadata document
    pub fn with_resource_metadata(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata = Some(url.into());
        self
    }

    /// The realm being protected
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Renders the `WWW-Authenticate` header value
    ///
    /// The realm and metadata URL are automatically escaped to make
    /// sure the result is header-friendly.
    #[must_use]
    pub fn to_header_value(&self) -> HeaderValue {
        let mut value = String::new();
        write!(value, r#"Bearer realm="{}""#, self.realm.escape_default())
            .expect("writes to strings never fail");
        if let Some(url) = &self.resource_metadata {
            write!(value, r#", resource_metadata="{}""#, url.escape_default())
                .expect("writes to strings never fail");
        }

        HeaderValue::try_from(value).expect("escaped challenge is a valid header value")
    }
}

/// The protected resource metadata document defined by [RFC 9728]
///
/// Served from `/.well-known/oauth-protected-resource` so that clients
/// holding nothing but a `401` can find the authorization server and
/// the scopes worth requesting.
///
/// [RFC 9728]: https://datatracker.ietf.org/doc/html/rfc9728
#[derive(Clone, Debug, Serialize)]
#[must_use]
pub struct ResourceMetadata {
    resource: String,
    authorization_servers: Vec<String>,
    scopes_supported: Vec<String>,
    bearer_methods_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_documentation: Option<String>,
}

impl ResourceMetadata {
    /// Metadata for the given resource identifier
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers: Vec::new(),
            scopes_supported: Vec::new(),
            bearer_methods_supported: vec![String::from("header")],
            resource_documentation: None,
        }
    }

    /// Adds an authorization server clients may obtain tokens from
    pub fn add_authorization_server(mut self, url: impl Into<String>) -> Self {
        self.authorization_servers.push(url.into());
        self
    }

    /// Advertises the scopes this resource understands
    pub fn with_scopes_supported<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes_supported = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Points at human-readable documentation for the resource
    pub fn with_documentation(mut self, url: impl Into<String>) -> Self {
        self.resource_documentation = Some(url.into());
        self
    }

    /// Serializes the document for the well-known endpoint
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("metadata serialization is infallible")
    }
}

fn json_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Maps a dispatch outcome onto an HTTP response
///
/// Notifications are acknowledged with an empty `202 Accepted`;
/// authentication failures carry the challenge in `WWW-Authenticate`;
/// everything else is a JSON body whose status reflects the reply
/// kind.
#[must_use]
pub fn into_response(outcome: Outcome) -> Response<String> {
    match outcome {
        Outcome::NotificationAck => {
            let mut response = Response::new(String::new());
            *response.status_mut() = StatusCode::ACCEPTED;
            response
        }
        Outcome::Unauthorized { error, challenge } => {
            let body = serde_json::json!({ "detail": error.to_string() });
            let mut response = json_response(
                StatusCode::UNAUTHORIZED,
                body.to_string(),
            );
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge.to_header_value());
            response
        }
        Outcome::Reply { response, kind } => {
            let status = match kind {
                ReplyKind::Success => StatusCode::OK,
                ReplyKind::ParseError | ReplyKind::InvalidRequest | ReplyKind::MethodNotFound => {
                    StatusCode::BAD_REQUEST
                }
                ReplyKind::PermissionDenied => StatusCode::FORBIDDEN,
                ReplyKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };

            let body =
                serde_json::to_string(&response).expect("response serialization is infallible");
            json_response(status, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_renders_realm_and_metadata() {
        let challenge = Challenge::new("mcp-server")
            .with_resource_metadata("https://rpc.example.com/.well-known/oauth-protected-resource");

        let value = challenge.to_header_value();
        assert_eq!(
            value.to_str().unwrap(),
            "Bearer realm=\"mcp-server\", resource_metadata=\
             \"https://rpc.example.com/.well-known/oauth-protected-resource\""
        );
    }

    #[test]
    fn bare_challenge_renders_realm_only() {
        let value = Challenge::new("mcp-server").to_header_value();
        assert_eq!(value.to_str().unwrap(), "Bearer realm=\"mcp-server\"");
    }

    #[test]
    fn metadata_document_shape() {
        let metadata = ResourceMetadata::new("https://rpc.example.com")
            .add_authorization_server("https://issuer.example.com")
            .with_scopes_supported(["mcp:read", "mcp:tools"]);

        let value: serde_json::Value = serde_json::from_str(&metadata.to_json()).unwrap();
        assert_eq!(value["resource"], "https://rpc.example.com");
        assert_eq!(
            value["authorization_servers"],
            serde_json::json!(["https://issuer.example.com"])
        );
        assert_eq!(
            value["scopes_supported"],
            serde_json::json!(["mcp:read", "mcp:tools"])
        );
        assert_eq!(
            value["bearer_methods_supported"],
            serde_json::json!(["header"])
        );
        assert!(value.get("resource_documentation").is_none());
    }
}
