//! The request dispatch state machine

use std::sync::Arc;

use aliri_clock::{Clock, System};
use permesi::{jwt::TokenRef, AccessPolicy, TokenVerifier, VerifyError};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    envelope::{Envelope, Fault, RequestId, Response},
    transport::Challenge,
    registry::MethodRegistry,
};

/// Whether method lookup happens before or after authentication
///
/// The order is observable: an unauthenticated request for a missing
/// method yields `401` under [`AuthFirst`][Self::AuthFirst] but a
/// method-not-found fault under [`MethodFirst`][Self::MethodFirst].
/// Authenticating first avoids disclosing which methods exist to
/// callers who hold no valid credential.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchOrder {
    /// Verify the credential before looking up the method
    #[default]
    AuthFirst,
    /// Look up the method before verifying the credential
    MethodFirst,
}

/// How a reply should be interpreted by the transport
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    /// The handler produced a result
    Success,
    /// The body was not valid JSON
    ParseError,
    /// The body was not a valid request envelope
    InvalidRequest,
    /// No such method is registered
    MethodNotFound,
    /// The caller is authenticated but not permitted
    PermissionDenied,
    /// The handler failed
    Internal,
}

/// The result of dispatching one request body
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    /// A notification was accepted; there is nothing to send back
    NotificationAck,

    /// The credential was rejected; the caller should be challenged
    Unauthorized {
        /// The fault that rejected the credential
        error: VerifyError,
        /// The challenge to advertise
        challenge: Challenge,
    },

    /// A response envelope to send back
    Reply {
        /// The response envelope
        response: Response,
        /// How the transport should interpret the reply
        kind: ReplyKind,
    },
}

impl Outcome {
    fn reply(response: Response, kind: ReplyKind) -> Self {
        Self::Reply { response, kind }
    }
}

/// Transport-independent dispatch settings
#[derive(Clone, Debug, Deserialize)]
pub struct DispatchConfig {
    /// Whether to authenticate before or after method lookup
    #[serde(default)]
    pub order: DispatchOrder,

    /// The realm advertised in challenges
    pub realm: String,

    /// The protected resource metadata URL advertised in challenges
    #[serde(default)]
    pub resource_metadata: Option<String>,
}

impl DispatchConfig {
    /// The challenge described by this configuration
    pub fn challenge(&self) -> Challenge {
        let challenge = Challenge::new(self.realm.clone());
        match &self.resource_metadata {
            Some(url) => challenge.with_resource_metadata(url.clone()),
            None => challenge,
        }
    }
}

/// Routes authenticated requests to registered method handlers
///
/// Dispatch runs a fixed state machine: parse the body, detect
/// notifications, authenticate, look up the method (in the configured
/// [`DispatchOrder`]), authorize against the policy, then invoke the
/// handler. Notifications are acknowledged before any authentication
/// takes place, since there is no channel on which to report a
/// rejection.
#[derive(Debug)]
pub struct Dispatcher<C = System> {
    registry: MethodRegistry,
    verifier: TokenVerifier<C>,
    policy: AccessPolicy,
    challenge: Challenge,
    order: DispatchOrder,
}

impl<C> Dispatcher<C> {
    /// Constructs a dispatcher over the given registry
    pub fn new(
        registry: MethodRegistry,
        verifier: TokenVerifier<C>,
        policy: AccessPolicy,
        challenge: Challenge,
    ) -> Self {
        Self {
            registry,
            verifier,
            policy,
            challenge,
            order: DispatchOrder::default(),
        }
    }

    /// Replaces the dispatch order
    #[must_use]
    pub fn with_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    /// The registry this dispatcher routes to
    #[must_use]
    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }
}

impl<C: Clock> Dispatcher<C> {
    /// Dispatches one request body
    pub async fn dispatch(&self, body: &str, credential: Option<&TokenRef>) -> Outcome {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "request body is not valid JSON");
                return Outcome::reply(
                    Response::fault(None, Fault::parse_error(err)),
                    ReplyKind::ParseError,
                );
            }
        };

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(error = %err, "request body is not a request envelope");
                return Outcome::reply(
                    Response::fault(None, Fault::invalid_request(err)),
                    ReplyKind::InvalidRequest,
                );
            }
        };

        if !envelope.has_valid_protocol() {
            return Outcome::reply(
                Response::fault(None, Fault::invalid_request("unsupported protocol version")),
                ReplyKind::InvalidRequest,
            );
        }

        let Some(id) = envelope.id else {
            tracing::debug!(rpc.method = %envelope.method, "notification acknowledged");
            return Outcome::NotificationAck;
        };

        if self.order == DispatchOrder::MethodFirst
            && self.registry.get(&envelope.method).is_none()
        {
            return self.method_not_found(id, &envelope.method);
        }

        let claims = match self.verifier.verify(credential).await {
            Ok(claims) => Arc::new(claims),
            Err(error) => {
                tracing::warn!(rpc.method = %envelope.method, error = %error, "credential rejected");
                return Outcome::Unauthorized {
                    error,
                    challenge: self.challenge.clone(),
                };
            }
        };

        let Some(entry) = self.registry.get(&envelope.method) else {
            return self.method_not_found(id, &envelope.method);
        };

        if let Some(permission) = entry.permission() {
            if self
                .policy
                .allow(&claims, permission.resource(), permission.action())
                .is_err()
            {
                tracing::warn!(
                    rpc.method = %envelope.method,
                    auth.subject = claims.display_name(),
                    policy.resource = %permission.resource(),
                    policy.action = %permission.action(),
                    "request denied by policy"
                );
                let detail = format!(
                    "insufficient permissions for {} {}",
                    permission.resource(),
                    permission.action()
                );
                return Outcome::reply(
                    Response::fault(Some(id), Fault::forbidden(detail)),
                    ReplyKind::PermissionDenied,
                );
            }
        }

        match entry.invoke(envelope.params, Arc::clone(&claims)).await {
            Ok(result) => Outcome::reply(Response::result(id, result), ReplyKind::Success),
            Err(err) => {
                tracing::error!(rpc.method = %envelope.method, error = %err, "handler failed");
                Outcome::reply(
                    Response::fault(Some(id), Fault::internal(err)),
                    ReplyKind::Internal,
                )
            }
        }
    }

    fn method_not_found(&self, id: RequestId, method: &str) -> Outcome {
        tracing::debug!(rpc.method = %method, "method not found");
        Outcome::reply(
            Response::fault(Some(id), Fault::method_not_found(method)),
            ReplyKind::MethodNotFound,
        )
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::{TestClock, UnixTime};
    use color_eyre::Result;
    use http::StatusCode;
    use permesi::{jwt::ClaimSet, KeySet};

    use super::*;
    use crate::{envelope::code, registry::Permission, test, transport::into_response};

    fn registry() -> MethodRegistry {
        MethodRegistry::builder()
            .method("ping", None, |_, _| async {
                Ok(serde_json::json!("pong"))
            })
            .method(
                "whoami",
                None,
                |_, claims: Arc<ClaimSet>| async move {
                    Ok(serde_json::json!({
                        "username": claims.display_name(),
                        "anonymous": claims.is_anonymous(),
                    }))
                },
            )
            .method(
                "tools/list",
                Permission::read("tools"),
                |_, _| async { Ok(serde_json::json!({"tools": []})) },
            )
            .method(
                "tools/call",
                Permission::execute("tools"),
                |params, _| async move { Ok(params.unwrap_or(Value::Null)) },
            )
            .method(
                "prompts/get",
                Permission::read("prompts"),
                |_, _| async { Ok(serde_json::json!({"prompt": "hello"})) },
            )
            .method("explode", None, |_, _| async {
                Err("boom".into())
            })
            .build()
    }

    fn verifier() -> TokenVerifier<TestClock> {
        let keys: KeySet = serde_json::from_str(test::KEY_SET_JSON).unwrap();
        let validator = permesi::jwt::ClaimsValidator::new()
            .require_issuer(permesi::jwt::Issuer::from_static(test::TEST_ISSUER))
            .add_allowed_audience(permesi::jwt::Audience::from_static(test::TEST_AUDIENCE));
        TokenVerifier::new(keys, validator)
            .with_clock(TestClock::new(UnixTime(test::TEST_NOW)))
    }

    fn dispatcher(policy: AccessPolicy) -> Dispatcher<TestClock> {
        Dispatcher::new(
            registry(),
            verifier(),
            policy,
            Challenge::new("mcp-server")
                .with_resource_metadata("https://rpc.example.com/.well-known/oauth-protected-resource"),
        )
    }

    fn alice() -> Option<&'static TokenRef> {
        Some(TokenRef::from_str(test::TOKEN_ALICE))
    }

    #[tokio::test]
    async fn notification_is_acknowledged_without_authentication() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let outcome = dispatcher
            .dispatch(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                None,
            )
            .await;
        assert!(matches!(outcome, Outcome::NotificationAck));

        let response = into_response(outcome);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_fault() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { response, kind } =
            dispatcher.dispatch("{not json", alice()).await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::ParseError);
        assert_eq!(response.error().unwrap().code, code::PARSE_ERROR);
        assert!(response.id().is_none());
    }

    #[tokio::test]
    async fn missing_method_member_is_an_invalid_request() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":1}"#, alice())
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::InvalidRequest);
        assert_eq!(response.error().unwrap().code, code::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn wrong_protocol_tag_is_an_invalid_request() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { kind, .. } = dispatcher
            .dispatch(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#, alice())
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::InvalidRequest);
    }

    #[tokio::test]
    async fn unknown_method_echoes_the_request_id() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":7,"method":"no/such"}"#, alice())
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::MethodNotFound);
        assert_eq!(response.id(), Some(&RequestId::Number(7)));
        assert_eq!(response.error().unwrap().code, code::METHOD_NOT_FOUND);

        let http = into_response(Outcome::Reply { response, kind });
        assert_eq!(http.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn auth_first_hides_methods_from_unauthenticated_callers() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let outcome = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":7,"method":"no/such"}"#, None)
            .await;
        assert!(matches!(outcome, Outcome::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn method_first_reports_missing_methods_before_auth() {
        let dispatcher =
            dispatcher(AccessPolicy::permissive()).with_order(DispatchOrder::MethodFirst);
        let Outcome::Reply { kind, .. } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":7,"method":"no/such"}"#, None)
            .await
        else {
            panic!("expected a reply");
        };
        assert_eq!(kind, ReplyKind::MethodNotFound);
    }

    #[tokio::test]
    async fn authorized_call_reaches_the_handler() -> Result<()> {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(
                r#"{"jsonrpc":"2.0","id":"call-1","method":"tools/call","params":{"name":"echo"}}"#,
                alice(),
            )
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::Success);
        assert_eq!(response.id(), Some(&RequestId::from("call-1")));
        assert_eq!(
            response.result_value(),
            Some(&serde_json::json!({"name": "echo"}))
        );

        let http = into_response(Outcome::Reply { response, kind });
        assert_eq!(http.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn strict_policy_denies_prompts_to_generic_readers() {
        let dispatcher = dispatcher(AccessPolicy::strict());
        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":2,"method":"prompts/get"}"#, alice())
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::PermissionDenied);
        assert_eq!(response.error().unwrap().code, code::PERMISSION_DENIED);
        assert_eq!(response.id(), Some(&RequestId::Number(2)));

        let http = into_response(Outcome::Reply { response, kind });
        assert_eq!(http.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_bypasses_strict_policy() {
        let dispatcher = dispatcher(AccessPolicy::strict());
        let Outcome::Reply { kind, .. } = dispatcher
            .dispatch(
                r#"{"jsonrpc":"2.0","id":2,"method":"prompts/get"}"#,
                Some(TokenRef::from_str(test::TOKEN_ADMIN)),
            )
            .await
        else {
            panic!("expected a reply");
        };
        assert_eq!(kind, ReplyKind::Success);
    }

    #[tokio::test]
    async fn expired_credential_is_challenged() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let outcome = dispatcher
            .dispatch(
                r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
                Some(TokenRef::from_str(test::TOKEN_EXPIRED)),
            )
            .await;

        let Outcome::Unauthorized { error, .. } = &outcome else {
            panic!("expected a challenge");
        };
        assert!(matches!(error, VerifyError::Expired));

        let http = into_response(outcome);
        assert_eq!(http.status(), StatusCode::UNAUTHORIZED);
        let header = http
            .headers()
            .get(http::header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(header.starts_with("Bearer realm=\"mcp-server\""));
        assert!(header.contains("resource_metadata="));
    }

    #[tokio::test]
    async fn handler_failure_is_an_internal_fault() {
        let dispatcher = dispatcher(AccessPolicy::permissive());
        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":9,"method":"explode"}"#, alice())
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::Internal);
        let fault = response.error().unwrap();
        assert_eq!(fault.code, code::INTERNAL_ERROR);
        assert_eq!(fault.message, "boom");

        let http = into_response(Outcome::Reply { response, kind });
        assert_eq!(http.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unsecured_dispatcher_serves_anonymous_callers() {
        let dispatcher = Dispatcher::new(
            registry(),
            TokenVerifier::unsecured(),
            AccessPolicy::permissive(),
            Challenge::new("mcp-server"),
        );

        let Outcome::Reply { response, kind } = dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":1,"method":"whoami"}"#, None)
            .await
        else {
            panic!("expected a reply");
        };

        assert_eq!(kind, ReplyKind::Success);
        assert_eq!(
            response.result_value(),
            Some(&serde_json::json!({"username": "anonymous", "anonymous": true}))
        );
    }

    #[tokio::test]
    async fn dispatch_config_builds_challenge() {
        let config: DispatchConfig = serde_json::from_str(
            r#"{"order":"method-first","realm":"mcp-server"}"#,
        )
        .unwrap();
        assert_eq!(config.order, DispatchOrder::MethodFirst);
        assert_eq!(config.challenge().realm(), "mcp-server");
    }
}
