//! Wire-level request and response shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol tag every request and response carries
pub const PROTOCOL_VERSION: &str = "2.0";

/// Well-known fault codes
pub mod code {
    /// The request body was not valid JSON
    pub const PARSE_ERROR: i64 = -32700;
    /// The request body was JSON but not a valid request envelope
    pub const INVALID_REQUEST: i64 = -32600;
    /// The requested method is not registered
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The handler failed while producing a result
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The caller is authenticated but not permitted to call the method
    pub const PERMISSION_DENIED: i64 = -32001;
}

/// The identifier correlating a request with its response
///
/// An identifier is echoed back exactly as received: a number stays a
/// number and a string stays a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric identifier
    Number(i64),
    /// A string identifier
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_owned())
    }
}

/// A request envelope as received on the wire
///
/// A missing `id` marks the envelope as a notification; the protocol
/// tag defaults when absent but is rejected when present with any
/// other value.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_protocol")]
    pub(crate) jsonrpc: String,
    #[serde(default)]
    pub(crate) id: Option<RequestId>,
    pub(crate) method: String,
    #[serde(default)]
    pub(crate) params: Option<Value>,
}

fn default_protocol() -> String {
    String::from(PROTOCOL_VERSION)
}

impl Envelope {
    /// The identifier to echo in the response, if any
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// The method being invoked
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether the envelope is a notification
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub(crate) fn has_valid_protocol(&self) -> bool {
        self.jsonrpc == PROTOCOL_VERSION
    }
}

/// A fault carried in a failed response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// The fault code
    pub code: i64,
    /// A short description of the fault
    pub message: String,
    /// Fault-specific detail, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Fault {
    /// A fault for a body that is not valid JSON
    #[must_use]
    pub fn parse_error(detail: impl ToString) -> Self {
        Self {
            code: code::PARSE_ERROR,
            message: String::from("Parse error"),
            data: Some(Value::String(detail.to_string())),
        }
    }

    /// A fault for a body that is not a valid request envelope
    #[must_use]
    pub fn invalid_request(detail: impl ToString) -> Self {
        Self {
            code: code::INVALID_REQUEST,
            message: String::from("Invalid Request"),
            data: Some(Value::String(detail.to_string())),
        }
    }

    /// A fault for a method that is not registered
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: code::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    /// A fault for a handler that failed while producing a result
    #[must_use]
    pub fn internal(detail: impl ToString) -> Self {
        Self {
            code: code::INTERNAL_ERROR,
            message: detail.to_string(),
            data: None,
        }
    }

    /// A fault for a caller the policy refused
    #[must_use]
    pub fn forbidden(detail: impl ToString) -> Self {
        Self {
            code: code::PERMISSION_DENIED,
            message: String::from("Forbidden"),
            data: Some(Value::String(detail.to_string())),
        }
    }
}

/// A response envelope ready to be serialized onto the wire
///
/// Exactly one of `result` and `error` is populated.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Fault>,
}

impl Response {
    /// A successful response carrying `result`
    #[must_use]
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failed response carrying `fault`
    ///
    /// Parse and invalid-request faults have no identifier to echo, so
    /// `id` may be absent.
    #[must_use]
    pub fn fault(id: Option<RequestId>, fault: Fault) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id,
            result: None,
            error: Some(fault),
        }
    }

    /// The echoed identifier, if any
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// The successful result, if any
    #[must_use]
    pub fn result_value(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The fault, if the response failed
    #[must_use]
    pub fn error(&self) -> Option<&Fault> {
        self.error.as_ref()
    }
}
