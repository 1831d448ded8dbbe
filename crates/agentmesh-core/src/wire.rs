use crate::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters of an agent-to-agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestParams {
    /// Opaque message payload for the receiving agent.
    pub message: serde_json::Value,
    /// Caller-supplied metadata forwarded verbatim.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request envelope for agent-to-agent calls: `{method, params, id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Operation name, e.g. `"agent/execute"`.
    pub method: String,
    /// Message and metadata for the receiving agent.
    pub params: RequestParams,
    /// Caller-assigned correlation id, echoed in the response.
    pub id: u64,
}

impl AgentRequest {
    /// Build an execute-request envelope.
    pub fn execute(
        id: u64,
        message: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            method: "agent/execute".to_string(),
            params: RequestParams { message, metadata },
            id,
        }
    }
}

/// Error object carried in a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric error code assigned by the responding agent.
    pub code: i32,
    /// Human-readable error description.
    pub message: String,
}

/// Response envelope: `{result | error, id}` — exactly one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    /// Correlation id echoed from the request.
    pub id: u64,
}

impl AgentResponse {
    /// A successful response carrying `result`.
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    /// A failed response carrying an error object.
    pub fn err(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(WireError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// Unwrap the envelope into a result payload.
    ///
    /// An envelope carrying neither `result` nor `error` is malformed and
    /// surfaces as [`MeshError::ResponseFormat`]; an `error` envelope
    /// surfaces as [`MeshError::Communication`].
    pub fn into_result(self) -> MeshResult<serde_json::Value> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(err)) => Err(MeshError::Communication(format!(
                "agent error {}: {}",
                err.code, err.message
            ))),
            (Some(_), Some(_)) => Err(MeshError::ResponseFormat(
                "response carries both result and error".to_string(),
            )),
            (None, None) => Err(MeshError::ResponseFormat(
                "response carries neither result nor error".to_string(),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_shape() {
        let req = AgentRequest::execute(7, serde_json::json!("ping"), HashMap::new());
        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "agent/execute");
        assert_eq!(json["params"]["message"], "ping");
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn response_result_unwraps() {
        let resp = AgentResponse::ok(1, serde_json::json!({"answer": 42}));
        let value = resp.into_result().unwrap();
        assert_eq!(value["answer"], 42);
    }

    #[test]
    fn response_error_surfaces_as_communication() {
        let resp = AgentResponse::err(1, -32000, "agent crashed");
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, MeshError::Communication(_)));
        assert!(err.to_string().contains("agent crashed"));
    }

    #[test]
    fn empty_envelope_is_malformed() {
        let resp: AgentResponse = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, MeshError::ResponseFormat(_)));
    }

    #[test]
    fn metadata_defaults_to_empty() {
        let req: AgentRequest = serde_json::from_str(
            r#"{"method":"agent/execute","params":{"message":"hi"},"id":1}"#,
        )
        .unwrap();
        assert!(req.params.metadata.is_empty());
    }
}
