//! Request/response protocol spoken with the explorer server.
//!
//! One JSON request per call, one JSON response carrying a `status` field
//! (`"ok"` or `"error"` with a `message`). Agent calls always carry the full
//! parameter-space definitions: the server keeps no schema registration.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;
use crate::schema::{ImageRecord, Metadata, ParametersDef, Sample};
use crate::WireResult;

/// Server endpoints used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    AgentPlay,
    AgentUpdate,
    AgentTimeWarp,
    AgentChange,
    LoadData,
    UpdateScore,
    Save,
}

impl Endpoint {
    /// Path of the endpoint relative to the server root.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::AgentPlay => "agent/play",
            Endpoint::AgentUpdate => "agent/update",
            Endpoint::AgentTimeWarp => "agent/time_warp",
            Endpoint::AgentChange => "agent/change",
            Endpoint::LoadData => "load_data",
            Endpoint::UpdateScore => "update_score",
            Endpoint::Save => "save",
        }
    }

    pub const ALL: [Endpoint; 7] = [
        Endpoint::AgentPlay,
        Endpoint::AgentUpdate,
        Endpoint::AgentTimeWarp,
        Endpoint::AgentChange,
        Endpoint::LoadData,
        Endpoint::UpdateScore,
        Endpoint::Save,
    ];
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlayRequest {
    pub session_id: String,
    pub agent_name: String,
    pub parameters_def: ParametersDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdateRequest {
    pub session_id: String,
    pub agent_name: String,
    pub parameters_def: ParametersDef,
    pub parameters: BTreeMap<String, f64>,
    pub metadata: Value,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTimeWarpRequest {
    pub session_id: String,
    pub agent_name: String,
    pub parameters_def: ParametersDef,
    pub n_steps: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentChangeRequest {
    pub id: String,
    pub session_id: String,
    pub agent_name: String,
    pub parameters_def: ParametersDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDataRequest {
    pub id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateScoreRequest {
    pub id: String,
    pub session_id: String,
    pub image_id: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveRequest<'a> {
    pub id: &'a str,
    pub session_id: &'a str,
    pub batch_parameters: &'a [Sample],
    pub batch_metadata: &'a [Metadata],
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Payload of a successful `agent/play`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentPlayResponse {
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: Value,
}

/// Payload of a successful `load_data`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadDataResponse {
    #[serde(rename = "imagesInfos")]
    pub images_infos: Vec<ImageRecord>,
}

/// Payload of a successful `update_score`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateScoreResponse {
    #[serde(default)]
    pub image_infos: Option<ImageRecord>,
}

/// Payload of a successful `save`.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveResponse {
    pub images_ids: Vec<u64>,
}

/// Payload of endpoints that only acknowledge.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {}

/// Check the `status` field of a raw response and decode its payload.
///
/// - `status = "ok"` → payload decoded as `T`; a missing payload field is a
///   [`WireError::MalformedResponse`]
/// - `status = "error"` → [`WireError::ErrorStatus`] with the server message
/// - anything else → [`WireError::MalformedResponse`]
pub fn decode_response<T: DeserializeOwned>(endpoint: Endpoint, raw: Value) -> WireResult<T> {
    let status = raw.get("status").and_then(Value::as_str);
    match status {
        Some("ok") => serde_json::from_value(raw).map_err(|e| WireError::MalformedResponse {
            endpoint,
            reason: e.to_string(),
        }),
        Some("error") => Err(WireError::ErrorStatus {
            endpoint,
            message: raw
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string(),
        }),
        Some(other) => Err(WireError::MalformedResponse {
            endpoint,
            reason: format!("unknown status {other:?}"),
        }),
        None => Err(WireError::MalformedResponse {
            endpoint,
            reason: "missing status field".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::AgentTimeWarp.path(), "agent/time_warp");
        assert_eq!(Endpoint::LoadData.to_string(), "load_data");
    }

    #[test]
    fn test_decode_ok_payload() {
        let resp: SaveResponse =
            decode_response(Endpoint::Save, json!({"status": "ok", "images_ids": [4, 5]}))
                .unwrap();
        assert_eq!(resp.images_ids, vec![4, 5]);
    }

    #[test]
    fn test_decode_error_status_keeps_message() {
        let err = decode_response::<Ack>(
            Endpoint::AgentUpdate,
            json!({"status": "error", "message": "session_id not set"}),
        )
        .unwrap_err();
        assert!(matches!(err, WireError::ErrorStatus { ref message, .. } if message == "session_id not set"));
    }

    #[test]
    fn test_decode_missing_payload_is_malformed() {
        let err = decode_response::<AgentPlayResponse>(Endpoint::AgentPlay, json!({"status": "ok"}))
            .unwrap_err();
        assert!(matches!(err, WireError::MalformedResponse { .. }));

        let err = decode_response::<Ack>(Endpoint::AgentPlay, json!({"parameters": {}}))
            .unwrap_err();
        assert!(matches!(err, WireError::MalformedResponse { .. }));
    }

    #[test]
    fn test_load_data_uses_camel_case_key() {
        let resp: LoadDataResponse = decode_response(
            Endpoint::LoadData,
            json!({"status": "ok", "imagesInfos": [{"id": 1, "score": 80, "parameters": {}}]}),
        )
        .unwrap();
        assert_eq!(resp.images_infos.len(), 1);
        assert_eq!(resp.images_infos[0].score, Some(80.0));
    }
}
