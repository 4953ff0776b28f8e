//! Schema shared by the engine and the explorer server.
//!
//! Every type here has exactly the JSON shape the server expects:
//! - `ParameterProjection`: serializable view of one parameter definition
//!   (`{"type": "float", "range": [0, 1], "freeze": false, "value": 0.3}`)
//! - `Sample`: one captured parameter set, flattened next to its image
//!   payload and score, as sent in `batch_parameters`
//! - `ImageRecord`: one persisted record as returned by `load_data` and
//!   `update_score`

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Free-form metadata attached to a sample (agent name, population index, artwork data, ...).
pub type Metadata = serde_json::Map<String, Value>;

/// Parameter-space shape, keyed by parameter name.
pub type ParametersDef = BTreeMap<String, ParameterProjection>;

/// Keys that live next to parameter names in a flattened [`Sample`].
pub const RESERVED_SAMPLE_KEYS: [&str; 3] = ["score", "image_data", "image_timestamp"];

/// Score sentinel stored by the server for samples that have not been reviewed yet.
pub const UNSCORED_SENTINEL: f64 = -1.0;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A live parameter value.
///
/// Integers travel as numbers with an integral value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value: booleans map to 0/1, numeric text is parsed.
    ///
    /// Returns `None` for anything that does not yield a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            ParamValue::Bool(b) => f64::from(u8::from(*b)),
            ParamValue::Number(n) => *n,
            ParamValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }

    /// Convert a raw JSON value received from a remote agent.
    ///
    /// Objects, arrays and `null` carry no usable value and are dropped.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(ParamValue::Number),
            Value::String(s) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Number(v as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Type of a parameter together with its type-specific constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    /// Uniform real in `[min, max)`.
    Float { range: [f64; 2] },
    /// Uniform integer in `[min, max]`.
    Integer { range: [i64; 2] },
    /// Bernoulli draw, true with probability `threshold` (0.5 when unset).
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },
    /// Uniform draw from an ordered list.
    Choice { choices: Vec<ParamValue> },
}

impl ParameterKind {
    /// Wire name of the kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::Float { .. } => "float",
            ParameterKind::Integer { .. } => "integer",
            ParameterKind::Boolean { .. } => "boolean",
            ParameterKind::Choice { .. } => "choice",
        }
    }
}

/// Serializable projection of a parameter definition, optionally with its live value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProjection {
    #[serde(flatten)]
    pub kind: ParameterKind,

    #[serde(default)]
    pub freeze: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ParamValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,

    /// UI label (stripped before transmission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// UI labels for choices or range ends (stripped before transmission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    /// Owner handle (stripped before transmission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<usize>,
}

/// SHA-256 over the canonical JSON of a parameter space.
///
/// Two definition sets with the same shape always yield the same digest,
/// which lets a learner recognise a re-declaration of an unchanged schema.
pub fn schema_digest(defs: &ParametersDef) -> String {
    let canonical = serde_json::to_vec(defs).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Quality score of a sample.
///
/// Serialized as a plain number; `Unscored` travels as [`UNSCORED_SENTINEL`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum Score {
    #[default]
    Unscored,
    Value(f64),
}

impl Score {
    pub fn value(&self) -> Option<f64> {
        match self {
            Score::Unscored => None,
            Score::Value(v) => Some(*v),
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, Score::Value(_))
    }
}

impl From<f64> for Score {
    fn from(v: f64) -> Self {
        if v == UNSCORED_SENTINEL || !v.is_finite() {
            Score::Unscored
        } else {
            Score::Value(v)
        }
    }
}

impl From<Score> for f64 {
    fn from(s: Score) -> Self {
        s.value().unwrap_or(UNSCORED_SENTINEL)
    }
}

// ---------------------------------------------------------------------------
// Samples and records
// ---------------------------------------------------------------------------

/// One captured parameter set, as transmitted in `batch_parameters`.
///
/// Parameter entries are flattened next to the reserved keys, so parameter
/// names must never collide with [`RESERVED_SAMPLE_KEYS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(flatten)]
    pub parameters: BTreeMap<String, ParameterProjection>,

    /// Base64-encoded rendered artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,

    /// Capture time in milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_timestamp: Option<i64>,

    #[serde(default)]
    pub score: Score,
}

impl Sample {
    /// Live values keyed by parameter name.
    pub fn values(&self) -> BTreeMap<String, ParamValue> {
        self.parameters
            .iter()
            .filter_map(|(name, p)| p.value.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Numeric values keyed by parameter name (non-numeric values are skipped).
    pub fn flat_values(&self) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .filter_map(|(name, p)| p.value.as_ref()?.as_f64().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// A persisted record as returned by the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub parameters: Value,

    #[serde(default)]
    pub metadata: Value,

    #[serde(default)]
    pub timestamp: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ImageRecord {
    /// `{name -> number}` view of the stored parameters.
    pub fn flat_parameters(&self) -> BTreeMap<String, f64> {
        flatten_numeric(&self.parameters)
    }

    /// Finite score, if any. The unscored sentinel counts as a score here:
    /// the server never returns unscored records from `load_data`.
    pub fn finite_score(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite())
    }
}

/// Flatten a stored parameter object into `{name -> number}`.
///
/// Accepts both the projection shape (`{"M": {"type": ..., "value": 1.2}}`)
/// and the already-flat shape (`{"M": 1.2}`). Entries without a finite
/// numeric value are skipped.
pub fn flatten_numeric(parameters: &Value) -> BTreeMap<String, f64> {
    let mut flat = BTreeMap::new();
    let Some(obj) = parameters.as_object() else {
        return flat;
    };
    for (name, entry) in obj {
        let raw = match entry {
            Value::Object(fields) => fields.get("value"),
            other => Some(other),
        };
        if let Some(v) = raw.and_then(ParamValue::from_json).and_then(|v| v.as_f64()) {
            flat.insert(name.clone(), v);
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn float_def(min: f64, max: f64) -> ParameterProjection {
        ParameterProjection {
            kind: ParameterKind::Float { range: [min, max] },
            freeze: false,
            value: None,
            step: None,
            label: None,
            labels: None,
            owner: None,
        }
    }

    #[test]
    fn test_projection_serializes_type_tag_inline() {
        let mut def = float_def(0.0, 20.0);
        def.value = Some(ParamValue::Number(3.5));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(
            json,
            json!({"type": "float", "range": [0.0, 20.0], "freeze": false, "value": 3.5})
        );
    }

    #[test]
    fn test_projection_parses_sketch_shape() {
        let def: ParameterProjection =
            serde_json::from_value(json!({"type": "integer", "range": [1, 40]})).unwrap();
        assert_eq!(def.kind, ParameterKind::Integer { range: [1, 40] });
        assert!(!def.freeze);
    }

    #[test]
    fn test_score_sentinel_mapping() {
        assert_eq!(Score::from(-1.0), Score::Unscored);
        assert_eq!(f64::from(Score::Unscored), UNSCORED_SENTINEL);
        assert_eq!(Score::from(87.0), Score::Value(87.0));
        assert_eq!(serde_json::to_value(Score::Unscored).unwrap(), json!(-1.0));
    }

    #[test]
    fn test_sample_is_flat_on_the_wire() {
        let mut parameters = BTreeMap::new();
        let mut def = float_def(0.0, 1.0);
        def.value = Some(ParamValue::Number(0.25));
        parameters.insert("M".to_string(), def);
        let sample = Sample {
            parameters,
            image_data: None,
            image_timestamp: Some(1_700_000_000_000),
            score: Score::Unscored,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["M"]["value"], json!(0.25));
        assert_eq!(json["score"], json!(-1.0));
        assert_eq!(json["image_timestamp"], json!(1_700_000_000_000i64));
        assert!(json.get("image_data").is_none());
    }

    #[test]
    fn test_flatten_numeric_handles_both_shapes() {
        let flat = flatten_numeric(&json!({
            "M": {"type": "float", "value": 1.2},
            "N1": 3.4,
            "on": {"type": "boolean", "value": true},
            "shape": {"type": "choice", "value": "circle"},
            "missing": {"type": "float"}
        }));
        assert_eq!(flat.get("M"), Some(&1.2));
        assert_eq!(flat.get("N1"), Some(&3.4));
        assert_eq!(flat.get("on"), Some(&1.0));
        assert!(!flat.contains_key("shape"));
        assert!(!flat.contains_key("missing"));
    }

    #[test]
    fn test_schema_digest_tracks_shape() {
        let mut a = ParametersDef::new();
        a.insert("M".to_string(), float_def(0.0, 20.0));
        let mut b = a.clone();
        assert_eq!(schema_digest(&a), schema_digest(&b));

        b.insert("N1".to_string(), float_def(0.001, 20.0));
        assert_ne!(schema_digest(&a), schema_digest(&b));
        assert_eq!(schema_digest(&a).len(), 64);
    }

    #[test]
    fn test_param_value_numeric_view() {
        assert_eq!(ParamValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(ParamValue::Text("2.5".into()).as_f64(), Some(2.5));
        assert_eq!(ParamValue::Text("circle".into()).as_f64(), None);
        assert_eq!(ParamValue::Number(f64::INFINITY).as_f64(), None);
        assert_eq!(ParamValue::from_json(&json!(null)), None);
    }
}
