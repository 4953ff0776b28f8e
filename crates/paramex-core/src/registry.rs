//! Parameter registry
//!
//! Validates parameter definitions and binds each one to a field of an
//! owner object living in an [`OwnerStore`]. The registry never holds live
//! values itself; it reads and writes them through owner handles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use paramex_wire::{
    schema_digest, ParamValue, ParameterKind, ParameterProjection, ParametersDef,
    RESERVED_SAMPLE_KEYS,
};

use crate::error::{ExplorerError, ExplorerResult};
use crate::obs;

/// Handle to an owner object in an [`OwnerStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerHandle(usize);

impl OwnerHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The global default state object, always present in a store.
pub const GLOBAL_OWNER: OwnerHandle = OwnerHandle(0);

/// Caller-owned storage for the live parameter values.
///
/// Each owner is a flat field map; the renderer reads its fields, the engine
/// writes them when applying proposals. Released slots are reused by
/// `create_owner`.
#[derive(Debug, Clone)]
pub struct OwnerStore {
    owners: Vec<Option<BTreeMap<String, ParamValue>>>,
    free: Vec<usize>,
}

impl Default for OwnerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerStore {
    pub fn new() -> Self {
        Self {
            owners: vec![Some(BTreeMap::new())],
            free: Vec::new(),
        }
    }

    pub fn create_owner(&mut self) -> OwnerHandle {
        match self.free.pop() {
            Some(index) => {
                self.owners[index] = Some(BTreeMap::new());
                OwnerHandle(index)
            }
            None => {
                self.owners.push(Some(BTreeMap::new()));
                OwnerHandle(self.owners.len() - 1)
            }
        }
    }

    /// Drop an owner and its fields. The global owner is never released.
    pub fn release(&mut self, owner: OwnerHandle) -> bool {
        if owner == GLOBAL_OWNER {
            return false;
        }
        match self.owners.get_mut(owner.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.free.push(owner.0);
                true
            }
            _ => false,
        }
    }

    /// Number of live owners, the global one included.
    pub fn len(&self) -> usize {
        self.owners.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handles(&self) -> impl Iterator<Item = OwnerHandle> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| OwnerHandle(index))
    }

    pub fn contains(&self, owner: OwnerHandle) -> bool {
        matches!(self.owners.get(owner.0), Some(Some(_)))
    }

    pub fn get(&self, owner: OwnerHandle, field: &str) -> Option<&ParamValue> {
        self.fields(owner)?.get(field)
    }

    /// Numeric view of a field (booleans as 0/1).
    pub fn get_f64(&self, owner: OwnerHandle, field: &str) -> Option<f64> {
        self.get(owner, field)?.as_f64()
    }

    /// Write a field. Returns `false` when the owner does not exist.
    pub fn set(&mut self, owner: OwnerHandle, field: &str, value: ParamValue) -> bool {
        match self.owners.get_mut(owner.0) {
            Some(Some(fields)) => {
                fields.insert(field.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn fields(&self, owner: OwnerHandle) -> Option<&BTreeMap<String, ParamValue>> {
        self.owners.get(owner.0)?.as_ref()
    }
}

/// Parameter definition as authored by a sketch, before validation.
///
/// Deserializes from `{"type": "float", "range": [0, 20], ...}`. Fields are
/// kept loose so a partially specified sketch still parses; validation
/// happens in [`ParameterRegistry::register`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub range: Option<Value>,
    #[serde(default)]
    pub choices: Option<Value>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub freeze: bool,
    #[serde(default)]
    pub value: Option<ParamValue>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(skip)]
    pub owner: Option<OwnerHandle>,
}

impl ParameterSpec {
    fn typed(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Self::default()
        }
    }

    pub fn float(min: f64, max: f64) -> Self {
        Self {
            range: Some(serde_json::json!([min, max])),
            ..Self::typed("float")
        }
    }

    pub fn integer(min: i64, max: i64) -> Self {
        Self {
            range: Some(serde_json::json!([min, max])),
            ..Self::typed("integer")
        }
    }

    pub fn boolean(threshold: Option<f64>) -> Self {
        Self {
            threshold,
            ..Self::typed("boolean")
        }
    }

    pub fn choice(choices: Vec<ParamValue>) -> Self {
        Self {
            choices: serde_json::to_value(choices).ok(),
            ..Self::typed("choice")
        }
    }

    pub fn frozen(mut self) -> Self {
        self.freeze = true;
        self
    }

    pub fn with_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_owner(mut self, owner: OwnerHandle) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }
}

/// A validated parameter definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    pub freeze: bool,
    pub owner: OwnerHandle,
    pub step: Option<f64>,
    pub label: Option<String>,
    pub labels: Option<Vec<String>>,
}

/// Largest integer bound exactly representable as `f64` (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn parse_range(range: Option<&Value>) -> Result<[f64; 2], String> {
    let items = range
        .and_then(Value::as_array)
        .ok_or_else(|| "range is required".to_string())?;
    match items.as_slice() {
        [a, b] => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Ok([a, b]),
            _ => Err("range bounds must be finite numbers".to_string()),
        },
        _ => Err(format!("range must have 2 elements, got {}", items.len())),
    }
}

impl ParameterDefinition {
    /// Validate an authored spec.
    pub fn from_spec(name: &str, spec: &ParameterSpec) -> Result<Self, String> {
        if name.is_empty() {
            return Err("empty parameter name".to_string());
        }
        if RESERVED_SAMPLE_KEYS.contains(&name) {
            return Err(format!("{name:?} is a reserved sample key"));
        }
        let kind = match spec.kind.as_deref() {
            None => return Err("missing type".to_string()),
            Some("float") => {
                let [min, max] = parse_range(spec.range.as_ref())?;
                if min >= max {
                    return Err(format!("float range [{min}, {max}] is not ascending"));
                }
                ParameterKind::Float { range: [min, max] }
            }
            Some("integer") => {
                let [min, max] = parse_range(spec.range.as_ref())?;
                if min.fract() != 0.0 || max.fract() != 0.0 {
                    return Err(format!("integer range [{min}, {max}] is not integral"));
                }
                if min.abs() > MAX_SAFE_INTEGER || max.abs() > MAX_SAFE_INTEGER {
                    return Err(format!(
                        "integer range [{min}, {max}] exceeds ±{MAX_SAFE_INTEGER}"
                    ));
                }
                if min > max {
                    return Err(format!("integer range [{min}, {max}] is not ascending"));
                }
                ParameterKind::Integer {
                    range: [min as i64, max as i64],
                }
            }
            Some("boolean") => {
                if let Some(t) = spec.threshold {
                    if !t.is_finite() {
                        return Err("threshold must be finite".to_string());
                    }
                }
                ParameterKind::Boolean {
                    threshold: spec.threshold,
                }
            }
            Some("choice") => {
                let items = spec
                    .choices
                    .as_ref()
                    .and_then(Value::as_array)
                    .ok_or_else(|| "choices are required".to_string())?;
                if items.is_empty() {
                    return Err("choices must not be empty".to_string());
                }
                let choices = items
                    .iter()
                    .map(ParamValue::from_json)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| "choices must be scalars".to_string())?;
                ParameterKind::Choice { choices }
            }
            Some(other) => return Err(format!("unsupported type {other:?}")),
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            freeze: spec.freeze,
            owner: spec.owner.unwrap_or(GLOBAL_OWNER),
            step: spec.step,
            label: spec.label.clone(),
            labels: spec.labels.clone(),
        })
    }

    /// Value a freshly bound field starts with.
    pub fn initial_value(&self) -> ParamValue {
        match &self.kind {
            ParameterKind::Float { range } => ParamValue::Number(range[0]),
            ParameterKind::Integer { range } => ParamValue::Number(range[0] as f64),
            ParameterKind::Boolean { .. } => ParamValue::Bool(false),
            // Choice lists are validated non-empty.
            ParameterKind::Choice { choices } => choices
                .first()
                .cloned()
                .unwrap_or(ParamValue::Bool(false)),
        }
    }

    /// Coerce a raw value to this parameter's type.
    ///
    /// Floats and integers accept any finite numeric value (integers are
    /// rounded); booleans accept bools, numbers and `"true"`/`"false"`;
    /// choices accept members of the choice list only.
    pub fn coerce(&self, raw: &ParamValue) -> Result<ParamValue, String> {
        match &self.kind {
            ParameterKind::Float { .. } => raw
                .as_f64()
                .map(ParamValue::Number)
                .ok_or_else(|| format!("{raw} is not a finite number")),
            ParameterKind::Integer { .. } => raw
                .as_f64()
                .map(|v| ParamValue::Number(v.round()))
                .ok_or_else(|| format!("{raw} is not a finite number")),
            ParameterKind::Boolean { .. } => match raw {
                ParamValue::Bool(b) => Ok(ParamValue::Bool(*b)),
                ParamValue::Text(s) if s == "true" || s == "false" => {
                    Ok(ParamValue::Bool(s == "true"))
                }
                other => other
                    .as_f64()
                    .map(|v| ParamValue::Bool(v != 0.0))
                    .ok_or_else(|| format!("{other} is not a boolean")),
            },
            ParameterKind::Choice { choices } => choices
                .iter()
                .find(|c| *c == raw)
                .cloned()
                .ok_or_else(|| format!("{raw} is not one of the choices")),
        }
    }

    fn projection(&self, value: Option<ParamValue>, strip_ui: bool) -> ParameterProjection {
        ParameterProjection {
            kind: self.kind.clone(),
            freeze: self.freeze,
            value,
            step: self.step,
            label: if strip_ui { None } else { self.label.clone() },
            labels: if strip_ui { None } else { self.labels.clone() },
            owner: if strip_ui { None } else { Some(self.owner.index()) },
        }
    }
}

/// Options for [`ParameterRegistry::snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOptions {
    /// Drop UI labels and owner references
    pub strip_ui: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self { strip_ui: true }
    }
}

/// Display-only grouping of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub name: String,
    pub keys: Vec<String>,
}

/// Validated parameter definitions keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    definitions: BTreeMap<String, ParameterDefinition>,
    groups: Vec<ParameterGroup>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered definitions with the valid subset of `specs`.
    ///
    /// Invalid definitions are dropped and logged, never returned as errors.
    /// Fields bound to a definition receive the spec's `value` (or the kind's
    /// initial value) when they do not hold a valid value yet. Returns the
    /// number of accepted definitions.
    pub fn register(
        &mut self,
        specs: BTreeMap<String, ParameterSpec>,
        store: &mut OwnerStore,
    ) -> usize {
        self.definitions.clear();
        for (name, spec) in specs {
            let def = match ParameterDefinition::from_spec(&name, &spec) {
                Ok(def) => def,
                Err(reason) => {
                    obs::emit_parameter_rejected(&name, &reason);
                    continue;
                }
            };
            if !store.contains(def.owner) {
                obs::emit_parameter_rejected(&name, "owner handle not found in store");
                continue;
            }
            let bound_ok = store
                .get(def.owner, &name)
                .is_some_and(|v| def.coerce(v).is_ok());
            if !bound_ok {
                let seed = spec
                    .value
                    .as_ref()
                    .and_then(|v| def.coerce(v).ok())
                    .unwrap_or_else(|| def.initial_value());
                store.set(def.owner, &name, seed);
            }
            self.definitions.insert(name, def);
        }
        obs::emit_schema_declared(self.definitions.len(), &schema_digest(&self.definitions_only()));
        self.definitions.len()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.definitions.values()
    }

    /// Every parameter with its current bound value.
    pub fn snapshot(
        &self,
        store: &OwnerStore,
        opts: SnapshotOptions,
    ) -> BTreeMap<String, ParameterProjection> {
        self.definitions
            .iter()
            .map(|(name, def)| {
                let value = store.get(def.owner, name).cloned();
                (name.clone(), def.projection(value, opts.strip_ui))
            })
            .collect()
    }

    /// Shape of the parameter space, without values or UI fields.
    pub fn definitions_only(&self) -> ParametersDef {
        self.definitions
            .iter()
            .map(|(name, def)| (name.clone(), def.projection(None, true)))
            .collect()
    }

    /// Keep the entries of a proposal that may be applied.
    ///
    /// Unknown names, frozen parameters and values that cannot be coerced
    /// to the parameter's type are dropped.
    pub fn filter_proposal(
        &self,
        proposal: &BTreeMap<String, ParamValue>,
    ) -> BTreeMap<String, ParamValue> {
        let mut accepted = BTreeMap::new();
        for (name, raw) in proposal {
            let Some(def) = self.definitions.get(name) else {
                obs::emit_proposal_filtered(name, "unknown parameter");
                continue;
            };
            if def.freeze {
                obs::emit_proposal_filtered(name, "frozen");
                continue;
            }
            match def.coerce(raw) {
                Ok(value) => {
                    accepted.insert(name.clone(), value);
                }
                Err(reason) => obs::emit_proposal_filtered(name, &reason),
            }
        }
        accepted
    }

    /// Write filtered values onto their owners. Frozen parameters are skipped.
    ///
    /// Returns the number of fields written.
    pub fn apply(&self, store: &mut OwnerStore, values: &BTreeMap<String, ParamValue>) -> usize {
        let mut written = 0;
        for (name, value) in values {
            match self.definitions.get(name) {
                Some(def) if !def.freeze => {
                    if store.set(def.owner, name, value.clone()) {
                        written += 1;
                    }
                }
                _ => obs::emit_proposal_filtered(name, "not applicable"),
            }
        }
        written
    }

    pub fn set_freeze(&mut self, name: &str, freeze: bool) -> ExplorerResult<()> {
        let def = self
            .definitions
            .get_mut(name)
            .ok_or_else(|| ExplorerError::UnknownParameter(name.to_string()))?;
        def.freeze = freeze;
        Ok(())
    }

    /// Manual edit; allowed on frozen parameters.
    pub fn set_value(
        &self,
        store: &mut OwnerStore,
        name: &str,
        value: &ParamValue,
    ) -> ExplorerResult<()> {
        let def = self
            .definitions
            .get(name)
            .ok_or_else(|| ExplorerError::UnknownParameter(name.to_string()))?;
        let value = def.coerce(value).map_err(|reason| ExplorerError::InvalidValue {
            name: name.to_string(),
            reason,
        })?;
        store.set(def.owner, name, value);
        Ok(())
    }

    pub fn value<'a>(&self, store: &'a OwnerStore, name: &str) -> Option<&'a ParamValue> {
        let def = self.definitions.get(name)?;
        store.get(def.owner, name)
    }

    /// Rebind every parameter not owned by the global object to `owner`.
    ///
    /// Fields missing on the new owner carry over the previous value, so
    /// frozen parameters keep their setting across owners. Afterwards every
    /// owner other than the global one, `owner`, and those still bound to a
    /// definition is released.
    pub fn rebind_owners(&mut self, store: &mut OwnerStore, owner: OwnerHandle) -> usize {
        if !store.contains(owner) {
            return 0;
        }
        let mut rebound = 0;
        for (name, def) in self.definitions.iter_mut() {
            if def.owner == GLOBAL_OWNER || def.owner == owner {
                continue;
            }
            if store.get(owner, name).is_none() {
                let carried = store
                    .get(def.owner, name)
                    .cloned()
                    .unwrap_or_else(|| def.initial_value());
                store.set(owner, name, carried);
            }
            def.owner = owner;
            rebound += 1;
        }
        let stale: Vec<OwnerHandle> = store
            .handles()
            .filter(|h| *h != GLOBAL_OWNER && *h != owner)
            .filter(|h| self.definitions.values().all(|def| def.owner != *h))
            .collect();
        for handle in stale {
            store.release(handle);
        }
        rebound
    }

    pub fn create_groups(&mut self, groups: Vec<ParameterGroup>) {
        self.groups = groups;
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.keys.iter().any(|k| k == name))
            .map(|g| g.name.as_str())
    }
}
