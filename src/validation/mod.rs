//! Payload validation port.
//!
//! The pipeline compiles a [`Schema`] once per endpoint into a [`ValidateFn`]
//! and runs that on every request. [`SchemaValidator`] is a small
//! type-checking default; applications with a real schema language plug in
//! their own [`Validator`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{GateError, GateResult};

/// Compiled validation function: raw payload in, validated payload out
pub type ValidateFn = Arc<dyn Fn(Value) -> GateResult<Value> + Send + Sync>;

/// Expected JSON type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

/// Field name to field spec, e.g. `{"name": {"type": "string"}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), FieldSpec { kind, required: false });
        self
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), FieldSpec { kind, required: true });
        self
    }

    pub fn from_json(value: Value) -> GateResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter()
    }
}

/// Compiles schemas into validation functions
pub trait Validator: Send + Sync {
    fn compile(&self, schema: &Schema) -> GateResult<ValidateFn>;
}

/// Default validator.
///
/// Keeps only the fields the schema declares and type-checks them. With
/// `strict` set, undeclared fields are rejected instead of dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator {
    pub strict: bool,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl Validator for SchemaValidator {
    fn compile(&self, schema: &Schema) -> GateResult<ValidateFn> {
        let schema = schema.clone();
        let strict = self.strict;
        Ok(Arc::new(move |payload| validate(&schema, strict, payload)))
    }
}

fn validate(schema: &Schema, strict: bool, payload: Value) -> GateResult<Value> {
    let data = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(GateError::validation(
                "validation error: payload is not an object",
                "payload is not an object",
            )
            .with_data(other))
        }
    };

    let mut validated = Map::new();
    for (key, value) in data {
        let Some(spec) = schema.get(&key) else {
            if strict {
                return Err(GateError::validation(
                    format!("validation error: data key \"{}\" not found in schema", key),
                    "data key not found",
                )
                .with_data(json!({ "field": key })));
            }
            continue;
        };

        if !spec.kind.matches(&value) {
            return Err(GateError::validation(
                format!(
                    "validation error: property \"{}\" is not of type \"{}\"",
                    key,
                    spec.kind.as_str()
                ),
                "data has wrong type",
            )
            .with_data(json!({ "field": key, "value": value })));
        }
        validated.insert(key, value);
    }

    for (name, spec) in schema.fields() {
        if spec.required && !validated.contains_key(name) {
            return Err(GateError::validation(
                format!("validation error: required property \"{}\" is missing", name),
                "required data missing",
            )
            .with_data(json!({ "field": name })));
        }
    }

    Ok(Value::Object(validated))
}
