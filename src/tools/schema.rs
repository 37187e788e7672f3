//! Argument bag schemas built from discovered `inputSchema` shapes.
//!
//! Each shape is compiled once at discovery with `jsonschema`, and every
//! call is checked against it before it reaches the network. A missing shape,
//! or one that does not compile, degrades to a permissive schema that only
//! requires a JSON object.

use jsonschema::Validator;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::types::{Error, ErrorCode, Result};

/// Declared argument shape of one discovered operation.
#[derive(Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// Discovered shape, or `{"type": "object"}` when permissive.
    pub input_schema: Value,
    /// True when the discovered shape was missing or malformed.
    pub permissive: bool,
    validator: Option<Arc<Validator>>,
}

impl fmt::Debug for ToolSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSchema")
            .field("name", &self.name)
            .field("permissive", &self.permissive)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl ToolSchema {
    /// Schema that accepts any JSON object.
    pub fn permissive(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object"}),
            permissive: true,
            validator: None,
        }
    }

    /// Compile a discovered `inputSchema`, falling back to permissive.
    pub fn from_discovery(name: &str, description: &str, input_schema: Option<&Value>) -> Self {
        let Some(shape) = input_schema else {
            return Self::permissive(name, description);
        };
        match compile(shape) {
            Ok(validator) => Self {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: shape.clone(),
                permissive: false,
                validator: Some(Arc::new(validator)),
            },
            Err(reason) => {
                tracing::warn!(operation = name, reason = %reason, "input_schema_malformed");
                Self::permissive(name, description)
            }
        }
    }

    /// Check an argument bag before dispatch. Every violation is reported.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        if !arguments.is_object() {
            return Err(Error::tool(
                ErrorCode::ToolError,
                format!("invalid arguments for '{}'", self.name),
                format!("arguments must be a JSON object, got {}", type_name(arguments)),
            ));
        }
        let Some(validator) = &self.validator else {
            return Ok(());
        };

        let problems: Vec<String> = validator
            .iter_errors(arguments)
            .map(|err| err.to_string())
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::tool(
                ErrorCode::ToolError,
                format!("invalid arguments for '{}'", self.name),
                problems.join("; "),
            ))
        }
    }

    /// One-line signature: `name(a: string, b?: integer)`.
    pub fn signature(&self) -> String {
        let Some(props) = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
            .filter(|_| !self.permissive)
        else {
            return format!("{}(..)", self.name);
        };
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let params: Vec<String> = props
            .iter()
            .map(|(name, prop)| {
                let optional = if required.contains(&name.as_str()) { "" } else { "?" };
                format!("{}{}: {}", name, optional, declared_type(prop))
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Argument bags are objects, so only object-typed shapes are accepted.
fn compile(shape: &Value) -> std::result::Result<Validator, String> {
    let obj = shape
        .as_object()
        .ok_or_else(|| format!("schema is {}, not an object", type_name(shape)))?;
    if let Some(ty) = obj.get("type") {
        if ty.as_str() != Some("object") {
            return Err(format!("top-level type is {}, not \"object\"", ty));
        }
    }
    jsonschema::validator_for(shape).map_err(|e| e.to_string())
}

fn declared_type(prop: &Value) -> String {
    match prop.get("type") {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => "any".to_string(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
