//! Declared tool parameter schemas and scalar validation.

use serde::{Deserialize, Serialize};

/// Scalar type tag for a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }
}

/// Declaration of a single parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// Ordered parameter declarations for one tool.
///
/// Deliberately shallow: a type tag, a description, and a required flag per
/// parameter. Deeper validation is the tool's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolParameters {
    params: Vec<(String, ParamSpec)>,
}

impl ToolParameters {
    /// No parameters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a string parameter.
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.with(name, ParamType::String, description, required)
    }

    /// Add a number parameter.
    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.with(name, ParamType::Number, description, required)
    }

    /// Add a boolean parameter.
    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.with(name, ParamType::Boolean, description, required)
    }

    /// Add a parameter with an explicit type tag.
    pub fn with(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.params.push((
            name.into(),
            ParamSpec {
                param_type,
                description: description.into(),
                required,
            },
        ));
        self
    }

    /// Iterate declarations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamSpec)> {
        self.params.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Export as a JSON Schema object (the wire shape tool servers use).
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.params {
            properties.insert(
                name.clone(),
                serde_json::json!({
                    "type": spec.param_type.to_string(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(serde_json::Value::String(name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Best-effort import from a JSON Schema object.
    ///
    /// Unknown or compound property types degrade to `object`; absent schema
    /// parts yield an empty declaration.
    pub fn from_json_schema(schema: &serde_json::Value) -> Self {
        let mut out = Self::empty();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (name, prop) in properties {
                let param_type = prop
                    .get("type")
                    .and_then(|v| v.as_str())
                    .and_then(ParamType::from_tag)
                    .unwrap_or(ParamType::Object);
                let description = prop
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                out = out.with(name, param_type, description, required.contains(&name.as_str()));
            }
        }
        out
    }

    /// Validate runtime arguments against the declaration.
    ///
    /// Checks required presence and primitive type match only; returns the
    /// first violation found.
    pub fn validate(&self, args: &serde_json::Value) -> std::result::Result<(), String> {
        let obj = match args.as_object() {
            Some(obj) => obj,
            None if self.params.iter().any(|(_, s)| s.required) => {
                return Err(format!("expected object arguments, got {}", json_type_name(args)));
            }
            None => return Ok(()),
        };

        for (name, spec) in &self.params {
            match obj.get(name) {
                None if spec.required => {
                    return Err(format!("missing required parameter '{name}'"));
                }
                None => {}
                Some(value) => {
                    if !spec.param_type.matches(value) {
                        return Err(format!(
                            "parameter '{}' expected type '{}', got {}",
                            name,
                            spec.param_type,
                            json_type_name(value)
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
