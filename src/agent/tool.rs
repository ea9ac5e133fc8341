//! Tool type definitions for function-calling.
//!
//! Provides provider-agnostic types for tool definitions, calls, and results,
//! plus the typed [`InputSchema`] each tool declares at registration time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique key in the registry).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: Value,
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

impl ToolCall {
    /// Parses the JSON arguments. An empty string is treated as `{}`.
    ///
    /// # Errors
    ///
    /// Returns the parser message when the arguments are not valid JSON.
    pub fn input(&self) -> Result<Value, String> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&self.arguments).map_err(|e| e.to_string())
    }
}

/// The result of executing a tool call, as folded back into history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Name of the tool that produced it.
    pub tool_name: String,
    /// Output on success, `ERROR: <message>` on failure.
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

/// JSON type of a tool input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A string.
    String,
    /// An integer.
    Integer,
    /// A boolean.
    Boolean,
    /// A JSON object (e.g. a header map).
    Object,
}

impl FieldKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

/// One declared input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// JSON type.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
    /// Description shown to the model.
    pub description: String,
}

/// Typed input schema: field name → {type, required, description}.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    fields: Vec<SchemaField>,
}

impl InputSchema {
    /// Creates an empty schema (a tool with no inputs).
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(SchemaField {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(SchemaField {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    /// Declared fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Checks the schema is well formed: non-empty, unique field names.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err("field name cannot be empty".to_string());
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field '{}'", field.name));
            }
        }
        Ok(())
    }

    /// Checks a call's input against the declared fields.
    ///
    /// The input must be an object, every required field must be present
    /// and non-null, and present fields must have the declared type.
    /// Undeclared fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn check_input(&self, input: &Value) -> Result<(), String> {
        let object = input
            .as_object()
            .ok_or_else(|| "input must be a JSON object".to_string())?;
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.matches(value) => {
                    return Err(format!(
                        "field '{}' must be of type {}",
                        field.name,
                        field.kind.as_str()
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Renders the schema as a JSON Schema object.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": field.kind.as_str(),
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
