//! Tool definition types for LLM tool use

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition for LLM provider
///
/// Describes a function the model may call: its name, description, and input
/// schema in JSON Schema format. Structured-output schemas are exposed to the
/// model the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON schema for the tool's input parameters
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// How the model is allowed to use the offered tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides
    Auto,
    /// Model must call some tool
    Required,
    /// Model must call the named tool
    Tool(String),
}

/// Helper module to build JSON schemas for tools
pub mod schema {
    use serde_json::{Value, json};

    /// Create a JSON schema for an object with properties
    ///
    /// # Example
    ///
    /// ```
    /// use agent_llm::tools::schema;
    /// use serde_json::json;
    ///
    /// let schema = schema::object(
    ///     json!({
    ///         "query": schema::string("Search query"),
    ///     }),
    ///     &["query"],
    /// );
    /// assert_eq!(schema["required"][0], "query");
    /// ```
    pub fn object(properties: Value, required: &[&str]) -> Value {
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// String property schema
    pub fn string(description: &str) -> Value {
        json!({
            "type": "string",
            "description": description,
        })
    }

    /// Array property schema
    pub fn array(description: &str, items: Value) -> Value {
        json!({
            "type": "array",
            "description": description,
            "items": items,
        })
    }

    /// Array of strings
    pub fn string_array(description: &str) -> Value {
        array(description, json!({ "type": "string" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definition_creation() {
        let schema = schema::object(
            json!({
                "query": schema::string("Search query"),
            }),
            &["query"],
        );

        let tool = ToolDefinition::new("search", "Search the web", schema.clone());
        assert_eq!(tool.name, "search");
        assert_eq!(tool.input_schema, schema);
    }

    #[test]
    fn test_string_array_schema() {
        let s = schema::string_array("queries");
        assert_eq!(s["type"], "array");
        assert_eq!(s["items"]["type"], "string");
    }
}
