use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A function declaration advertised to the LLM, in the shape both the
/// OpenAI and Gemini tool-calling wire formats expect (name/description plus
/// a JSON Schema for the arguments object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, as the model will reference it in a function call.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON Schema the arguments object must satisfy.
    pub input_schema: Value,
}

/// A handler function for a tool. Async to avoid blocking the runtime while
/// a tool performs its own I/O (an HTTP probe, a persistence write).
pub type ToolHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Registry of the tools exposed to one agent's tool-use loop.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

/// A registered tool with its compiled schema validator.
pub struct RegisteredTool {
    /// Tool definition including input schema.
    pub definition: ToolDefinition,
    /// Async handler function.
    pub handler: ToolHandler,
    schema_validator: Option<JSONSchema>,
}

/// Errors that can occur during tool operations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found.
    #[error("Tool not found: {0}")]
    NotFound(String),
    /// Invalid arguments provided.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Schema compilation failed.
    #[error("Schema error: {0}")]
    SchemaError(String),
    /// Handler execution failed.
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn compile_schema(schema: &Value) -> Result<JSONSchema, ToolError> {
        JSONSchema::compile(schema).map_err(|e| ToolError::SchemaError(e.to_string()))
    }

    /// Register a tool, compiling its input schema for validation. Returns
    /// an error if the schema itself fails to compile.
    pub async fn register_tool(
        &self,
        def: ToolDefinition,
        handler: ToolHandler,
    ) -> Result<(), ToolError> {
        let mut tools = self.tools.write().await;

        let schema_validator = match Self::compile_schema(&def.input_schema) {
            Ok(validator) => {
                debug!("Compiled schema for tool: {}", def.name);
                Some(validator)
            }
            Err(e) => {
                warn!(
                    "Failed to compile schema for tool {}: {}. Tool cannot be registered.",
                    def.name, e
                );
                return Err(e);
            }
        };

        tools.insert(
            def.name.clone(),
            RegisteredTool {
                definition: def,
                handler,
                schema_validator,
            },
        );

        Ok(())
    }

    /// List all registered tool definitions, in the shape handed to the LLM.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        tools.values().map(|t| t.definition.clone()).collect()
    }

    fn validate_args(tool: &RegisteredTool, args: &Value) -> Result<(), ToolError> {
        if let Some(validator) = &tool.schema_validator {
            match validator.validate(args) {
                Ok(()) => Ok(()),
                Err(errors) => {
                    let error_messages: Vec<String> = errors
                        .map(|e| format!("{}: {}", e.instance_path, e))
                        .collect();
                    let error_msg = error_messages.join("; ");
                    warn!(
                        "Validation failed for tool {}: {}",
                        tool.definition.name, error_msg
                    );
                    Err(ToolError::InvalidArguments(error_msg))
                }
            }
        } else {
            Ok(())
        }
    }

    /// Call a registered tool by name, validating arguments first.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tools = self.tools.read().await;

        if let Some(tool) = tools.get(name) {
            Self::validate_args(tool, &args)?;
            return (tool.handler)(args)
                .await
                .map_err(|e| ToolError::ExecutionError(e.to_string()));
        }

        Err(ToolError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_handler() -> ToolHandler {
        Box::new(|args| Box::pin(async move { Ok(json!({ "received": args })) }))
    }

    fn count_tool_def() -> ToolDefinition {
        ToolDefinition {
            name: "count_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "minimum": 0 }
                },
                "required": ["count"]
            }),
        }
    }

    #[tokio::test]
    async fn register_and_list_tool() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(count_tool_def(), create_test_handler())
            .await
            .expect("register");

        let tools = registry.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "count_tool");
    }

    #[tokio::test]
    async fn call_tool_validates_args_before_dispatch() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(count_tool_def(), create_test_handler())
            .await
            .expect("register");

        assert!(registry.call_tool("count_tool", json!({ "count": 5 })).await.is_ok());

        let err = registry
            .call_tool("count_tool", json!({ "count": -1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn call_tool_reports_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn register_rejects_invalid_schema() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition {
            name: "bad_tool".to_string(),
            description: "broken".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "count": { "type": "unknown_type" } }
            }),
        };
        let err = registry
            .register_tool(def, create_test_handler())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SchemaError(_)));
    }
}
