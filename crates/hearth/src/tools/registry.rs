use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{Map, Value};

use super::{CalculatorTool, ToolHandler, WeatherTool};
use crate::errors::ToolError;
use crate::models::tool::Tool;

/// Maps tool names to their handlers.
///
/// Every failure mode of a call (unknown name, malformed arguments, tool error, tool
/// panic) comes back as result text, so a misbehaving tool never ends the exchange.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the calculator and weather tools
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(CalculatorTool::new());
        registry.register(WeatherTool::new());
        registry
    }

    /// Register a handler under its declared name, replacing any previous one
    pub fn register<T>(&mut self, handler: T)
    where
        T: ToolHandler + 'static,
    {
        let name = handler.tool().name.clone();
        if self.tools.insert(name.clone(), Box::new(handler)).is_some() {
            tracing::warn!(tool = %name, "replaced an existing tool registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.tools.get(name).map(Box::as_ref)
    }

    /// Declarations for every registered tool, sent along with each completion request
    pub fn declarations(&self) -> Vec<Tool> {
        self.tools.values().map(|handler| handler.tool().clone()).collect()
    }

    /// Invoke `name` with the raw arguments text streamed by the model
    pub async fn invoke(&self, name: &str, arguments: &str) -> String {
        let Some(handler) = self.get(name) else {
            tracing::warn!(tool = %name, "model requested an unknown tool");
            return error_text(&ToolError::NotFound(name.to_string()));
        };

        let arguments = parse_arguments(name, arguments);
        tracing::debug!(tool = %name, %arguments, "invoking tool");

        match AssertUnwindSafe(handler.call(arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                tracing::warn!(tool = %name, %error, "tool returned an error");
                error_text(&error)
            }
            Err(panic) => {
                let error = ToolError::ExecutionError(panic_message(panic.as_ref()));
                tracing::error!(tool = %name, %error, "tool panicked");
                error_text(&error)
            }
        }
    }
}

fn error_text(error: &ToolError) -> String {
    format!("Error: {}", error)
}

/// Best-effort decode of the streamed arguments. Anything that is not a JSON object
/// becomes an empty object; the tool then reports what it is missing.
pub fn parse_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(tool, arguments = %other, "tool arguments are not an object");
            Value::Object(Map::new())
        }
        Err(error) => {
            tracing::warn!(tool, %error, raw, "malformed tool arguments");
            Value::Object(Map::new())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tool panicked: {}", message)
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolResult;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool {
        tool: Tool,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                tool: Tool::new(
                    "echo",
                    "Echoes back the input",
                    json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]}),
                ),
            }
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn tool(&self) -> &Tool {
            &self.tool
        }

        async fn call(&self, arguments: Value) -> ToolResult<String> {
            match arguments.get("message").and_then(Value::as_str) {
                Some("panic") => panic!("echo exploded"),
                Some(message) => Ok(message.to_string()),
                None => Err(ToolError::InvalidParameters(
                    "message parameter required".into(),
                )),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        registry
    }

    #[tokio::test]
    async fn test_invoke_known_tool() {
        let output = registry().invoke("echo", r#"{"message": "hi"}"#).await;
        assert_eq!(output, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_text() {
        let output = registry().invoke("frobnicate", "{}").await;
        assert_eq!(output, "Error: Tool not found: frobnicate");
    }

    #[tokio::test]
    async fn test_malformed_arguments_degrade_to_empty_object() {
        let output = registry().invoke("echo", r#"{"message": "hi"#).await;
        assert_eq!(
            output,
            "Error: Invalid parameters: message parameter required"
        );
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let output = registry().invoke("echo", r#"{"message": "panic"}"#).await;
        assert_eq!(
            output,
            "Error: Tool execution failed: tool panicked: echo exploded"
        );
    }

    #[tokio::test]
    async fn test_deeply_nested_expression_is_error_text() {
        let expression = format!("{}1{}", "(".repeat(2000), ")".repeat(2000));
        let arguments = json!({ "expression": expression }).to_string();

        let output = ToolRegistry::with_builtin_tools()
            .invoke("calculate", &arguments)
            .await;

        assert_eq!(
            output,
            "Error: Invalid parameters: expression nested too deeply"
        );
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("t", ""), json!({}));
        assert_eq!(parse_arguments("t", "[1, 2]"), json!({}));
        assert_eq!(parse_arguments("t", "{oops"), json!({}));
        assert_eq!(parse_arguments("t", r#"{"a": 1}"#), json!({"a": 1}));
    }

    #[test]
    fn test_builtin_declarations_are_sorted_by_name() {
        let names: Vec<_> = ToolRegistry::with_builtin_tools()
            .declarations()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, vec!["calculate", "get_current_weather"]);
    }
}
