use async_trait::async_trait;
use serde_json::{json, Value};

use super::ToolHandler;
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

const DEFAULT_UNIT: &str = "fahrenheit";

/// Reports canned weather for a location; useful for exercising tool calling end to end
pub struct WeatherTool {
    tool: Tool,
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherTool {
    pub fn new() -> Self {
        Self {
            tool: Tool::new(
                "get_current_weather",
                "Get the current weather in a given location",
                json!({
                    "type": "object",
                    "properties": {
                        "location": {
                            "type": "string",
                            "description": "The city and state, e.g. San Francisco, CA"
                        },
                        "unit": {
                            "type": "string",
                            "enum": ["celsius", "fahrenheit"]
                        }
                    },
                    "required": ["location"]
                }),
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    async fn call(&self, arguments: Value) -> ToolResult<String> {
        let location = arguments
            .get("location")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParameters("location parameter required".into()))?;
        let unit = match arguments.get("unit").and_then(Value::as_str) {
            None => DEFAULT_UNIT,
            Some(unit @ ("celsius" | "fahrenheit")) => unit,
            Some(other) => {
                return Err(ToolError::InvalidParameters(format!(
                    "unsupported unit '{}'",
                    other
                )))
            }
        };

        let report = json!({
            "location": location,
            "temperature": "72",
            "unit": unit,
            "forecast": ["sunny", "windy"],
        });
        Ok(report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_weather_defaults_to_fahrenheit() {
        let output = WeatherTool::new()
            .call(json!({"location": "Boston, MA"}))
            .await
            .unwrap();
        let report: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["location"], "Boston, MA");
        assert_eq!(report["unit"], "fahrenheit");
        assert_eq!(report["forecast"], json!(["sunny", "windy"]));
    }

    #[tokio::test]
    async fn test_weather_validates_arguments() {
        let tool = WeatherTool::new();
        assert!(tool.call(json!({})).await.is_err());
        assert!(tool
            .call(json!({"location": "Oslo", "unit": "kelvin"}))
            .await
            .is_err());
        let output = tool
            .call(json!({"location": "Oslo", "unit": "celsius"}))
            .await
            .unwrap();
        assert!(output.contains("\"celsius\""));
    }
}
