use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ToolResult;
use crate::models::tool::Tool;

pub mod calculator;
pub mod registry;
pub mod weather;

pub use calculator::CalculatorTool;
pub use registry::ToolRegistry;
pub use weather::WeatherTool;

/// A function the model can call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The declaration advertised to the model
    fn tool(&self) -> &Tool;

    /// Run the tool with already-parsed arguments, returning the text shown to the model
    async fn call(&self, arguments: Value) -> ToolResult<String>;
}
