use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only tool call type engines currently emit
pub const FUNCTION_CALL_TYPE: &str = "function";

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema for the arguments the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name, description and parameter schema
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A fully assembled request from the model to invoke a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque id, unique within the turn that produced it
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    /// The name of the tool to execute
    pub name: String,
    /// Raw arguments text as streamed by the model, expected to hold a JSON object
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            call_type: FUNCTION_CALL_TYPE.to_string(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}
