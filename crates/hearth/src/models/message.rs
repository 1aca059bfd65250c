use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::ToolCallRequest;

/// Content shown in a tool message while its tool is still running
pub const TOOL_PLACEHOLDER_TEXT: &str = "Executing...";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Only present on assistant messages that requested tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Only present on tool messages, the id of the call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Only present on tool messages, the name of the tool that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Message {
            role,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a new, empty user message
    pub fn user() -> Self {
        Self::with_role(Role::User)
    }

    /// Create a new, empty assistant message
    pub fn assistant() -> Self {
        Self::with_role(Role::Assistant)
    }

    /// Create a new, empty system message
    pub fn system() -> Self {
        Self::with_role(Role::System)
    }

    /// Create a new tool message answering the call `tool_call_id` of tool `name`
    pub fn tool<I: Into<String>, N: Into<String>>(tool_call_id: I, name: N) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(Role::Tool)
        }
    }

    /// Set the text content of the message
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content = text.into();
        self
    }

    /// Add a tool call request to the message
    pub fn with_tool_call(mut self, tool_call: ToolCallRequest) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    /// Add several tool call requests to the message, keeping their order
    pub fn with_tool_calls<I>(mut self, tool_calls: I) -> Self
    where
        I: IntoIterator<Item = ToolCallRequest>,
    {
        self.tool_calls.extend(tool_calls);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
