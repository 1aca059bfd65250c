use serde::{Deserialize, Serialize};

use super::tool::ToolCallRequest;

/// One piece of a tool call, streamed at a given index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPiece {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallPiece {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type<S: Into<String>>(mut self, call_type: S) -> Self {
        self.call_type = Some(call_type.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments<S: Into<String>>(mut self, arguments: S) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}

/// One incremental unit of a streamed model turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPiece>,
}

impl DeltaFragment {
    pub fn content<S: Into<String>>(text: S) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(piece: ToolCallPiece) -> Self {
        Self {
            content: None,
            tool_calls: vec![piece],
        }
    }

    pub fn with_tool_call(mut self, piece: ToolCallPiece) -> Self {
        self.tool_calls.push(piece);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty) && self.tool_calls.is_empty()
    }
}

/// The result of draining every fragment of one model turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledTurn {
    pub content: String,
    /// Ordered by stream index
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssembledTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
