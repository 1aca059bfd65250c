use std::collections::BTreeMap;

use nanoid::nanoid;

use crate::models::delta::{AssembledTurn, DeltaFragment, ToolCallPiece};
use crate::models::tool::{ToolCallRequest, FUNCTION_CALL_TYPE};

/// Accumulates the streamed fragments of a single model turn.
///
/// Tool-call pieces are keyed by their stream index and only materialized into a dense
/// list when the turn is finished, so out-of-order or interleaved pieces are fine.
#[derive(Debug, Default)]
pub struct DeltaAssembler {
    content: String,
    builders: BTreeMap<usize, ToolCallBuilder>,
}

#[derive(Debug)]
struct ToolCallBuilder {
    id: String,
    call_type: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    fn new() -> Self {
        Self {
            id: format!("call_{}", nanoid!(12)),
            call_type: None,
            name: String::new(),
            arguments: String::new(),
        }
    }

    fn merge(&mut self, piece: ToolCallPiece) {
        if let Some(id) = piece.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        if let Some(call_type) = piece.call_type.filter(|t| !t.is_empty()) {
            self.call_type = Some(call_type);
        }
        if let Some(name) = piece.name {
            self.name.push_str(&name);
        }
        if let Some(arguments) = piece.arguments {
            self.arguments.push_str(&arguments);
        }
    }

    fn build(self) -> ToolCallRequest {
        ToolCallRequest {
            id: self.id,
            call_type: self
                .call_type
                .unwrap_or_else(|| FUNCTION_CALL_TYPE.to_string()),
            name: self.name,
            arguments: self.arguments,
        }
    }
}

impl DeltaAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment. Returns the running content when this fragment changed it, so
    /// the caller can live-update the in-progress message.
    pub fn push(&mut self, fragment: DeltaFragment) -> Option<&str> {
        for piece in fragment.tool_calls {
            self.builders
                .entry(piece.index)
                .or_insert_with(ToolCallBuilder::new)
                .merge(piece);
        }

        match fragment.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                Some(self.content.as_str())
            }
            _ => None,
        }
    }

    /// Finalize the turn: the accumulated content plus the tool calls in index order.
    pub fn finish(self) -> AssembledTurn {
        for (position, index) in self.builders.keys().enumerate() {
            if *index != position {
                tracing::warn!(
                    index,
                    expected = position,
                    "tool call indices are not contiguous; keeping only the indices present"
                );
                break;
            }
        }

        AssembledTurn {
            content: self.content,
            tool_calls: self
                .builders
                .into_values()
                .map(ToolCallBuilder::build)
                .collect(),
        }
    }
}
