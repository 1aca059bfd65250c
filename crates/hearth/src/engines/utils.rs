use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{EngineError, EngineResult};
use crate::models::delta::{DeltaFragment, ToolCallPiece};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Convert the conversation to the OpenAI chat completions message format
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({
                "role": message.role,
                "content": message.content,
            });

            if message.has_tool_calls() {
                converted["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": call.call_type,
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
            }
            if let Some(tool_call_id) = &message.tool_call_id {
                converted["tool_call_id"] = json!(tool_call_id);
            }
            if let Some(name) = &message.name {
                converted["name"] = json!(name);
            }
            converted
        })
        .collect()
}

/// Convert tool declarations to the OpenAI function-calling format
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Splits a byte stream into lines, holding back a trailing partial line until more
/// bytes arrive. Lines are returned without their `\n` or `\r\n` terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in chunk {
            if *byte == b'\n' {
                let line = std::mem::take(&mut self.pending);
                lines.push(decode_line(&line));
            } else {
                self.pending.push(*byte);
            }
        }
        lines
    }

    /// The unterminated remainder, if any
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode_line(&self.pending))
        }
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Incremental server-sent events parser that yields the joined `data:` payload of each
/// event. Comments and other fields are ignored.
#[derive(Debug, Default)]
pub struct SseDataParser {
    lines: LineBuffer,
    data_lines: Vec<String>,
}

impl SseDataParser {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut payloads = Vec::new();
        for line in self.lines.push_chunk(chunk) {
            self.process_line(&line, &mut payloads);
        }
        payloads
    }

    /// Flush whatever the stream left unterminated
    pub fn finish(mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if let Some(line) = std::mem::take(&mut self.lines).finish() {
            self.process_line(&line, &mut payloads);
        }
        self.flush_event(&mut payloads);
        payloads
    }

    fn process_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.flush_event(payloads);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_lines.push(data.to_string());
        }
    }

    fn flush_event(&mut self, payloads: &mut Vec<String>) {
        if !self.data_lines.is_empty() {
            payloads.push(self.data_lines.join("\n"));
            self.data_lines.clear();
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    call_type: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Decode one streamed chat completion payload. `Ok(None)` is the `[DONE]` sentinel.
pub fn parse_stream_payload(payload: &str) -> EngineResult<Option<DeltaFragment>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Ok(Some(DeltaFragment::default()));
    }
    if trimmed == "[DONE]" {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(trimmed).map_err(|error| {
        EngineError::ResponseParse(format!("failed to parse streaming payload: {}", error))
    })?;
    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(EngineError::ResponseParse(message));
    }

    let mut fragment = DeltaFragment::default();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
            fragment
                .content
                .get_or_insert_with(String::new)
                .push_str(&content);
        }
        for call in choice.delta.tool_calls {
            let function = call.function.unwrap_or_default();
            fragment.tool_calls.push(ToolCallPiece {
                index: call.index,
                id: call.id,
                call_type: call.call_type,
                name: function.name,
                arguments: function.arguments,
            });
        }
    }
    Ok(Some(fragment))
}
