use std::io::{self, Write};

use console::style;
use hearth::conversation::HistoryEvent;
use hearth::models::message::Message;
use hearth::models::role::Role;
use hearth::models::tool::ToolCallRequest;
use serde_json::Value;

const MAX_STRING_LENGTH: usize = 60;

/// Prints history changes as they happen: assistant text streams in place, tool calls and
/// their results get one line each.
pub struct Renderer<W: Write> {
    out: W,
    // Index of the assistant message being streamed, and how many bytes are on screen
    streaming: Option<(usize, usize)>,
}

impl Renderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streaming: None,
        }
    }

    pub fn handle(&mut self, event: &HistoryEvent) -> io::Result<()> {
        match event {
            HistoryEvent::Appended { index, message } => {
                self.end_stream()?;
                self.appended(*index, message)?;
            }
            HistoryEvent::Replaced { index, message } => self.replaced(*index, message)?,
            HistoryEvent::Removed { .. } => self.end_stream()?,
            HistoryEvent::Reset => {
                self.end_stream()?;
                writeln!(self.out, "{}", style("Conversation reset.").dim())?;
            }
        }
        self.out.flush()
    }

    /// Terminate a streamed line once the exchange is over
    pub fn finish(&mut self) -> io::Result<()> {
        self.end_stream()?;
        self.out.flush()
    }

    fn appended(&mut self, index: usize, message: &Message) -> io::Result<()> {
        match message.role {
            Role::Assistant => {
                self.streaming = Some((index, 0));
                self.stream_content(index, message)
            }
            Role::System => writeln!(self.out, "{}", style(&message.content).red()),
            // Users see what they typed; tool placeholders are replaced right away
            Role::User | Role::Tool => Ok(()),
        }
    }

    fn replaced(&mut self, index: usize, message: &Message) -> io::Result<()> {
        match message.role {
            Role::Assistant => {
                self.stream_content(index, message)?;
                if message.has_tool_calls() {
                    self.end_stream()?;
                    for call in &message.tool_calls {
                        self.tool_call(call)?;
                    }
                }
                Ok(())
            }
            Role::Tool => writeln!(
                self.out,
                "{} {}",
                style("    =").dim(),
                style(truncate(&message.content)).green()
            ),
            Role::User | Role::System => Ok(()),
        }
    }

    fn tool_call(&mut self, call: &ToolCallRequest) -> io::Result<()> {
        writeln!(
            self.out,
            "─── {} | {}",
            style(&call.name).magenta(),
            style(summarize_arguments(&call.arguments)).dim()
        )
    }

    fn stream_content(&mut self, index: usize, message: &Message) -> io::Result<()> {
        let Some((streaming, printed)) = self.streaming else {
            return Ok(());
        };
        let content = &message.content;
        if streaming != index || content.len() <= printed || !content.is_char_boundary(printed) {
            return Ok(());
        }
        write!(self.out, "{}", &content[printed..])?;
        self.streaming = Some((index, content.len()));
        Ok(())
    }

    fn end_stream(&mut self) -> io::Result<()> {
        if let Some((_, printed)) = self.streaming.take() {
            if printed > 0 {
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// `key: value` pairs for an arguments object, or the raw text when it is not one
pub fn summarize_arguments(arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) if !map.is_empty() => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, truncate(s)),
                other => format!("{}: {}", key, truncate(&other.to_string())),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Ok(Value::Object(_)) => "no arguments".to_string(),
        _ => truncate(arguments),
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_STRING_LENGTH) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
