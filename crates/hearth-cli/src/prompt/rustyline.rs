use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::{parse_input, Input, InputType, Prompt};

const PROMPT: &str = "\x1b[1m\x1b[38;5;208m(~)> \x1b[0m";

pub struct RustylinePrompt {
    editor: DefaultEditor,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Prompt for RustylinePrompt {
    fn get_input(&mut self) -> Result<Input> {
        match self.editor.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(parse_input(&line))
            }
            // Ctrl+C at an empty prompt just asks again; Ctrl+D leaves
            Err(ReadlineError::Interrupted) => Ok(Input::of(InputType::AskAgain)),
            Err(ReadlineError::Eof) => Ok(Input::of(InputType::Exit)),
            Err(e) => {
                eprintln!("Input error: {}", e);
                Ok(Input::of(InputType::Exit))
            }
        }
    }
}
