use std::path::Path;

use anyhow::{Context, Result};
use console::style;

pub mod rustyline;

pub trait Prompt {
    fn get_input(&mut self) -> Result<Input>;
    fn hearth_ready(&self) {
        println!();
        println!(
            "Hearth is ready. Everything stays on this machine. {}",
            style("Type /help for commands.").dim()
        );
        println!();
    }
    fn close(&self) {}
}

#[derive(Debug, PartialEq, Eq)]
pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Only messages carry content
}

#[derive(Debug, PartialEq, Eq)]
pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
    Reset,    // Clear the conversation
    History,  // Show the conversation so far
    Help,
}

impl Input {
    pub fn of(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }

    pub fn message<S: Into<String>>(text: S) -> Self {
        Self {
            input_type: InputType::Message,
            content: Some(text.into()),
        }
    }
}

/// Interpret one line typed at the prompt
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::of(InputType::AskAgain);
    }

    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };
    match command.to_ascii_lowercase().as_str() {
        "/exit" | "/quit" => Input::of(InputType::Exit),
        "/reset" => Input::of(InputType::Reset),
        "/history" => Input::of(InputType::History),
        "/help" | "/?" => Input::of(InputType::Help),
        "/file" if argument.is_empty() => {
            eprintln!("{}", style("Usage: /file <path>").yellow());
            Input::of(InputType::AskAgain)
        }
        "/file" => match file_prompt(Path::new(argument)) {
            Ok(prompt) => Input::message(prompt),
            Err(error) => {
                eprintln!("{}", style(format!("{:#}", error)).red());
                Input::of(InputType::AskAgain)
            }
        },
        _ => Input::message(line),
    }
}

/// The message sent on the user's behalf for `/file`
pub fn file_prompt(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(format!(
        "I have uploaded a file named \"{}\".\n\nContent:\n{}\n\nPlease analyze this file.",
        name, content
    ))
}

pub fn print_help() {
    println!("Commands:");
    println!("/exit | /quit - Exit the session");
    println!("/reset - Start the conversation over");
    println!("/file <path> - Send a text file for the model to analyze");
    println!("/history - Show the conversation so far");
    println!("/? | /help - Display this help message");
    println!("Ctrl+C - Interrupt hearth (resets the conversation)");
}
