use anyhow::{anyhow, Result};
use bat::WrappingMode;
use console::style;
use hearth::agent::{Agent, ExchangeOutcome};
use hearth::errors::AgentResult;
use hearth::session::SelectOutcome;

use crate::prompt::{print_help, InputType, Prompt};
use crate::render::{summarize_arguments, Renderer};

pub struct Session {
    agent: Agent,
}

impl Session {
    pub fn new(agent: Agent) -> Self {
        Session { agent }
    }

    /// Load `model`, showing initialization progress on a spinner
    pub async fn select_model(&self, model: &str) -> Result<()> {
        let spin = cliclack::spinner();
        spin.start(format!("Loading {}", model));
        let mut progress = self.agent.subscribe_progress();

        let selecting = self.agent.select_model(model);
        tokio::pin!(selecting);
        let result = loop {
            tokio::select! {
                result = &mut selecting => break result,
                Ok(update) = progress.recv() => {
                    let message = format!("{:>3.0}% {}", update.progress * 100.0, update.text);
                    if update.is_error() {
                        spin.set_message(style(message).red());
                    } else {
                        spin.set_message(message);
                    }
                }
            }
        };

        match result {
            Ok(SelectOutcome::Loaded) => spin.stop(format!("Model {} ready.", model)),
            Ok(SelectOutcome::Skipped) => spin.stop(format!("Model {} already loaded.", model)),
            Err(error) => {
                spin.stop(style(format!("Error: {}", error)).red());
                return Err(error.into());
            }
        }
        Ok(())
    }

    pub async fn start(&mut self, prompt: &mut dyn Prompt) -> Result<()> {
        prompt.hearth_ready();

        loop {
            let input = prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = &input.content {
                        if let Err(error) = self.exchange(content).await {
                            eprintln!("{}", style(format!("Error: {}", error)).red());
                        }
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
                InputType::Reset => {
                    self.agent.reset_conversation();
                    println!("{}", style("Conversation reset.").dim());
                }
                InputType::History => self.print_history()?,
                InputType::Help => print_help(),
            }
        }

        prompt.close();
        self.agent.shutdown().await;
        Ok(())
    }

    /// Run one exchange without a prompt; failures become errors
    pub async fn headless_start(&mut self, text: &str) -> Result<()> {
        let outcome = self.exchange(text).await?;
        self.agent.shutdown().await;
        match outcome {
            ExchangeOutcome::Answered => Ok(()),
            ExchangeOutcome::Failed(detail) => Err(anyhow!("Failed to generate response: {}", detail)),
            ExchangeOutcome::TurnLimitReached(turns) => Err(anyhow!(
                "Stopped after {} model turns without a final answer",
                turns
            )),
            ExchangeOutcome::Abandoned => Err(anyhow!("Interrupted")),
        }
    }

    /// Send `text` and render the conversation as it changes. Ctrl+C resets the
    /// conversation, which ends the exchange at its next update.
    async fn exchange(&self, text: &str) -> AgentResult<ExchangeOutcome> {
        let mut renderer = Renderer::stdout();
        let mut events = self.agent.subscribe_history();

        let exchange = self.agent.append_user_message(text);
        tokio::pin!(exchange);
        let mut interrupted = false;
        let result = loop {
            tokio::select! {
                result = &mut exchange => break result,
                Ok(event) = events.recv() => {
                    if let Err(error) = renderer.handle(&event) {
                        tracing::warn!(%error, "failed to render history update");
                    }
                }
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    self.agent.reset_conversation();
                }
            }
        };

        while let Ok(event) = events.try_recv() {
            let _ = renderer.handle(&event);
        }
        let _ = renderer.finish();
        result
    }

    fn print_history(&self) -> Result<()> {
        for message in self.agent.history() {
            println!("{}", style(format!("── {} ──", message.role)).dim());
            if !message.content.is_empty() {
                print_markdown(&message.content)?;
                println!();
            }
            for call in &message.tool_calls {
                println!(
                    "─── {} | {}",
                    style(&call.name).magenta(),
                    style(summarize_arguments(&call.arguments)).dim()
                );
            }
        }
        Ok(())
    }
}

fn print_markdown(content: &str) -> Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()
        .map_err(|error| anyhow!("Failed to render markdown: {}", error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Input;
    use hearth::engines::mock::{text_turn, tool_call_turn, MockEngine};
    use hearth::models::role::Role;
    use hearth::session::RuntimeSession;
    use hearth::tools::ToolRegistry;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct ScriptedPrompt {
        inputs: VecDeque<Input>,
    }

    impl Prompt for ScriptedPrompt {
        fn get_input(&mut self) -> Result<Input> {
            Ok(self
                .inputs
                .pop_front()
                .unwrap_or_else(|| Input::of(InputType::Exit)))
        }

        fn hearth_ready(&self) {}
    }

    fn session(engine: &MockEngine) -> Session {
        let runtime = Arc::new(RuntimeSession::new(Arc::new(engine.clone())));
        Session::new(Agent::new(runtime, ToolRegistry::with_builtin_tools()))
    }

    #[tokio::test]
    async fn test_repl_runs_exchanges_and_commands() {
        let engine = MockEngine::new()
            .with_turn(tool_call_turn("call_1", "calculate", r#"{"expression":"2+2"}"#))
            .with_turn(text_turn(&["The answer is 4."]))
            .with_turn(text_turn(&["Hello again."]));
        let mut session = session(&engine);
        session.select_model("mock").await.unwrap();

        let mut prompt = ScriptedPrompt {
            inputs: VecDeque::from(vec![
                Input::message("What is 2+2?"),
                Input::of(InputType::Reset),
                Input::of(InputType::AskAgain),
                Input::message("hi"),
            ]),
        };
        session.start(&mut prompt).await.unwrap();

        let requests = engine.requests();
        assert_eq!(requests.len(), 3);
        // The reset dropped the first exchange before "hi" was sent
        let roles: Vec<_> = requests[2].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(requests[2][1].content, "hi");
        // Leaving the REPL unloads the model
        assert_eq!(engine.unloads(), 1);
    }

    #[tokio::test]
    async fn test_headless_failure_is_an_error() {
        let engine = MockEngine::new()
            .repeating(tool_call_turn("call_1", "calculate", r#"{"expression":"1"}"#));
        let mut session = session(&engine);
        session.select_model("mock").await.unwrap();

        let result = session.headless_start("loop").await;

        assert!(result.is_err());
        assert_eq!(engine.requests().len(), 8);
    }

    #[tokio::test]
    async fn test_failed_model_load_is_reported() {
        let engine = MockEngine::new().failing_init("no such model");
        let session = session(&engine);

        let error = session.select_model("ghost").await.unwrap_err();

        assert!(error.to_string().contains("no such model"));
    }
}
