use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};

use crate::assembler::DeltaAssembler;
use crate::conversation::{ConversationStore, HistoryEvent};
use crate::engines::InitProgress;
use crate::errors::{AgentError, AgentResult, EngineError, SessionError, StoreError};
use crate::models::delta::AssembledTurn;
use crate::models::message::{Message, TOOL_PLACEHOLDER_TEXT};
use crate::models::tool::Tool;
use crate::session::{RuntimeSession, SelectOutcome};
use crate::tools::ToolRegistry;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hearth, a private AI assistant running entirely on the user's machine. You are helpful, concise, and respect user privacy. You have access to tools. Use them when needed.";
pub const DEFAULT_MAX_TURNS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    /// Model turns allowed per exchange
    pub max_turns: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// How an exchange ended. Failures are also recorded in the history as a system message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The model produced a final answer
    Answered,
    /// The stream failed; carries the detail
    Failed(String),
    /// The model was still calling tools after this many turns
    TurnLimitReached(usize),
    /// The conversation was reset while the exchange ran
    Abandoned,
}

enum TurnError {
    Store(StoreError),
    Stream(String),
}

impl From<StoreError> for TurnError {
    fn from(error: StoreError) -> Self {
        TurnError::Store(error)
    }
}

/// Agent drives conversations with a model that can call tools.
///
/// It owns the conversation history and runs each user message through as many model
/// turns as it takes to get an answer, executing requested tools in between.
pub struct Agent {
    session: Arc<RuntimeSession>,
    tools: ToolRegistry,
    store: ConversationStore,
    limits: AgentLimits,
    exchange: Mutex<()>,
}

impl Agent {
    /// Create an agent with the default system prompt and limits
    pub fn new(session: Arc<RuntimeSession>, tools: ToolRegistry) -> Self {
        Self {
            session,
            tools,
            store: ConversationStore::new(Some(DEFAULT_SYSTEM_PROMPT.to_string())),
            limits: AgentLimits::default(),
            exchange: Mutex::new(()),
        }
    }

    /// Replace the system prompt; `None` starts conversations without one
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.store = ConversationStore::new(prompt);
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn session(&self) -> &Arc<RuntimeSession> {
        &self.session
    }

    pub fn history(&self) -> Vec<Message> {
        self.store.messages()
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<HistoryEvent> {
        self.store.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<InitProgress> {
        self.session.subscribe_progress()
    }

    pub async fn select_model(&self, model: &str) -> AgentResult<SelectOutcome> {
        Ok(self.session.select(model).await?)
    }

    /// Clear the history back to the system prompt. A running exchange is abandoned right
    /// away, even while it waits on the model or a tool, and never writes to the cleared
    /// history.
    pub fn reset_conversation(&self) {
        tracing::info!("resetting conversation");
        self.store.reset();
    }

    /// Unload the model and clear the conversation
    pub async fn shutdown(&self) {
        self.store.reset();
        self.session.reset().await;
    }

    /// Add a user message and run the exchange that answers it
    pub async fn append_user_message(&self, text: &str) -> AgentResult<ExchangeOutcome> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }
        let _exchange = self
            .exchange
            .try_lock()
            .map_err(|_| AgentError::ExchangeInProgress)?;
        if !self.session.is_ready() {
            return Err(SessionError::NotReady {
                state: self.session.state().to_string(),
            }
            .into());
        }

        let epoch = self.store.epoch();
        self.store.append(epoch, Message::user().with_text(text))?;

        let outcome = tokio::select! {
            outcome = self.run_exchange(epoch) => outcome,
            _ = self.store.reset_since(epoch) => Err(StoreError::Stale),
        };
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(StoreError::Stale) => {
                tracing::info!("conversation was reset during the exchange");
                Ok(ExchangeOutcome::Abandoned)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn run_exchange(&self, epoch: u64) -> Result<ExchangeOutcome, StoreError> {
        let tools = self.tools.declarations();
        let max_turns = self.limits.max_turns;
        let mut turn = 0;

        loop {
            if turn >= max_turns {
                tracing::warn!(turn, max_turns, "model kept calling tools, stopping");
                let message = format!(
                    "Error: Stopped after {} model turns without a final answer.",
                    turn
                );
                self.store
                    .append(epoch, Message::system().with_text(message))?;
                return Ok(ExchangeOutcome::TurnLimitReached(turn));
            }
            turn += 1;
            tracing::debug!(turn, max_turns, "starting model turn");

            let history = self.store.messages();
            self.store.append_placeholder(epoch, Message::assistant())?;

            let assembled = match self.stream_turn(epoch, &history, &tools).await {
                Ok(assembled) => assembled,
                Err(TurnError::Store(error)) => return Err(error),
                Err(TurnError::Stream(detail)) => {
                    tracing::error!(turn, error = %detail, "failed to generate response");
                    self.store.discard_placeholder(epoch)?;
                    let message = format!("Error: Failed to generate response: {}", detail);
                    self.store
                        .append(epoch, Message::system().with_text(message))?;
                    return Ok(ExchangeOutcome::Failed(detail));
                }
            };

            let tool_calls = assembled.tool_calls;
            self.store.commit_last(
                epoch,
                Message::assistant()
                    .with_text(assembled.content)
                    .with_tool_calls(tool_calls.clone()),
            )?;
            if tool_calls.is_empty() {
                return Ok(ExchangeOutcome::Answered);
            }

            for call in &tool_calls {
                self.store.append_placeholder(
                    epoch,
                    Message::tool(&call.id, &call.name).with_text(TOOL_PLACEHOLDER_TEXT),
                )?;
                tracing::info!(turn, tool = %call.name, id = %call.id, "executing tool");
                let output = self.tools.invoke(&call.name, &call.arguments).await;
                self.store
                    .commit_last(epoch, Message::tool(&call.id, &call.name).with_text(output))?;
            }
        }
    }

    async fn stream_turn(
        &self,
        epoch: u64,
        history: &[Message],
        tools: &[Tool],
    ) -> Result<AssembledTurn, TurnError> {
        let mut stream = self
            .session
            .complete(history, tools)
            .await
            .map_err(|error| TurnError::Stream(error.to_string()))?;

        let mut assembler = DeltaAssembler::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|error| {
                if let EngineError::ConnectionLost(_) = error {
                    self.session.mark_connection_lost(&error);
                }
                TurnError::Stream(error.to_string())
            })?;
            if let Some(content) = assembler.push(fragment) {
                self.store
                    .replace_last(epoch, Message::assistant().with_text(content))?;
            }
        }
        Ok(assembler.finish())
    }
}
