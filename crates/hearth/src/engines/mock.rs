use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::base::{DeltaStream, EngineHandle, InferenceEngine, InitProgress, ProgressSender};
use crate::errors::{EngineError, EngineResult};
use crate::models::delta::{DeltaFragment, ToolCallPiece};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One step of a scripted model turn
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Fragment(DeltaFragment),
    Error(EngineError),
    /// Pause the stream until the notify fires
    WaitFor(Arc<Notify>),
    /// Fire the notify, letting a test know the stream got this far
    Signal(Arc<Notify>),
}

pub type Script = Vec<ScriptedEvent>;

/// Script for a turn that streams `text` in the given pieces
pub fn text_turn(pieces: &[&str]) -> Script {
    pieces
        .iter()
        .map(|piece| ScriptedEvent::Fragment(DeltaFragment::content(*piece)))
        .collect()
}

/// Script for a turn that requests a single tool call, streamed in one piece
pub fn tool_call_turn(id: &str, name: &str, arguments: &str) -> Script {
    vec![ScriptedEvent::Fragment(DeltaFragment::tool_call(
        ToolCallPiece::new(0)
            .with_id(id)
            .with_type("function")
            .with_name(name)
            .with_arguments(arguments),
    ))]
}

#[derive(Default)]
struct MockState {
    turns: VecDeque<Script>,
    repeat: Option<Script>,
    requests: Vec<Vec<Message>>,
    tools: Vec<Vec<Tool>>,
    initializations: Vec<String>,
    unloads: usize,
}

/// An engine that replays scripted turns, for tests and offline demos.
///
/// Clones share their script and recorded requests, so a test can keep one clone to
/// inspect while the session owns another.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    init_progress: Vec<InitProgress>,
    init_gate: Option<Arc<Notify>>,
    init_error: Option<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn; turns are replayed in the order they were added
    pub fn with_turn(self, script: Script) -> Self {
        self.lock().turns.push_back(script);
        self
    }

    /// Replay `script` for every turn once the queued turns run out
    pub fn repeating(self, script: Script) -> Self {
        self.lock().repeat = Some(script);
        self
    }

    /// Report these progress events during initialization
    pub fn with_init_progress(mut self, progress: Vec<InitProgress>) -> Self {
        self.init_progress = progress;
        self
    }

    /// Hold initialization until the notify fires
    pub fn with_init_gate(mut self, gate: Arc<Notify>) -> Self {
        self.init_gate = Some(gate);
        self
    }

    pub fn failing_init<S: Into<String>>(mut self, message: S) -> Self {
        self.init_error = Some(message.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The history sent with each completion request, in order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.lock().requests.clone()
    }

    /// The tool declarations sent with each completion request
    pub fn tools(&self) -> Vec<Vec<Tool>> {
        self.lock().tools.clone()
    }

    /// Models passed to `initialize`, in call order
    pub fn initializations(&self) -> Vec<String> {
        self.lock().initializations.clone()
    }

    pub fn unloads(&self) -> usize {
        self.lock().unloads
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn initialize(
        &self,
        model: &str,
        progress: ProgressSender,
    ) -> EngineResult<Arc<dyn EngineHandle>> {
        self.lock().initializations.push(model.to_string());

        for update in &self.init_progress {
            let _ = progress.send(update.clone());
        }
        if let Some(gate) = &self.init_gate {
            gate.notified().await;
        }
        if let Some(message) = &self.init_error {
            return Err(EngineError::Initialization {
                model: model.to_string(),
                message: message.clone(),
            });
        }

        Ok(Arc::new(MockHandle {
            model: model.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockHandle {
    model: String,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl EngineHandle for MockHandle {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> EngineResult<DeltaStream> {
        let script = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.requests.push(messages.to_vec());
            state.tools.push(tools.to_vec());
            match state.turns.pop_front() {
                Some(script) => script,
                None => state.repeat.clone().unwrap_or_default(),
            }
        };

        Ok(Box::pin(async_stream::stream! {
            for event in script {
                match event {
                    ScriptedEvent::Fragment(fragment) => yield Ok(fragment),
                    ScriptedEvent::Error(error) => {
                        yield Err(error);
                        return;
                    }
                    ScriptedEvent::WaitFor(notify) => notify.notified().await,
                    ScriptedEvent::Signal(notify) => notify.notify_one(),
                }
            }
        }))
    }

    async fn unload(&self) -> EngineResult<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unloads += 1;
        Ok(())
    }
}
