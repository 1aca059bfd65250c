use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a tool. The registry folds these into the conversation as text.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures at the inference engine boundary
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum EngineError {
    #[error("Failed to initialize model {model}: {message}")]
    Initialization { model: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Engine returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Unable to parse engine response: {0}")]
    ResponseParse(String),

    #[error("Connection to the engine was lost: {0}")]
    ConnectionLost(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures of the runtime session manager
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("No model is ready (session is {state})")]
    NotReady { state: String },

    #[error("Session was reset while initializing {model}")]
    Reset { model: String },

    #[error(transparent)]
    Initialization(EngineError),

    #[error(transparent)]
    Engine(EngineError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Violations of the conversation store's mutation rules
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conversation was reset; the write belongs to an abandoned exchange")]
    Stale,

    #[error("The last message is still being streamed")]
    PlaceholderOpen,

    #[error("There is no in-progress message to update")]
    NoPlaceholder,
}

/// Errors returned to callers of the agent. Failures that happen while an exchange is
/// running are written into the conversation instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("An exchange is already in progress")]
    ExchangeInProgress,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AgentResult<T> = Result<T, AgentError>;

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::Transport(error.to_string())
    }
}
