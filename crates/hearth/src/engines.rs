pub mod base;
pub mod mock;
pub mod ollama;
pub mod utils;

pub use base::{DeltaStream, EngineHandle, InferenceEngine, InitProgress, ProgressSender};
