use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::EngineResult;
use crate::models::delta::DeltaFragment;
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One initialization status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitProgress {
    /// Fraction complete, from 0.0 to 1.0
    pub progress: f32,
    /// Seconds since the model was selected
    pub time_elapsed: f64,
    pub text: String,
}

impl InitProgress {
    pub fn new<S: Into<String>>(progress: f32, text: S) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            time_elapsed: 0.0,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.text.starts_with("Error:")
    }
}

pub type ProgressSender = mpsc::UnboundedSender<InitProgress>;

/// The in-order fragments of one model turn; the stream ending marks the end of the turn
pub type DeltaStream = BoxStream<'static, EngineResult<DeltaFragment>>;

/// Something that can bring a model up and hand back a live handle to it
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Prepare `model` for inference, reporting progress along the way
    async fn initialize(
        &self,
        model: &str,
        progress: ProgressSender,
    ) -> EngineResult<Arc<dyn EngineHandle>>;
}

/// A model that finished initializing
#[async_trait]
pub trait EngineHandle: Send + Sync {
    fn model(&self) -> &str;

    /// Start a streamed completion over `messages`, advertising `tools` to the model
    async fn complete_stream(&self, messages: &[Message], tools: &[Tool])
        -> EngineResult<DeltaStream>;

    /// Release the model's resources
    async fn unload(&self) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(InitProgress::new(1.5, "done").progress, 1.0);
        assert_eq!(InitProgress::new(-0.2, "start").progress, 0.0);
        assert!(InitProgress::new(0.0, "Error: boom").is_error());
        assert!(!InitProgress::new(0.0, "Initializing engine...").is_error());
    }
}
