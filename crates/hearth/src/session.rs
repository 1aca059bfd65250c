use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::engines::{DeltaStream, EngineHandle, InferenceEngine, InitProgress};
use crate::errors::{EngineError, SessionError, SessionResult};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_CAPACITY: usize = 64;

/// Lifecycle of the model runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Initializing { model: String },
    Ready { model: String },
    Failed { model: String, error: String },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unloaded => write!(f, "unloaded"),
            SessionState::Initializing { model } => write!(f, "initializing {}", model),
            SessionState::Ready { model } => write!(f, "ready with {}", model),
            SessionState::Failed { model, error } => write!(f, "failed to load {}: {}", model, error),
        }
    }
}

/// What a call to [`RuntimeSession::select`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Loaded,
    /// Another initialization is running, or the model is already loaded
    Skipped,
}

struct SessionInner {
    state: SessionState,
    handle: Option<Arc<dyn EngineHandle>>,
    last_error: Option<String>,
    // Bumped by every selection and reset so a superseded initialization can tell
    epoch: u64,
}

/// Owns the connection to the inference engine for one conversation
pub struct RuntimeSession {
    engine: Arc<dyn InferenceEngine>,
    inner: Mutex<SessionInner>,
    progress: broadcast::Sender<InitProgress>,
    init_timeout: Duration,
}

impl RuntimeSession {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            engine,
            inner: Mutex::new(SessionInner {
                state: SessionState::Unloaded,
                handle: None,
                last_error: None,
                epoch: 0,
            }),
            progress,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    /// How long initialization may go without any progress before a timeout is reported
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<InitProgress> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.lock().state, SessionState::Ready { .. })
    }

    /// Why the most recent initialization failed or the connection dropped. Cleared by
    /// the next selection.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn publish(&self, mut update: InitProgress, started: Instant) {
        update.time_elapsed = started.elapsed().as_secs_f64();
        let _ = self.progress.send(update);
    }

    /// Load `model`, reporting progress to subscribers.
    ///
    /// Does nothing while any initialization is running or when `model` is already
    /// loaded. A different loaded model is unloaded first. A failed attempt passes through
    /// [`SessionState::Failed`] back to [`SessionState::Unloaded`], so selecting again retries.
    pub async fn select(&self, model: &str) -> SessionResult<SelectOutcome> {
        let (epoch, previous) = {
            let mut inner = self.lock();
            match &inner.state {
                SessionState::Initializing { model: pending } => {
                    tracing::debug!(model, pending = %pending, "initialization already running");
                    return Ok(SelectOutcome::Skipped);
                }
                SessionState::Ready { model: current } if current == model => {
                    return Ok(SelectOutcome::Skipped);
                }
                _ => {}
            }
            inner.epoch += 1;
            inner.last_error = None;
            inner.state = SessionState::Initializing {
                model: model.to_string(),
            };
            (inner.epoch, inner.handle.take())
        };

        if let Some(previous) = previous {
            if let Err(error) = previous.unload().await {
                tracing::warn!(model = %previous.model(), %error, "failed to unload previous model");
            }
        }

        let started = Instant::now();
        tracing::info!(model, "initializing model");
        self.publish(InitProgress::new(0.0, "Initializing engine..."), started);

        let (sender, mut updates) = mpsc::unbounded_channel();
        let initialize = self.engine.initialize(model, sender);
        tokio::pin!(initialize);
        let watchdog = tokio::time::sleep(self.init_timeout);
        tokio::pin!(watchdog);
        let mut observed = false;
        let mut watchdog_fired = false;

        let result = loop {
            tokio::select! {
                result = &mut initialize => break result,
                Some(update) = updates.recv() => {
                    observed = true;
                    self.publish(update, started);
                }
                _ = &mut watchdog, if !watchdog_fired => {
                    watchdog_fired = true;
                    if !observed {
                        tracing::warn!(model, timeout = ?self.init_timeout, "no initialization progress");
                        self.publish(
                            InitProgress::new(0.0, "Error: Initialization timed out."),
                            started,
                        );
                    }
                }
            }
        };
        while let Ok(update) = updates.try_recv() {
            self.publish(update, started);
        }

        self.finish_select(model, epoch, result, started).await
    }

    async fn finish_select(
        &self,
        model: &str,
        epoch: u64,
        result: Result<Arc<dyn EngineHandle>, EngineError>,
        started: Instant,
    ) -> SessionResult<SelectOutcome> {
        let superseded = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                true
            } else {
                match &result {
                    Ok(handle) => {
                        inner.state = SessionState::Ready {
                            model: model.to_string(),
                        };
                        inner.handle = Some(Arc::clone(handle));
                    }
                    Err(error) => {
                        inner.last_error = Some(error.to_string());
                        inner.state = SessionState::Failed {
                            model: model.to_string(),
                            error: error.to_string(),
                        };
                    }
                }
                false
            }
        };

        if superseded {
            tracing::info!(model, "session was reset during initialization");
            if let Ok(handle) = result {
                if let Err(error) = handle.unload().await {
                    tracing::warn!(model, %error, "failed to unload abandoned model");
                }
            }
            return Err(SessionError::Reset {
                model: model.to_string(),
            });
        }

        match result {
            Ok(_) => {
                tracing::info!(model, elapsed = ?started.elapsed(), "model ready");
                self.publish(InitProgress::new(1.0, format!("Model {} ready.", model)), started);
                Ok(SelectOutcome::Loaded)
            }
            Err(error) => {
                tracing::error!(model, %error, "model initialization failed");
                self.publish(InitProgress::new(0.0, format!("Error: {}", error)), started);
                let mut inner = self.lock();
                if inner.epoch == epoch {
                    inner.state = SessionState::Unloaded;
                }
                Err(SessionError::Initialization(error))
            }
        }
    }

    /// Unload whatever is loaded and return to [`SessionState::Unloaded`]. Safe in any
    /// state; an initialization in flight is abandoned when it completes.
    pub async fn reset(&self) {
        let handle = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.state = SessionState::Unloaded;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(error) = handle.unload().await {
                tracing::warn!(model = %handle.model(), %error, "failed to unload model");
            }
        }
    }

    /// Start a streamed completion. Only valid while a model is ready.
    pub async fn complete(&self, messages: &[Message], tools: &[Tool]) -> SessionResult<DeltaStream> {
        let handle = {
            let inner = self.lock();
            match (&inner.state, &inner.handle) {
                (SessionState::Ready { .. }, Some(handle)) => Arc::clone(handle),
                (state, _) => {
                    return Err(SessionError::NotReady {
                        state: state.to_string(),
                    })
                }
            }
        };

        handle
            .complete_stream(messages, tools)
            .await
            .map_err(|error| {
                if let EngineError::ConnectionLost(_) = error {
                    self.mark_connection_lost(&error);
                }
                SessionError::Engine(error)
            })
    }

    /// Move a ready session to [`SessionState::Failed`] after the engine connection dropped
    pub fn mark_connection_lost(&self, error: &EngineError) {
        let mut inner = self.lock();
        if let SessionState::Ready { model } = &inner.state {
            let model = model.clone();
            tracing::error!(model = %model, %error, "lost connection to the engine");
            inner.last_error = Some(error.to_string());
            inner.state = SessionState::Failed {
                model,
                error: error.to_string(),
            };
            inner.handle = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::mock::MockEngine;
    use tokio::sync::Notify;

    fn session(engine: &MockEngine) -> RuntimeSession {
        RuntimeSession::new(Arc::new(engine.clone()))
    }

    #[tokio::test]
    async fn test_select_reports_progress_and_becomes_ready() {
        let engine = MockEngine::new().with_init_progress(vec![InitProgress::new(0.5, "halfway")]);
        let session = session(&engine);
        let mut progress = session.subscribe_progress();

        assert_eq!(session.select("tiny").await, Ok(SelectOutcome::Loaded));
        assert_eq!(
            session.state(),
            SessionState::Ready {
                model: "tiny".into()
            }
        );

        let texts: Vec<_> = std::iter::from_fn(|| progress.try_recv().ok())
            .map(|update| update.text)
            .collect();
        assert_eq!(texts, vec!["Initializing engine...", "halfway", "Model tiny ready."]);
    }

    #[tokio::test]
    async fn test_reselecting_loaded_model_is_noop() {
        let engine = MockEngine::new();
        let session = session(&engine);

        session.select("tiny").await.unwrap();
        assert_eq!(session.select("tiny").await, Ok(SelectOutcome::Skipped));
        assert_eq!(engine.initializations().len(), 1);
    }

    #[tokio::test]
    async fn test_switching_models_unloads_previous() {
        let engine = MockEngine::new();
        let session = session(&engine);

        session.select("tiny").await.unwrap();
        session.select("small").await.unwrap();

        assert_eq!(engine.unloads(), 1);
        assert_eq!(engine.initializations(), vec!["tiny", "small"]);
    }

    #[tokio::test]
    async fn test_failed_init_is_retryable() {
        let engine = MockEngine::new().failing_init("out of memory");
        let session = session(&engine);
        let mut progress = session.subscribe_progress();

        let result = session.select("huge").await;
        assert!(matches!(result, Err(SessionError::Initialization(_))));
        assert_eq!(session.state(), SessionState::Unloaded);
        assert_eq!(
            session.last_error().as_deref(),
            Some("Failed to initialize model huge: out of memory")
        );

        let last = std::iter::from_fn(|| progress.try_recv().ok()).last().unwrap();
        assert_eq!(last.progress, 0.0);
        assert_eq!(
            last.text,
            "Error: Failed to initialize model huge: out of memory"
        );

        let _ = session.select("huge").await;
        assert_eq!(engine.initializations().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_requires_ready() {
        let session = session(&MockEngine::new());
        let result = session.complete(&[], &[]).await;
        assert!(matches!(result, Err(SessionError::NotReady { .. })));
    }

    #[tokio::test]
    async fn test_reset_during_initialization_abandons_it() {
        let gate = Arc::new(Notify::new());
        let engine = MockEngine::new().with_init_gate(Arc::clone(&gate));
        let session = Arc::new(session(&engine));

        let selecting = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.select("tiny").await }
        });
        while engine.initializations().is_empty() {
            tokio::task::yield_now().await;
        }

        session.reset().await;
        gate.notify_one();

        let result = selecting.await.unwrap();
        assert!(matches!(result, Err(SessionError::Reset { .. })));
        assert_eq!(session.state(), SessionState::Unloaded);
        assert_eq!(engine.unloads(), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_ready_session() {
        let session = session(&MockEngine::new());
        session.select("tiny").await.unwrap();

        session.mark_connection_lost(&EngineError::ConnectionLost("socket closed".into()));

        assert!(!session.is_ready());
        assert!(matches!(session.state(), SessionState::Failed { .. }));
        assert_eq!(
            session.last_error().as_deref(),
            Some("Connection to the engine was lost: socket closed")
        );
    }
}
