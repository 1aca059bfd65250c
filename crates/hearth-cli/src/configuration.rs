use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use hearth::agent::{AgentLimits, DEFAULT_MAX_TURNS, DEFAULT_SYSTEM_PROMPT};
use hearth::engines::ollama::{OllamaEngineConfig, OLLAMA_HOST};
use hearth::session::DEFAULT_INIT_TIMEOUT;
use serde::Deserialize;

use crate::error::{to_env_var, ConfigError};

#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
    #[serde(default = "default_pull")]
    pub pull: bool,
    #[serde(default)]
    pub keep_alive: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: None,
            temperature: None,
            max_tokens: None,
            pull: default_pull(),
            keep_alive: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            init_timeout_secs: default_init_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// `<config dir>/hearth/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hearth").join("config.toml"))
    }

    /// Load defaults, then the config file, then `HEARTH_*` environment variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("engine.host", default_host())?
            .set_default("engine.pull", default_pull())?
            .set_default("conversation.max_turns", default_max_turns() as i64)?
            .set_default("log.level", default_log_level())?;

        match path {
            Some(path) => {
                builder = builder.add_source(
                    File::new(&path.to_string_lossy(), FileFormat::Toml).required(true),
                );
            }
            None => {
                if let Some(path) = Self::default_path() {
                    builder = builder.add_source(
                        File::new(&path.to_string_lossy(), FileFormat::Toml).required(false),
                    );
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix("HEARTH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            ConfigError::Other(err)
        })
    }

    /// The model to load: the one asked for on the command line, else the configured one
    pub fn model(&self, requested: Option<String>) -> Result<String, ConfigError> {
        requested
            .or_else(|| self.engine.model.clone())
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                env_var: to_env_var("engine.model"),
            })
    }

    pub fn engine_config(&self) -> OllamaEngineConfig {
        OllamaEngineConfig {
            host: self.engine.host.clone(),
            temperature: self.engine.temperature,
            max_tokens: self.engine.max_tokens,
            pull: self.engine.pull,
            keep_alive: self.engine.keep_alive.clone(),
        }
    }

    pub fn limits(&self) -> AgentLimits {
        AgentLimits {
            max_turns: self.conversation.max_turns,
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation.init_timeout_secs)
    }

    /// `None` when the configured prompt is blank
    pub fn system_prompt(&self) -> Option<String> {
        let prompt = self.conversation.system_prompt.trim();
        (!prompt.is_empty()).then(|| prompt.to_string())
    }
}

fn default_host() -> String {
    OLLAMA_HOST.to_string()
}

fn default_pull() -> bool {
    true
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_init_timeout_secs() -> u64 {
    DEFAULT_INIT_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "warn".to_string()
}
