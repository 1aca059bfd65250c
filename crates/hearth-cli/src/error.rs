use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: set {env_var} or add it to the config file")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted configuration key, e.g.
/// `engine.model` becomes `HEARTH_ENGINE__MODEL`
pub fn to_env_var(field_path: &str) -> String {
    format!("HEARTH_{}", field_path.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("engine.model"), "HEARTH_ENGINE__MODEL");
        assert_eq!(
            to_env_var("conversation.max_turns"),
            "HEARTH_CONVERSATION__MAX_TURNS"
        );
        assert_eq!(to_env_var("log"), "HEARTH_LOG");
    }
}
