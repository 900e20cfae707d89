use std::process::ExitStatus;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("required field missing: {0}")]
    RequiredField(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("role '{choice}' is not available in the {pattern} pattern")]
    InvalidRole { pattern: String, choice: String },

    #[error("command failed: {command}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("registry login failed: {0}")]
    RegistryLogin(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("service '{0}' did not become healthy after {1} attempts")]
    HealthcheckTimeout(String, u32),

    #[error("{0}")]
    Other(String),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Shorthand for a missing required field.
    #[must_use]
    pub fn required(field: &str) -> Self {
        Self::RequiredField(field.to_string())
    }
}
