use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start converter '{program}' for {}: {source}", path.display())]
    ConverterInvocation {
        program: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter failed for {}: {reason}", path.display())]
    ConverterExecution { path: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DispatchError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DispatchError::Config(_) | DispatchError::Toml(_))
    }

    /// Short label used for metrics and reports
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Config(_) | DispatchError::Toml(_) => "configuration",
            DispatchError::ConverterInvocation { .. } => "invocation",
            DispatchError::ConverterExecution { .. } => "execution",
            DispatchError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
