//! Runtime error types.

use skein_engine::IsolateError;

/// Errors raised by script functions and port handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// Ordinary uncaught exception; the isolate keeps running
    #[error("Uncaught exception: {0}")]
    Exception(String),

    /// Unrecoverable; the isolate is shut down
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ScriptError {
    /// Create a non-fatal exception
    pub fn exception(message: impl Into<String>) -> Self {
        ScriptError::Exception(message.into())
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        ScriptError::Fatal(message.into())
    }
}

impl From<SendError> for ScriptError {
    fn from(error: SendError) -> Self {
        ScriptError::Exception(error.to_string())
    }
}

/// Errors returned when posting to a port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The receiving isolate has shut down
    #[error("Port is closed")]
    Closed,

    /// No port is published under the name
    #[error("No port published as '{0}'")]
    UnknownPort(String),
}

/// Errors that can occur while loading host configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by the host facade.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Isolate lifecycle error
    #[error(transparent)]
    Isolate(#[from] IsolateError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}
