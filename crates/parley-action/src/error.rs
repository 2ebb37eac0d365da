//! Error types for the command layer.

use parley_core::ParleyError;

/// Errors from command registration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("Command already registered with a different definition: {0}")]
    DuplicateCommand(String),
    #[error("Invalid signature for command '{name}': {reason}")]
    InvalidSignature { name: String, reason: String },
}

/// Lookup of a command name that is not registered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Command not found: {0}")]
pub struct CommandNotFound(pub String);

/// Errors raised at the command-invocation boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Command '{command}' failed: {message}")]
    CommandRaised { command: String, message: String },
    #[error("Command '{command}' timed out after {after_ms} ms")]
    Timeout { command: String, after_ms: u64 },
}

impl ExecutionError {
    pub fn command(&self) -> &str {
        match self {
            ExecutionError::CommandRaised { command, .. } => command,
            ExecutionError::Timeout { command, .. } => command,
        }
    }
}

impl From<RegistrationError> for ParleyError {
    fn from(err: RegistrationError) -> Self {
        ParleyError::Registration(err.to_string())
    }
}

impl From<ExecutionError> for ParleyError {
    fn from(err: ExecutionError) -> Self {
        ParleyError::Execution(err.to_string())
    }
}
