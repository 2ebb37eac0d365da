//! Error types for extraction and the slot-filling state machine.

use parley_core::{ParleyError, ResolutionState, TurnError, TurnErrorKind};

/// Errors from parameter extraction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("Could not read '{raw}' as {expected} for parameter '{param}'")]
    TypeCoercionFailed {
        param: String,
        expected: String,
        raw: String,
    },

    #[error("Missing required parameter '{param}'")]
    MissingRequiredParameter { param: String },

    #[error("Parameter extraction timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Text generation failed: {0}")]
    GenerationFailed(String),
}

impl ExtractionError {
    /// Parameter the error concerns, if any.
    pub fn param(&self) -> Option<&str> {
        match self {
            ExtractionError::TypeCoercionFailed { param, .. }
            | ExtractionError::MissingRequiredParameter { param } => Some(param),
            _ => None,
        }
    }

    pub fn to_turn_error(&self) -> TurnError {
        let kind = match self {
            ExtractionError::TypeCoercionFailed { .. } => TurnErrorKind::TypeCoercionFailed,
            ExtractionError::MissingRequiredParameter { .. } => {
                TurnErrorKind::MissingRequiredParameter
            }
            ExtractionError::Timeout { .. } => TurnErrorKind::Timeout,
            ExtractionError::GenerationFailed(_) => TurnErrorKind::GenerationFailed,
        };
        TurnError::new(kind, self.to_string())
    }
}

impl From<ExtractionError> for ParleyError {
    fn from(err: ExtractionError) -> Self {
        ParleyError::Generation(err.to_string())
    }
}

/// A resolution state change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid resolution transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ResolutionState,
    pub to: ResolutionState,
}
