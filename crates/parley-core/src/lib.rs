pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use session::{
    ConversationSession, ResolutionState, Turn, TurnError, TurnErrorKind, SESSION_SCHEMA_VERSION,
};
pub use types::*;
