//! Conversational dispatch for Parley.
//!
//! Turns free-text utterances into validated command invocations across
//! multiple turns: meta commands, intent resolution and disambiguation,
//! slot filling with type coercion, isolated execution, and per-session
//! persistence.

pub mod coercion;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod meta;
pub mod responder;
pub mod response;
pub mod state_machine;

pub use coercion::coerce;
pub use engine::{DispatchEngine, EngineHealth, EngineSettings, TurnResult};
pub use error::{ExtractionError, InvalidTransition};
pub use extractor::{ExtractionReport, ParameterExtractor};
pub use generation::{HeuristicGenerator, TextGenerator};
pub use meta::MetaCommand;
pub use responder::{CompletedCommand, GeneratedResponder, PassthroughResponder, ResponseGenerator};
pub use state_machine::validate_transition;
