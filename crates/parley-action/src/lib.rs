//! Command layer for Parley.
//!
//! Holds the registry of host-exposed commands, the async handler seam the
//! host implements, and the executor that invokes a handler in isolation.

pub mod error;
pub mod executor;
pub mod handler;
pub mod registry;

pub use error::{CommandNotFound, ExecutionError, RegistrationError};
pub use executor::CommandExecutor;
pub use handler::{
    handler_fn, CommandArgs, CommandFailure, CommandHandler, CommandOutput, FnHandler,
    InvocationContext,
};
pub use registry::{CommandRegistry, CommandSpec, RegisterOutcome, RegistrySnapshot};
