//! Isolated command invocation.
//!
//! Each handler runs in its own task so that a failure or panic in the command
//! body never reaches the dispatch loop.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::handler::{CommandArgs, CommandOutput, InvocationContext};
use crate::registry::CommandSpec;

/// Runs command handlers under a time budget.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke `spec` with `args`, filling optional defaults first.
    ///
    /// On timeout the invocation context is flagged as cancelled and the task
    /// is detached; whatever it eventually returns is discarded.
    pub async fn invoke(
        &self,
        spec: &Arc<CommandSpec>,
        mut args: CommandArgs,
    ) -> Result<CommandOutput, ExecutionError> {
        spec.apply_defaults(&mut args);

        let ctx = InvocationContext::new(spec.name.clone());
        let task_ctx = ctx.clone();
        let handler = Arc::clone(&spec.handler);
        let command = spec.name.clone();

        debug!(command = %command, args = args.len(), "Invoking command");
        let mut handle =
            tokio::spawn(async move { handler.call(&args, &task_ctx).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(failure))) => {
                warn!(command = %command, error = %failure, "Command failed");
                Err(ExecutionError::CommandRaised {
                    command,
                    message: failure.message,
                })
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "command task was cancelled".to_string()
                };
                warn!(command = %command, error = %message, "Command panicked");
                Err(ExecutionError::CommandRaised { command, message })
            }
            Err(_) => {
                ctx.cancel();
                drop(handle);
                let after_ms = self.timeout.as_millis() as u64;
                warn!(command = %command, after_ms, "Command timed out");
                Err(ExecutionError::Timeout { command, after_ms })
            }
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command panicked".to_string()
    }
}
