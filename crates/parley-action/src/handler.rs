//! Command handler trait and argument types.
//!
//! The host application implements `CommandHandler` (or wraps a closure with
//! [`handler_fn`]) for every command it exposes.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::ParamValue;
use serde::{Deserialize, Serialize};

/// An invocable command body.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command with fully coerced arguments.
    ///
    /// Long-running handlers should poll `ctx.is_cancelled()` and return early
    /// once the invocation has timed out.
    async fn call(
        &self,
        args: &CommandArgs,
        ctx: &InvocationContext,
    ) -> Result<CommandOutput, CommandFailure>;
}

/// Result of a successful command invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Human-readable text returned to the user.
    pub text: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Failure raised by a command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub message: String,
}

impl CommandFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandFailure {}

impl From<String> for CommandFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CommandFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Named, typed arguments passed to a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandArgs(BTreeMap<String, ParamValue>);

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Result<&str, CommandFailure> {
        self.get(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| missing(name, "string"))
    }

    pub fn integer(&self, name: &str) -> Result<i64, CommandFailure> {
        self.get(name)
            .and_then(ParamValue::as_i64)
            .ok_or_else(|| missing(name, "integer"))
    }

    pub fn float(&self, name: &str) -> Result<f64, CommandFailure> {
        self.get(name)
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| missing(name, "float"))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, CommandFailure> {
        self.get(name)
            .and_then(ParamValue::as_bool)
            .ok_or_else(|| missing(name, "boolean"))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, ParamValue> {
        self.0
    }
}

impl From<BTreeMap<String, ParamValue>> for CommandArgs {
    fn from(map: BTreeMap<String, ParamValue>) -> Self {
        Self(map)
    }
}

fn missing(name: &str, expected: &str) -> CommandFailure {
    CommandFailure::new(format!("argument '{}' is missing or not a {}", name, expected))
}

/// Per-invocation context handed to a handler.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    command: String,
    cancelled: Arc<AtomicBool>,
}

impl InvocationContext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Set once the invocation has exceeded its budget.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Adapts an async closure into a [`CommandHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandOutput, CommandFailure>> + Send,
{
    async fn call(
        &self,
        args: &CommandArgs,
        _ctx: &InvocationContext,
    ) -> Result<CommandOutput, CommandFailure> {
        (self.f)(args.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// let h = handler_fn(|args| async move {
///     let location = args.str("location")?.to_string();
///     Ok(CommandOutput::text(format!("It's sunny in {}!", location)))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CommandOutput, CommandFailure>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_typed_getters() {
        let args = CommandArgs::new()
            .with("location", "Paris")
            .with("count", 3i64)
            .with("ratio", 0.5f64)
            .with("verbose", true);

        assert_eq!(args.str("location").unwrap(), "Paris");
        assert_eq!(args.integer("count").unwrap(), 3);
        assert_eq!(args.float("ratio").unwrap(), 0.5);
        assert_eq!(args.float("count").unwrap(), 3.0);
        assert!(args.boolean("verbose").unwrap());
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn test_args_missing_or_mistyped() {
        let args = CommandArgs::new().with("location", "Paris");
        let err = args.integer("location").unwrap_err();
        assert_eq!(err.message, "argument 'location' is missing or not a integer");
        assert!(args.str("other").is_err());
    }

    #[test]
    fn test_invocation_context_cancel() {
        let ctx = InvocationContext::new("slow");
        let observer = ctx.clone();
        assert!(!observer.is_cancelled());
        ctx.cancel();
        assert!(observer.is_cancelled());
        assert_eq!(observer.command(), "slow");
    }

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let handler = handler_fn(|args: CommandArgs| async move {
            let location = args.str("location")?.to_string();
            Ok(CommandOutput::text(format!("It's sunny in {}!", location)))
        });
        let args = CommandArgs::new().with("location", "Paris");
        let out = handler
            .call(&args, &InvocationContext::new("get_weather"))
            .await
            .unwrap();
        assert_eq!(out.text, "It's sunny in Paris!");
    }

    #[test]
    fn test_output_data_is_optional_on_the_wire() {
        let plain = serde_json::to_value(CommandOutput::text("7")).unwrap();
        assert_eq!(plain, serde_json::json!({ "text": "7" }));

        let rich = CommandOutput::text("7").with_data(serde_json::json!({ "sum": 7.0 }));
        let back: CommandOutput =
            serde_json::from_value(serde_json::to_value(&rich).unwrap()).unwrap();
        assert_eq!(back, rich);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_failure() {
        let handler =
            handler_fn(|_args: CommandArgs| async move { Err(CommandFailure::from("nope")) });
        let err = handler
            .call(&CommandArgs::new(), &InvocationContext::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
