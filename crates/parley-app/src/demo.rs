//! Demo commands and the offline embedding vocabulary that goes with them.

use std::sync::Arc;

use async_trait::async_trait;
use parley_action::{handler_fn, CommandArgs, CommandOutput, CommandRegistry, RegistrationError};
use parley_chat::{CompletedCommand, DispatchEngine, ResponseGenerator};
use parley_core::{ParamSpec, ParamType, ParamValue, ParleyError};
use parley_vector::KeywordEmbedding;

/// Register the demo command set. Any rejection aborts startup.
pub fn register_demo_commands(registry: &CommandRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "get_weather",
        handler_fn(|args: CommandArgs| async move {
            Ok(CommandOutput::text(format!("It's sunny in {}!", args.str("location")?)))
        }),
        vec![ParamSpec::required("location", ParamType::String)],
        "Current weather for a location",
    )?;

    registry.register(
        "add",
        handler_fn(|args: CommandArgs| async move {
            let sum = args.float("a")? + args.float("b")?;
            Ok(CommandOutput::text(format!("{}", sum)))
        }),
        vec![
            ParamSpec::required("a", ParamType::Float),
            ParamSpec::required("b", ParamType::Float),
        ],
        "Add two numbers",
    )?;

    registry.register(
        "set_reminder",
        handler_fn(|args: CommandArgs| async move {
            let message = args.str("message")?.to_string();
            let minutes = args.integer("minutes")?;
            let priority = args.str("priority")?.to_string();
            let unit = if minutes == 1 { "minute" } else { "minutes" };
            Ok(CommandOutput::text(format!(
                "Okay, I'll remind you to {} in {} {} ({} priority).",
                message, minutes, unit, priority
            )))
        }),
        vec![
            ParamSpec::required("message", ParamType::String).with_description("reminder text"),
            ParamSpec::required("minutes", ParamType::Integer),
            ParamSpec::optional(
                "priority",
                ParamType::Enum(vec!["low".into(), "normal".into(), "high".into()]),
                Some(ParamValue::String("normal".into())),
            ),
        ],
        "Remind me about something after a number of minutes",
    )?;

    Ok(())
}

/// Replies to `add` with the whole sum, e.g. `3 + 4 = 7`.
struct SumResponder;

#[async_trait]
impl ResponseGenerator for SumResponder {
    async fn respond(&self, completed: &CompletedCommand<'_>) -> Result<String, ParleyError> {
        match (completed.arguments.get("a"), completed.arguments.get("b")) {
            (Some(a), Some(b)) => Ok(format!("{} + {} = {}", a, b, completed.output.text)),
            _ => Err(ParleyError::Generation("add ran without both operands".into())),
        }
    }
}

/// Install per-command reply phrasing for the demo set.
pub fn install_responders(engine: &DispatchEngine) {
    engine.set_command_responder("add", Arc::new(SumResponder));
}

/// Keyword embedding whose concepts cover the demo commands' vocabulary.
pub fn embedding() -> KeywordEmbedding {
    KeywordEmbedding::new()
        .concept("weather", &["forecast", "sunny", "rain", "temperature"])
        .concept("add", &["plus", "sum", "total"])
        .concept("reminder", &["remind", "remember"])
}
