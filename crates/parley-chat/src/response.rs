//! User-facing response text.
//!
//! Every message the engine returns is composed here so wording stays
//! consistent across the state machine.

use parley_action::{CommandSpec, ExecutionError, RegistrySnapshot};
use parley_core::ParamType;
use parley_vector::IntentMatch;

use crate::error::ExtractionError;

pub fn empty_utterance() -> String {
    "I didn't catch that.".to_string()
}

pub fn no_match() -> String {
    "Sorry, I don't know how to help with that. Say 'help' to see what I can do.".to_string()
}

pub fn embedding_unavailable() -> String {
    "I can't understand requests right now. Please try again shortly.".to_string()
}

/// Numbered candidate list for a contested match.
pub fn clarify(candidates: &[IntentMatch]) -> String {
    let mut text = String::from("Did you mean one of these?");
    for (i, candidate) in candidates.iter().enumerate() {
        text.push_str(&format!("\n  {}. {}", i + 1, describe(&candidate.command)));
    }
    text.push_str("\nReply with a number or name.");
    text
}

pub fn selection_out_of_range(count: usize) -> String {
    format!("Please enter a number between 1 and {}.", count)
}

/// Ask the user for one slot of `spec`.
pub fn ask_for(spec: &CommandSpec, param: &str) -> String {
    let Some(p) = spec.param(param) else {
        return format!("What {} should I use?", param.replace('_', " "));
    };
    let label = if p.description.is_empty() {
        p.name.replace('_', " ")
    } else {
        p.description.clone()
    };
    match &p.param_type {
        ParamType::Enum(variants) => format!(
            "Which {} should I use for {}? Options: {}.",
            label,
            spec.name,
            variants.join(", ")
        ),
        ParamType::Boolean => format!("Should {} be yes or no for {}?", label, spec.name),
        _ => format!("What {} should I use for {}?", label, spec.name),
    }
}

/// Explain an unreadable value, then ask for the slot again.
pub fn coercion_failed(spec: &CommandSpec, err: &ExtractionError) -> String {
    match err {
        ExtractionError::TypeCoercionFailed {
            param,
            expected,
            raw,
        } => format!(
            "I couldn't read '{}' as {}. {}",
            raw,
            expected,
            ask_for(spec, param)
        ),
        other => match other.param() {
            Some(param) => ask_for(spec, param),
            None => other.to_string(),
        },
    }
}

pub fn extraction_timeout() -> String {
    "That took too long to work out. Please try again.".to_string()
}

pub fn generation_failed() -> String {
    "I couldn't work out the details just now. Please try again.".to_string()
}

pub fn execution_failed(err: &ExecutionError) -> String {
    match err {
        ExecutionError::CommandRaised { command, message } => {
            format!("Sorry, {} failed: {}", command, message)
        }
        ExecutionError::Timeout { command, .. } => {
            format!("{} is taking too long, so I stopped waiting for it.", command)
        }
    }
}

/// Registered commands with their descriptions.
pub fn help(snapshot: &RegistrySnapshot) -> String {
    if snapshot.is_empty() {
        return "No commands are registered.".to_string();
    }
    let mut text = String::from("I can help with:");
    for spec in snapshot {
        text.push_str(&format!("\n  - {}", describe(spec)));
    }
    text
}

pub fn cancelled(command: &str) -> String {
    format!("Okay, cancelled {}.", command)
}

pub fn nothing_to_cancel() -> String {
    "There's nothing to cancel.".to_string()
}

pub fn reset() -> String {
    "Okay, starting over.".to_string()
}

pub fn internal() -> String {
    "Something went wrong on my side, so let's start over.".to_string()
}

fn describe(spec: &CommandSpec) -> String {
    if spec.description.is_empty() {
        spec.signature()
    } else {
        format!("{}: {}", spec.signature(), spec.description)
    }
}
