//! Reply phrasing after a successful command.
//!
//! A `ResponseGenerator` turns a finished invocation into the text the user
//! sees. The engine holds a default generator plus optional per-command
//! overrides; whenever phrasing fails or comes back empty the command's own
//! output text is used instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_action::{CommandOutput, CommandSpec};
use parley_core::{ParamValue, ParleyError};

use crate::generation::TextGenerator;

/// Everything known about a command that just ran successfully.
#[derive(Debug, Clone, Copy)]
pub struct CompletedCommand<'a> {
    pub spec: &'a CommandSpec,
    /// Utterance of the turn on which the command ran.
    pub utterance: &'a str,
    pub arguments: &'a BTreeMap<String, ParamValue>,
    pub output: &'a CommandOutput,
}

/// Phrases the user-facing reply for a completed command.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn respond(&self, completed: &CompletedCommand<'_>) -> Result<String, ParleyError>;
}

/// Replies with the command's output text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResponder;

#[async_trait]
impl ResponseGenerator for PassthroughResponder {
    async fn respond(&self, completed: &CompletedCommand<'_>) -> Result<String, ParleyError> {
        Ok(completed.output.text.clone())
    }
}

/// Asks a `TextGenerator` to summarize the result for the user.
pub struct GeneratedResponder {
    generator: Arc<dyn TextGenerator>,
    instructions: Option<String>,
}

impl GeneratedResponder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            instructions: None,
        }
    }

    /// Extra guidance appended to every prompt, e.g. what to emphasize.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn prompt(&self, completed: &CompletedCommand<'_>) -> String {
        let arguments = if completed.arguments.is_empty() {
            "none".to_string()
        } else {
            completed
                .arguments
                .iter()
                .map(|(name, value)| format!("{} = {}", name, value))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut prompt = String::from("Summarize the result of a command for the user.\n");
        prompt.push_str(&format!("Command: {}\n", completed.spec.signature()));
        prompt.push_str(&format!("Request: {}\n", completed.utterance.replace('\n', " ")));
        prompt.push_str(&format!("Arguments: {}\n", arguments));
        prompt.push_str(&format!("Result: {}\n", completed.output.text));
        if let Some(ref instructions) = self.instructions {
            prompt.push_str(instructions);
            prompt.push('\n');
        }
        prompt.push_str("Answer in one or two short sentences.");
        prompt
    }
}

#[async_trait]
impl ResponseGenerator for GeneratedResponder {
    async fn respond(&self, completed: &CompletedCommand<'_>) -> Result<String, ParleyError> {
        let answer = self.generator.generate(&self.prompt(completed)).await?;
        Ok(answer.trim().to_string())
    }
}
