//! Meta commands recognized before any intent matching.

/// Conversation-level commands that are never dispatched to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    /// Abandon the in-progress resolution.
    Cancel,
    /// Abandon the resolution and forget pending candidates.
    Reset,
    /// List the registered commands.
    Help,
}

impl MetaCommand {
    /// Detect a meta command. The whole utterance must be the command word.
    pub fn detect(utterance: &str) -> Option<Self> {
        let normalized = utterance
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .trim()
            .to_lowercase();
        match normalized.as_str() {
            "cancel" | "never mind" | "nevermind" | "stop" | "abort" => Some(MetaCommand::Cancel),
            "reset" | "start over" => Some(MetaCommand::Reset),
            "help" | "/help" => Some(MetaCommand::Help),
            _ => None,
        }
    }
}
