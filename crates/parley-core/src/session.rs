//! Conversation session model shared by the dispatch engine and the state store.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ParamValue, Timestamp};

/// Version of the persisted session snapshot layout.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Slot-filling resolution state of a session.
///
/// AwaitingIntent -> AwaitingParameters -> ReadyToExecute -> Executed | Failed,
/// with Ambiguous returning to AwaitingIntent carrying candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    #[default]
    AwaitingIntent,
    Ambiguous,
    AwaitingParameters,
    ReadyToExecute,
    Executed,
    Failed,
}

impl ResolutionState {
    /// Executed and Failed end a resolution; the next utterance starts a new one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolutionState::Executed | ResolutionState::Failed)
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionState::AwaitingIntent => write!(f, "awaiting_intent"),
            ResolutionState::Ambiguous => write!(f, "ambiguous"),
            ResolutionState::AwaitingParameters => write!(f, "awaiting_parameters"),
            ResolutionState::ReadyToExecute => write!(f, "ready_to_execute"),
            ResolutionState::Executed => write!(f, "executed"),
            ResolutionState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ResolutionState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_intent" => Ok(ResolutionState::AwaitingIntent),
            "ambiguous" => Ok(ResolutionState::Ambiguous),
            "awaiting_parameters" => Ok(ResolutionState::AwaitingParameters),
            "ready_to_execute" => Ok(ResolutionState::ReadyToExecute),
            "executed" => Ok(ResolutionState::Executed),
            "failed" => Ok(ResolutionState::Failed),
            _ => Err(format!("Unknown resolution state: {}", s)),
        }
    }
}

/// Category of an error recorded on a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    NoMatch,
    AmbiguousMatch,
    EmbeddingUnavailable,
    TypeCoercionFailed,
    MissingRequiredParameter,
    GenerationFailed,
    CommandRaised,
    Timeout,
    StoreUnavailable,
    CorruptSnapshot,
    /// The engine reached an inconsistent state and reset the resolution.
    Internal,
}

impl fmt::Display for TurnErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnErrorKind::NoMatch => "no_match",
            TurnErrorKind::AmbiguousMatch => "ambiguous_match",
            TurnErrorKind::EmbeddingUnavailable => "embedding_unavailable",
            TurnErrorKind::TypeCoercionFailed => "type_coercion_failed",
            TurnErrorKind::MissingRequiredParameter => "missing_required_parameter",
            TurnErrorKind::GenerationFailed => "generation_failed",
            TurnErrorKind::CommandRaised => "command_raised",
            TurnErrorKind::Timeout => "timeout",
            TurnErrorKind::StoreUnavailable => "store_unavailable",
            TurnErrorKind::CorruptSnapshot => "corrupt_snapshot",
            TurnErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Serializable error descriptor attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: TurnErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One request/response exchange within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonic per-session sequence number, starting at 1.
    pub sequence: u64,
    pub utterance: String,
    /// Command the utterance resolved to, if any.
    pub command: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    /// Output of the executed command.
    pub result: Option<String>,
    pub error: Option<TurnError>,
    /// Text returned to the caller.
    #[serde(default)]
    pub response: String,
    pub timestamp: Timestamp,
}

impl Turn {
    pub fn new(sequence: u64, utterance: impl Into<String>) -> Self {
        Self {
            sequence,
            utterance: utterance.into(),
            command: None,
            parameters: BTreeMap::new(),
            result: None,
            error: None,
            response: String::new(),
            timestamp: Timestamp::now(),
        }
    }
}

/// Per-session conversational state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    /// Bounded history, oldest first.
    #[serde(default)]
    pub turns: VecDeque<Turn>,
    #[serde(default)]
    pub state: ResolutionState,
    /// Command whose slots are being filled.
    #[serde(default)]
    pub pending_command: Option<String>,
    /// Slot name -> extracted value, or `None` while still unfilled.
    #[serde(default)]
    pub pending_slots: BTreeMap<String, Option<ParamValue>>,
    /// Disambiguation candidates offered on the previous turn, best first.
    #[serde(default)]
    pub candidates: Vec<String>,
    /// Utterance that produced `candidates`; a numbered pick re-reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambiguous_utterance: Option<String>,
    /// Slot the user was last asked for.
    #[serde(default)]
    pub prompted_slot: Option<String>,
    /// Sequence number the next turn will receive.
    #[serde(default = "first_sequence")]
    pub next_sequence: u64,
    pub last_active: Timestamp,
}

fn first_sequence() -> u64 {
    1
}

impl ConversationSession {
    /// A fresh session in `AwaitingIntent` with no history.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: VecDeque::new(),
            state: ResolutionState::AwaitingIntent,
            pending_command: None,
            pending_slots: BTreeMap::new(),
            candidates: Vec::new(),
            ambiguous_utterance: None,
            prompted_slot: None,
            next_sequence: first_sequence(),
            last_active: Timestamp::now(),
        }
    }

    /// Reserve the next turn sequence number.
    pub fn allocate_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Append a turn, dropping the oldest turns beyond `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push_back(turn);
        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Timestamp::now();
    }

    /// Whether the session has been idle for longer than `ttl_secs` at `now`.
    pub fn is_expired(&self, ttl_secs: u64, now: Timestamp) -> bool {
        self.last_active.elapsed_secs(now) > ttl_secs
    }

    /// Drop any in-progress resolution and return to `AwaitingIntent`.
    pub fn clear_resolution(&mut self) {
        self.state = ResolutionState::AwaitingIntent;
        self.pending_command = None;
        self.pending_slots.clear();
        self.candidates.clear();
        self.ambiguous_utterance = None;
        self.prompted_slot = None;
    }

    /// Slots that currently hold a value.
    pub fn filled_slots(&self) -> BTreeMap<String, ParamValue> {
        self.pending_slots
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Names of slots still waiting for a value, in map order.
    pub fn unfilled_slots(&self) -> Vec<String> {
        self.pending_slots
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.back()
    }
}
