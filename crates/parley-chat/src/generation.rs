//! Text generation capability used for parameter extraction.
//!
//! The engine only needs "prompt in, text out". `HeuristicGenerator` answers
//! extraction prompts locally with pattern rules so the system runs without
//! a model; any LLM client can be plugged in behind the same trait.

use std::sync::LazyLock;

use async_trait::async_trait;
use parley_core::ParleyError;
use regex::Regex;

/// Generates a completion for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ParleyError>;
}

/// Answer returned when the utterance holds no value for the parameter.
pub const NO_VALUE: &str = "NONE";

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("Invalid number regex"));

static PLACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:in|for|at)\s+").expect("Invalid place regex"));

static PURPOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bto\s+(.+?)(?:\s+(?:in|at|for|on)\s+|[.?!]*$)").expect("Invalid purpose regex")
});

const PLACE_PARAMS: &[&str] = &["location", "city", "place", "where", "destination", "town"];
const YES_WORDS: &[&str] = &["yes", "yeah", "yep", "true", "enable", "enabled"];
const NO_WORDS: &[&str] = &["no", "nope", "false", "disable", "disabled"];

// =============================================================================
// Prompt parsing
// =============================================================================

/// The fields of an extraction prompt the heuristics read.
#[derive(Debug, PartialEq)]
struct ExtractionPrompt<'a> {
    signature: &'a str,
    param: &'a str,
    param_type: &'a str,
    utterance: &'a str,
}

impl<'a> ExtractionPrompt<'a> {
    fn parse(prompt: &'a str) -> Option<Self> {
        let mut signature = None;
        let mut parameter = None;
        let mut utterance = None;
        for line in prompt.lines() {
            if let Some(rest) = line.strip_prefix("Command: ") {
                signature = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("Parameter: ") {
                parameter = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("Utterance: ") {
                utterance = Some(rest.trim());
            }
        }

        // "name (type) - description"; types never contain ')'.
        let parameter = parameter?;
        let open = parameter.find('(')?;
        let close = open + parameter[open..].find(')')?;
        Some(Self {
            signature: signature?,
            param: parameter[..open].trim(),
            param_type: parameter[open + 1..close].trim(),
            utterance: utterance?,
        })
    }
}

/// `(name, type)` pairs from `cmd(a: float, p?: one of [x, y] = x)`.
fn signature_params(signature: &str) -> Vec<(&str, &str)> {
    let (Some(open), Some(close)) = (signature.find('('), signature.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let inner = &signature[open + 1..close];

    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&inner[start..]);

    pieces
        .into_iter()
        .filter_map(|piece| {
            let (name, ty) = piece.split_once(':')?;
            let ty = ty.split(" = ").next().unwrap_or(ty);
            Some((name.trim().trim_end_matches('?'), ty.trim()))
        })
        .collect()
}

fn enum_variants(param_type: &str) -> Vec<&str> {
    param_type
        .strip_prefix("one of [")
        .and_then(|s| s.strip_suffix(']'))
        .map(|s| s.split(", ").map(str::trim).collect())
        .unwrap_or_default()
}

fn is_numeric(param_type: &str) -> bool {
    param_type == "integer" || param_type == "float"
}

fn trim_value(s: &str) -> &str {
    s.trim().trim_end_matches(['.', '?', '!', ',']).trim()
}

// =============================================================================
// HeuristicGenerator
// =============================================================================

/// Rule-based local generator for extraction prompts.
///
/// - `name = value`, `name: value` or `name is value` answers directly.
/// - Numbers are assigned to numeric parameters in signature order.
/// - Place-like strings take the text after the last `in`/`for`/`at`.
/// - Other strings take the text after `to`, up to a trailing clause.
/// - Enums and booleans take a single variant or yes/no word.
///
/// Anything else answers `NONE`.
#[derive(Debug, Clone, Default)]
pub struct HeuristicGenerator;

impl HeuristicGenerator {
    pub fn new() -> Self {
        Self
    }

    fn answer(prompt: &ExtractionPrompt<'_>) -> Option<String> {
        let params = signature_params(prompt.signature);

        if let Some(value) = Self::explicit(prompt.utterance, prompt.param, prompt.param_type) {
            return Some(value);
        }
        // Once the user names any parameter, only named answers count.
        let names_any = params
            .iter()
            .any(|(name, ty)| Self::explicit(prompt.utterance, name, ty).is_some());
        if names_any {
            return None;
        }

        match prompt.param_type {
            ty if is_numeric(ty) => {
                let position = params
                    .iter()
                    .filter(|(_, ty)| is_numeric(ty))
                    .position(|(name, _)| *name == prompt.param)?;
                NUMBER_RE
                    .find_iter(prompt.utterance)
                    .nth(position)
                    .map(|m| m.as_str().to_string())
            }
            "boolean" => Self::yes_no(prompt.utterance),
            "string" => Self::text(prompt.param, prompt.utterance),
            ty => Self::variant(prompt.utterance, &enum_variants(ty)),
        }
    }

    fn explicit(utterance: &str, param: &str, param_type: &str) -> Option<String> {
        let value = if param_type == "string" {
            r"([^,;]+)"
        } else {
            r"([^\s,;]+)"
        };
        let pattern = format!(
            r"(?i)\b{}\s*(?:=|:|\bis\b)\s*{}",
            regex::escape(param),
            value
        );
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(utterance)?;
        let value = trim_value(caps.get(1)?.as_str());
        (!value.is_empty()).then(|| value.to_string())
    }

    fn text(param: &str, utterance: &str) -> Option<String> {
        let value = if PLACE_PARAMS.contains(&param.to_lowercase().as_str()) {
            let last = PLACE_RE.find_iter(utterance).last()?;
            trim_value(&utterance[last.end()..])
        } else {
            trim_value(PURPOSE_RE.captures(utterance)?.get(1)?.as_str())
        };
        (!value.is_empty()).then(|| value.to_string())
    }

    fn yes_no(utterance: &str) -> Option<String> {
        let lower = utterance.to_lowercase();
        let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).collect();
        let yes = words.iter().any(|w| YES_WORDS.contains(w));
        let no = words.iter().any(|w| NO_WORDS.contains(w));
        match (yes, no) {
            (true, false) => Some("yes".into()),
            (false, true) => Some("no".into()),
            _ => None,
        }
    }

    fn variant(utterance: &str, variants: &[&str]) -> Option<String> {
        let lower = utterance.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .collect();
        let mut mentioned = variants
            .iter()
            .filter(|v| words.contains(&v.to_lowercase().as_str()));
        match (mentioned.next(), mentioned.next()) {
            (Some(v), None) => Some(v.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl TextGenerator for HeuristicGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ParleyError> {
        let parsed = ExtractionPrompt::parse(prompt).ok_or_else(|| {
            ParleyError::Generation("prompt is not a parameter extraction request".into())
        })?;
        Ok(Self::answer(&parsed).unwrap_or_else(|| NO_VALUE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(signature: &str, param: &str, ty: &str, utterance: &str) -> String {
        format!(
            "Extract the value of one parameter for the command below.\n\
             Command: {signature}\n\
             Description: test\n\
             Parameter: {param} ({ty}) - a value\n\
             Utterance: {utterance}\n\
             Answer with only the value, or NONE if the utterance does not contain it."
        )
    }

    async fn ask(signature: &str, param: &str, ty: &str, utterance: &str) -> String {
        HeuristicGenerator::new()
            .generate(&prompt(signature, param, ty, utterance))
            .await
            .unwrap()
    }

    const REMINDER: &str =
        "set_reminder(message: string, minutes: integer, priority?: one of [low, normal, high] = normal)";

    // ---- prompt parsing ----

    #[test]
    fn test_parse_prompt() {
        let text = prompt(REMINDER, "priority", "one of [low, normal, high]", "soon");
        let parsed = ExtractionPrompt::parse(&text).unwrap();
        assert_eq!(parsed.param, "priority");
        assert_eq!(parsed.param_type, "one of [low, normal, high]");
        assert_eq!(parsed.utterance, "soon");
        assert_eq!(parsed.signature, REMINDER);
    }

    #[test]
    fn test_signature_params_respects_brackets() {
        assert_eq!(
            signature_params(REMINDER),
            vec![
                ("message", "string"),
                ("minutes", "integer"),
                ("priority", "one of [low, normal, high]"),
            ]
        );
        assert!(signature_params("ping()").is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unrelated_prompt() {
        assert!(HeuristicGenerator::new().generate("hello").await.is_err());
    }

    // ---- answers ----

    #[tokio::test]
    async fn test_location_after_preposition() {
        let sig = "get_weather(location: string)";
        assert_eq!(
            ask(sig, "location", "string", "what's the weather in Paris?").await,
            "Paris"
        );
        assert_eq!(ask(sig, "location", "string", "what's the weather?").await, "NONE");
    }

    #[tokio::test]
    async fn test_numbers_follow_signature_order() {
        let sig = "add(a: float, b: float)";
        assert_eq!(ask(sig, "a", "float", "add 2 and 3.5").await, "2");
        assert_eq!(ask(sig, "b", "float", "add 2 and 3.5").await, "3.5");
        assert_eq!(ask(sig, "b", "float", "add 2").await, "NONE");
    }

    #[tokio::test]
    async fn test_named_answers_take_precedence() {
        let sig = "add(a: float, b: float)";
        assert_eq!(ask(sig, "b", "float", "b is 4").await, "4");
        assert_eq!(ask(sig, "a", "float", "b is 4").await, "NONE");
        assert_eq!(ask(sig, "a", "float", "a=7, b=1").await, "7");
    }

    #[tokio::test]
    async fn test_reminder_fields() {
        let utterance = "remind me to call mom in 10 minutes, high priority";
        assert_eq!(ask(REMINDER, "message", "string", utterance).await, "call mom");
        assert_eq!(ask(REMINDER, "minutes", "integer", utterance).await, "10");
        assert_eq!(
            ask(REMINDER, "priority", "one of [low, normal, high]", utterance).await,
            "high"
        );
        assert_eq!(
            ask(REMINDER, "priority", "one of [low, normal, high]", "remind me").await,
            "NONE"
        );
    }

    #[tokio::test]
    async fn test_boolean_words() {
        let sig = "toggle(enabled: boolean)";
        assert_eq!(ask(sig, "enabled", "boolean", "yes please").await, "yes");
        assert_eq!(ask(sig, "enabled", "boolean", "no").await, "no");
        assert_eq!(ask(sig, "enabled", "boolean", "whatever").await, "NONE");
    }
}
