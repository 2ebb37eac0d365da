//! Parameter extraction.
//!
//! Fills a command's pending slots from an utterance by asking the text
//! generator for one parameter at a time and coercing each answer to the
//! declared type. Slots that already hold a value are never asked again.

use std::sync::Arc;

use parley_action::CommandSpec;
use parley_core::{ConversationSession, ParamSpec, ParamValue};
use tracing::debug;

use crate::coercion::coerce;
use crate::error::ExtractionError;
use crate::generation::TextGenerator;

/// What one extraction pass did to the session's slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Slots filled on this pass, in schema order.
    pub filled: Vec<String>,
    /// Required slots whose value could not be read as the declared type.
    pub coercion_failures: Vec<ExtractionError>,
    /// Required slots the utterance said nothing about.
    pub missing: Vec<String>,
}

impl ExtractionReport {
    /// Every required slot holds a value.
    pub fn is_complete(&self) -> bool {
        self.coercion_failures.is_empty() && self.missing.is_empty()
    }

    /// The problem to raise with the user next, if any.
    pub fn first_problem(&self) -> Option<ExtractionError> {
        self.coercion_failures.first().cloned().or_else(|| {
            self.missing
                .first()
                .map(|param| ExtractionError::MissingRequiredParameter {
                    param: param.clone(),
                })
        })
    }
}

enum SlotOutcome {
    Filled(ParamValue),
    Absent,
    Unreadable(ExtractionError),
}

pub struct ParameterExtractor {
    generator: Arc<dyn TextGenerator>,
    coercion_retries: u32,
}

impl ParameterExtractor {
    /// `coercion_retries` is how many times the generator is re-asked, with
    /// the failure as a hint, before an unreadable value is reported.
    pub fn new(generator: Arc<dyn TextGenerator>, coercion_retries: u32) -> Self {
        Self {
            generator,
            coercion_retries,
        }
    }

    /// Fill the unset slots of `spec` in `session.pending_slots` from `utterance`.
    ///
    /// Required slots are recorded as `None` while unfilled. Optional slots
    /// are only attempted when `include_optional` is set and are left out
    /// entirely when absent or unreadable, so their defaults apply.
    ///
    /// Only a generator failure is returned as an error; coercion problems
    /// and missing values are reported in the `ExtractionReport`.
    pub async fn extract(
        &self,
        utterance: &str,
        spec: &CommandSpec,
        session: &mut ConversationSession,
        include_optional: bool,
    ) -> Result<ExtractionReport, ExtractionError> {
        let mut report = ExtractionReport::default();

        let mut outcomes = Vec::new();
        for param in spec.required_params() {
            if matches!(session.pending_slots.get(&param.name), Some(Some(_))) {
                continue;
            }
            let outcome = self.extract_slot(utterance, spec, param).await?;
            outcomes.push((param, outcome));
        }

        // The user was asked for one slot: a bare answer is its value, unless
        // the utterance evidently spoke about other slots instead.
        let prompted = session.prompted_slot.as_deref();
        let others_filled = outcomes
            .iter()
            .any(|(p, o)| matches!(o, SlotOutcome::Filled(_)) && Some(p.name.as_str()) != prompted);
        if !others_filled {
            if let Some((param, outcome)) = outcomes
                .iter_mut()
                .find(|(p, _)| Some(p.name.as_str()) == prompted)
            {
                let previous = std::mem::replace(outcome, SlotOutcome::Absent);
                *outcome = Self::bare_answer(utterance, param, previous);
            }
        }

        for (param, outcome) in outcomes {
            let value = match outcome {
                SlotOutcome::Filled(value) => {
                    report.filled.push(param.name.clone());
                    Some(value)
                }
                SlotOutcome::Absent => {
                    report.missing.push(param.name.clone());
                    None
                }
                SlotOutcome::Unreadable(err) => {
                    report.coercion_failures.push(err);
                    None
                }
            };
            session.pending_slots.insert(param.name.clone(), value);
        }

        if include_optional {
            for param in spec.optional_params() {
                if matches!(session.pending_slots.get(&param.name), Some(Some(_))) {
                    continue;
                }
                match self.extract_slot(utterance, spec, param).await? {
                    SlotOutcome::Filled(value) => {
                        report.filled.push(param.name.clone());
                        session.pending_slots.insert(param.name.clone(), Some(value));
                    }
                    SlotOutcome::Absent => {}
                    SlotOutcome::Unreadable(err) => {
                        debug!(command = %spec.name, error = %err, "Optional parameter skipped");
                    }
                }
            }
        }

        debug!(
            command = %spec.name,
            filled = report.filled.len(),
            missing = report.missing.len(),
            unreadable = report.coercion_failures.len(),
            "Extraction pass complete"
        );
        Ok(report)
    }

    async fn extract_slot(
        &self,
        utterance: &str,
        spec: &CommandSpec,
        param: &ParamSpec,
    ) -> Result<SlotOutcome, ExtractionError> {
        let mut hint: Option<ExtractionError> = None;
        let mut attempt = 0;

        loop {
            let prompt = Self::prompt(utterance, spec, param, hint.as_ref());
            let raw = self
                .generator
                .generate(&prompt)
                .await
                .map_err(|e| ExtractionError::GenerationFailed(e.to_string()))?;

            match coerce(&raw, param) {
                Ok(Some(value)) => return Ok(SlotOutcome::Filled(value)),
                Ok(None) => return Ok(SlotOutcome::Absent),
                Err(err) if attempt < self.coercion_retries => {
                    attempt += 1;
                    debug!(param = %param.name, attempt, error = %err, "Retrying extraction");
                    hint = Some(err);
                }
                Err(err) => return Ok(SlotOutcome::Unreadable(err)),
            }
        }
    }

    /// Read the whole utterance as the value of the slot the user was asked for.
    fn bare_answer(utterance: &str, param: &ParamSpec, generated: SlotOutcome) -> SlotOutcome {
        match generated {
            SlotOutcome::Filled(value) => SlotOutcome::Filled(value),
            SlotOutcome::Absent => match coerce(utterance, param) {
                Ok(Some(value)) => SlotOutcome::Filled(value),
                Ok(None) => SlotOutcome::Absent,
                Err(err) => SlotOutcome::Unreadable(err),
            },
            SlotOutcome::Unreadable(err) => match coerce(utterance, param) {
                Ok(Some(value)) => SlotOutcome::Filled(value),
                _ => SlotOutcome::Unreadable(err),
            },
        }
    }

    /// Extraction prompt for one parameter.
    pub fn prompt(
        utterance: &str,
        spec: &CommandSpec,
        param: &ParamSpec,
        hint: Option<&ExtractionError>,
    ) -> String {
        let mut prompt = String::from("Extract the value of one parameter for the command below.\n");
        prompt.push_str(&format!("Command: {}\n", spec.signature()));
        if !spec.description.is_empty() {
            prompt.push_str(&format!("Description: {}\n", spec.description));
        }
        prompt.push_str(&format!("Parameter: {} ({})", param.name, param.param_type));
        if !param.description.is_empty() {
            prompt.push_str(&format!(" - {}", param.description));
        }
        prompt.push('\n');
        prompt.push_str(&format!("Utterance: {}\n", utterance.replace('\n', " ")));
        prompt.push_str("Answer with only the value, or NONE if the utterance does not contain it.");
        if let Some(ExtractionError::TypeCoercionFailed { raw, expected, .. }) = hint {
            prompt.push_str(&format!(
                "\nThe previous answer '{}' could not be read as {}. Answer again.",
                raw, expected
            ));
        }
        prompt
    }
}
