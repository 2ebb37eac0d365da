//! Slot-filling state machine with validated transitions.
//!
//! AwaitingIntent -> AwaitingParameters -> ReadyToExecute -> Executed/Failed
//! AwaitingParameters -> AwaitingParameters (until required slots are filled)
//! AwaitingIntent -> Ambiguous -> AwaitingIntent (candidates carried over)

use parley_core::ResolutionState;

use crate::error::InvalidTransition;

/// Validate that a resolution state change is allowed.
///
/// Valid transitions:
/// - AwaitingIntent -> AwaitingParameters
/// - AwaitingIntent -> Ambiguous
/// - Ambiguous -> AwaitingIntent
/// - AwaitingParameters -> AwaitingParameters
/// - AwaitingParameters -> ReadyToExecute
/// - AwaitingParameters -> AwaitingIntent (cancelled)
/// - ReadyToExecute -> Executed
/// - ReadyToExecute -> Failed
/// - Executed -> AwaitingIntent
/// - Failed -> AwaitingIntent
pub fn validate_transition(
    from: ResolutionState,
    to: ResolutionState,
) -> Result<(), InvalidTransition> {
    use ResolutionState::*;

    let valid = matches!(
        (from, to),
        (AwaitingIntent, AwaitingParameters)
            | (AwaitingIntent, Ambiguous)
            | (Ambiguous, AwaitingIntent)
            | (AwaitingParameters, AwaitingParameters)
            | (AwaitingParameters, ReadyToExecute)
            | (AwaitingParameters, AwaitingIntent)
            | (ReadyToExecute, Executed)
            | (ReadyToExecute, Failed)
            | (Executed, AwaitingIntent)
            | (Failed, AwaitingIntent)
    );

    if valid {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResolutionState::*;

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_happy_path() {
        assert!(validate_transition(AwaitingIntent, AwaitingParameters).is_ok());
        assert!(validate_transition(AwaitingParameters, ReadyToExecute).is_ok());
        assert!(validate_transition(ReadyToExecute, Executed).is_ok());
        assert!(validate_transition(Executed, AwaitingIntent).is_ok());
    }

    #[test]
    fn test_parameters_self_loop() {
        assert!(validate_transition(AwaitingParameters, AwaitingParameters).is_ok());
    }

    #[test]
    fn test_ambiguous_round_trip() {
        assert!(validate_transition(AwaitingIntent, Ambiguous).is_ok());
        assert!(validate_transition(Ambiguous, AwaitingIntent).is_ok());
    }

    #[test]
    fn test_failure_path() {
        assert!(validate_transition(ReadyToExecute, Failed).is_ok());
        assert!(validate_transition(Failed, AwaitingIntent).is_ok());
    }

    #[test]
    fn test_cancel_while_filling() {
        assert!(validate_transition(AwaitingParameters, AwaitingIntent).is_ok());
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_cannot_skip_slot_filling() {
        assert!(validate_transition(AwaitingIntent, ReadyToExecute).is_err());
        assert!(validate_transition(AwaitingIntent, Executed).is_err());
    }

    #[test]
    fn test_ambiguous_cannot_execute() {
        assert!(validate_transition(Ambiguous, ReadyToExecute).is_err());
        assert!(validate_transition(Ambiguous, AwaitingParameters).is_err());
    }

    #[test]
    fn test_terminal_states_only_reset() {
        for terminal in [Executed, Failed] {
            for to in [Ambiguous, AwaitingParameters, ReadyToExecute, Executed, Failed] {
                assert!(validate_transition(terminal, to).is_err(), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn test_ready_cannot_go_back() {
        assert!(validate_transition(ReadyToExecute, AwaitingParameters).is_err());
        assert!(validate_transition(ReadyToExecute, AwaitingIntent).is_err());
    }

    #[test]
    fn test_error_carries_states() {
        let err = validate_transition(Executed, ReadyToExecute).unwrap_err();
        assert_eq!(err.from, Executed);
        assert_eq!(err.to, ReadyToExecute);
    }
}
