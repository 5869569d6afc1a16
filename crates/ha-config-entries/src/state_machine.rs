//! Config entry lifecycle
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress
//!                            ↘ SetupRetry → SetupInProgress (scheduled)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use crate::entry::ConfigEntryState;
use rand::Rng;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Validate a transition to `to`
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded | SetupError | SetupRetry | MigrationError)
                | (SetupError | SetupRetry, SetupInProgress | UnloadInProgress)
                | (Loaded, UnloadInProgress)
                | (UnloadInProgress, NotLoaded | FailedUnload)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
        use ConfigEntryState::*;

        match (from, to) {
            (MigrationError, _) => "MigrationError is terminal",
            (FailedUnload, _) => "FailedUnload is terminal",
            (SetupInProgress, _) => "Setup in progress",
            (UnloadInProgress, _) => "Unload in progress",
            (NotLoaded, _) => "Not loaded, setup must run first",
            (Loaded, SetupInProgress) => "Already loaded, unload first",
            (Loaded, _) => "Loaded entries must be unloaded first",
            _ => "Invalid state transition",
        }
    }
}

/// Delay before retrying a setup that was not ready
///
/// `5 × 2^min(tries, 4)` seconds plus up to 100 ms of jitter:
/// 5s, 10s, 20s, 40s, then 80s for every later attempt.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base = Duration::from_secs(5 * 2_u64.pow(tries.min(4)));
    let jitter = Duration::from_micros(rand::thread_rng().gen_range(50_000..=100_000));
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    #[test]
    fn test_setup_transitions() {
        assert!(NotLoaded.can_transition_to(SetupInProgress));
        for result in [Loaded, SetupError, SetupRetry, MigrationError] {
            assert!(SetupInProgress.can_transition_to(result), "{result:?}");
        }
        assert!(SetupRetry.can_transition_to(SetupInProgress));
        assert!(SetupError.can_transition_to(SetupInProgress));
    }

    #[test]
    fn test_unload_transitions() {
        for from in [Loaded, SetupError, SetupRetry] {
            assert!(from.can_transition_to(UnloadInProgress), "{from:?}");
        }
        assert!(UnloadInProgress.can_transition_to(NotLoaded));
        assert!(UnloadInProgress.can_transition_to(FailedUnload));
    }

    #[test]
    fn test_shortcuts_rejected() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        assert_eq!((err.from, err.to), (NotLoaded, Loaded));

        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!SetupInProgress.can_transition_to(NotLoaded));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
        assert!(!NotLoaded.can_transition_to(UnloadInProgress));
    }

    #[test]
    fn test_terminal_states() {
        for to in [NotLoaded, SetupInProgress, Loaded, UnloadInProgress] {
            assert!(!MigrationError.can_transition_to(to));
            assert!(!FailedUnload.can_transition_to(to));
        }
        let err = FailedUnload.try_transition(NotLoaded).unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_retry_delay_backoff() {
        let expected = [5, 10, 20, 40, 80, 80, 80];
        for (tries, secs) in expected.into_iter().enumerate() {
            let delay = calculate_retry_delay(tries as u32);
            assert!(delay > Duration::from_secs(secs), "tries={tries}");
            assert!(delay <= Duration::from_millis(secs * 1000 + 100), "tries={tries}");
        }
    }

    #[test]
    fn test_retry_path() {
        let state = NotLoaded
            .try_transition(SetupInProgress)
            .and_then(|s| s.try_transition(SetupRetry))
            .and_then(|s| s.try_transition(SetupInProgress))
            .and_then(|s| s.try_transition(Loaded))
            .unwrap();
        assert_eq!(state, Loaded);
    }
}
