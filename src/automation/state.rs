use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// States of one attendance automation run.
///
/// A run flows through: INIT → DRIVER_READY → NAVIGATED → LOGGED_IN → CONFIRMED → CAPTURED,
/// or ends in FAILED from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Init,
    DriverReady,
    Navigated,
    LoggedIn,
    Confirmed,
    Captured,
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Captured | State::Failed)
    }

    fn successor(self) -> Option<State> {
        match self {
            State::Init => Some(State::DriverReady),
            State::DriverReady => Some(State::Navigated),
            State::Navigated => Some(State::LoggedIn),
            State::LoggedIn => Some(State::Confirmed),
            State::Confirmed => Some(State::Captured),
            State::Captured | State::Failed => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => write!(f, "INIT"),
            State::DriverReady => write!(f, "DRIVER_READY"),
            State::Navigated => write!(f, "NAVIGATED"),
            State::LoggedIn => write!(f, "LOGGED_IN"),
            State::Confirmed => write!(f, "CONFIRMED"),
            State::Captured => write!(f, "CAPTURED"),
            State::Failed => write!(f, "FAILED"),
        }
    }
}

/// The result of executing one automation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure(ErrorClass),
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Advance to the next state.
    Next(State),
    /// The step failed; the run is now `Failed`.
    Failed { from: State, class: ErrorClass },
    /// The run was already terminal; nothing changed.
    Terminal(State),
}

/// Progress of a single run: current state plus the states it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Run {
    pub state: State,
    pub history: Vec<State>,
    pub failure: Option<ErrorClass>,
}

impl Run {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state visited so far, including the current one.
    pub fn transitions(&self) -> Vec<State> {
        let mut states = self.history.clone();
        states.push(self.state);
        states
    }
}

/// Drives a [`Run`] through the automation states.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next transition for `run` given the outcome of
    /// the step executed in its current state.
    ///
    /// Terminal states absorb every outcome.
    pub fn next(run: &mut Run, outcome: StepOutcome) -> Transition {
        if run.state.is_terminal() {
            return Transition::Terminal(run.state);
        }

        let transition = match (outcome, run.state.successor()) {
            (StepOutcome::Success, Some(next)) => Transition::Next(next),
            (StepOutcome::Failure(class), _) => Transition::Failed {
                from: run.state,
                class,
            },
            (StepOutcome::Success, None) => Transition::Terminal(run.state),
        };

        match transition {
            Transition::Next(next) => {
                run.history.push(run.state);
                run.state = next;
            }
            Transition::Failed { class, .. } => {
                run.history.push(run.state);
                run.state = State::Failed;
                run.failure = Some(class);
            }
            Transition::Terminal(_) => {}
        }

        transition
    }
}
