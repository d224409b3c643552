// ABOUTME: Update orchestration: type-state container replacement, controller, and recovery.
// ABOUTME: Re-exports the controller surface used by the CLI and integration tests.

mod controller;
mod error;
mod outcome;
mod recovery;
mod replacement;
mod state;
mod strategy;
mod transitions;

pub use controller::{UpdateController, UpdateRequest};
pub use error::{StepFailure, UpdateError};
pub use outcome::{ListenerError, LogOutcome, OutcomeListener, OutcomeRegistry};
pub use recovery::{Observation, Occupant, RecoveryAction, plan_recovery};
pub use replacement::{OPERATION_LABEL, Replacement};
pub use state::{Prepared, Promoted, Renamed, RolledBack, Started};
pub use strategy::UpdateStrategy;
pub use transitions::TransitionResult;
