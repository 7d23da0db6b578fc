//! Error types for pick runs.
//!
//! Cancellation is not represented here: a run interrupted by shutdown
//! reports `OrderOutcome::Cancelled`, never an error.

use std::fmt;

use crate::orchestrator::PickStep;
use crate::types::{BinName, ProductName};

/// Errors that can occur while loading or executing work orders.
#[derive(Debug, Clone)]
pub enum PickError {
    /// A work order references a bin or product that does not exist on the
    /// loaded shelf.
    InvalidOrder {
        bin: BinName,
        product: ProductName,
        reason: String,
    },

    /// The order file or another input document is malformed.
    Input(String),

    /// Configuration is missing or inconsistent.
    Config(String),

    /// A step of the pick sequence failed; the order is aborted.
    StepFailed {
        /// The step that was executing
        step: PickStep,
        /// Human-readable reason reported by the step or its collaborator
        reason: String,
    },

    /// A perceived pose lies outside the bin bounds plus tolerance.
    PoseOutOfTolerance {
        product: ProductName,
        bin: BinName,
        /// Local translation (x, y, z) as reported by perception
        position: [f64; 3],
        tolerance: f64,
    },

    /// Internal error occurred.
    Internal(String),
}

impl fmt::Display for PickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOrder {
                bin,
                product,
                reason,
            } => write!(f, "Invalid work order ({} from {}): {}", product, bin, reason),
            Self::Input(msg) => write!(f, "Invalid input: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::StepFailed { step, reason } => {
                write!(f, "Step {} ({}) failed: {}", step.index(), step.name(), reason)
            }
            Self::PoseOutOfTolerance {
                product,
                bin,
                position,
                tolerance,
            } => write!(
                f,
                "Product {} has a reported pose ({:.3}, {:.3}, {:.3}) outside {} tolerance of {}",
                product, position[0], position[1], position[2], bin, tolerance
            ),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for PickError {}

/// Result type for pick operations.
pub type PickResult<T> = Result<T, PickError>;

impl From<anyhow::Error> for PickError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl PickError {
    /// Build a step failure from any displayable reason.
    pub fn step(step: PickStep, reason: impl fmt::Display) -> Self {
        Self::StepFailed {
            step,
            reason: reason.to_string(),
        }
    }

    /// The step that failed, if this error came from the step machine.
    pub fn failed_step(&self) -> Option<PickStep> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}
