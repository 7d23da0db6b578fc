//! Operator control of the pick worker.
//!
//! - `gate`: the execution gate the worker blocks on at checkpoints
//! - `remote`: operator commands and their sources (dashboard, gamepad, console)

mod gate;
mod remote;

pub use gate::{DEFAULT_POLL_INTERVAL, ExecutionGate, GateState, WaitKind, WaitOutcome};
pub use remote::{
    DashboardControl, JoyButtons, OperatorCommand, parse_operator_line, spawn_command_listener,
};
