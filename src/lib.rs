// Core modules
pub mod config;
pub mod control;
pub mod error;
pub mod pose;
pub mod queue;
pub mod shelf;
pub mod types;

// Pick sequencing and its collaborators
pub mod benchmark;
pub mod orchestrator;
pub mod services;
pub mod status;

// Re-export key types
pub use config::{FailurePolicy, PickConfig};
pub use control::{ExecutionGate, OperatorCommand, WaitKind, WaitOutcome};
pub use error::{PickError, PickResult};
pub use orchestrator::{OrderOutcome, PickOrchestrator, PickStep, RunSummary, run_queue};
pub use pose::{BoundsCheck, Pose, PoseValidator};
pub use queue::{WorkOrder, WorkOrderQueue};
pub use services::Collaborators;
pub use shelf::{Shelf, ShelfLayout, ShelfSnapshot};
pub use status::{PickEvent, StatusPublisher};
pub use types::{BinName, NamedPose, ProductName};
