//! Loan underwriting on top of the case engine: the fixed pipeline, its
//! payload types, and deterministic stand-ins for the external collaborators.

pub mod model;
pub mod pipeline;
pub mod tasks;

pub use model::{LoanApplication, ReviewDecision};
pub use pipeline::{UnderwritingPipeline, SIGNAL_DECISION};
pub use tasks::HeuristicTaskExecutor;
