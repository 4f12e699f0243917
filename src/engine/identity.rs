//! Identity types for the caseflow engine.
//!
//! CaseId identifies one end-to-end pipeline execution; TaskId identifies a
//! logical task invocation within a case; Seq is the monotonically increasing
//! event sequence number per case.

/// Identifies one case (one end-to-end pipeline execution).
pub type CaseId = String;

/// Identifies a logical task invocation within a case. In the fixed pipeline
/// this is the task name: one logical invocation per task per case.
pub type TaskId = String;

/// Monotonically increasing event sequence number per case.
pub type Seq = u64;
