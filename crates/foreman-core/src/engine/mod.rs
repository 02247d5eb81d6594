//! Workflow execution engine: the per-operation state machine and the
//! coordinator composing it across a workflow's lifecycle.

pub mod coordinator;
pub mod executor;

pub use coordinator::Coordinator;
pub use executor::{
    NextAction, PostCommitEffect, StageOutcome, StageResult, TransitionOutcome, WorkflowExecutor,
};
