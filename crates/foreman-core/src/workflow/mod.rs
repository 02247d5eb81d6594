//! Static workflow definitions.
//!
//! A workflow is an ordered list of stages, each naming a target role, an
//! optional applicability condition, veto permission, and a loop-back
//! target with an iteration cap. Definitions are read-only to the engine.

pub mod registry;
pub mod schema;

pub use registry::WorkflowRegistry;
pub use schema::{Stage, StageCondition, StageRole, WorkflowContext, WorkflowDefinition};
