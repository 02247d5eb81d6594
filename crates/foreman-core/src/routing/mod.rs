//! Work-order routing: specialty classification, agent availability and
//! candidate scoring.

pub mod availability;
pub mod classifier;
pub mod scorer;

pub use availability::{AgentAvailability, AgentIndex, AvailabilitySnapshot};
pub use classifier::{classify, Specialty};
pub use scorer::{select_agent, select_oversight, RoleProfile};
