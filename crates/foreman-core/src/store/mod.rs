pub mod activity_store;
pub mod agent_store;
pub mod approval_store;
pub mod operation_store;
pub mod session_store;
pub mod work_order_store;

pub use activity_store::ActivityStore;
pub use agent_store::AgentStore;
pub use approval_store::ApprovalStore;
pub use operation_store::OperationStore;
pub use session_store::SessionStore;
pub use work_order_store::WorkOrderStore;
