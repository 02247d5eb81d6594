pub mod activity;
pub mod agent;
pub mod approval;
pub mod operation;
pub mod session;
pub mod work_order;

pub use activity::*;
pub use agent::*;
pub use approval::*;
pub use operation::*;
pub use session::*;
pub use work_order::*;
