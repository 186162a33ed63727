pub mod order;

pub use order::{AcquisitionMode, ApprovalStatus, OrderStatus};
