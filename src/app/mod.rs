pub mod coordinator;
pub mod operations;

pub use coordinator::{Coordinator, Operation, PollEvent, Status};
pub use operations::{AssembleOperation, AssembleRequest, ScanOperation, ScanRequest};
