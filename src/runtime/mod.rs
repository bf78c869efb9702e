pub mod correlation;
pub mod offload;
pub mod registry;
pub mod task;
