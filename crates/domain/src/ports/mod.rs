pub mod analysis_service;
pub mod task_queue;

pub use analysis_service::*;
pub use task_queue::*;
