//! Pipeline orchestration: stage order, status tracking, execution and the
//! async service wrapper.

pub mod orchestrator;
pub mod service;
pub mod stage;
pub mod status;

pub use orchestrator::Orchestrator;
pub use service::PipelineService;
pub use stage::StageId;
pub use status::{PipelineState, PipelineStatus, StatusReader, StatusTracker};
