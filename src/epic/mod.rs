//! The epic pipeline: plan-driven decomposition, integration branches,
//! convoy tracking, and stacked-PR submission.

pub mod branch;
pub mod pipeline;
pub mod plan;
pub mod submit;

pub use pipeline::{EpicPipeline, StartOrigin};
pub use plan::{Plan, PlanStep};
pub use submit::{ConflictInfo, PrRequest, PrSubmitter, Vcs};
