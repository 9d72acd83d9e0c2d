//! release-mirror: mirrors an upstream project's releases into a deployable
//! downstream repository, one branch per release stream.

pub mod core;
pub mod orchestration;
pub mod pipeline;
pub mod providers;
pub mod reconcile;
pub mod security;
pub mod telemetry;

pub use crate::core::*;
pub use orchestration::{BranchOrchestrator, MirrorService, RunReport};
pub use pipeline::{DeploymentPipeline, DeploymentReport, PipelineSettings};
pub use reconcile::{Backlog, BacklogBasis, compute_backlog};
pub use security::{CommandError, GitCredentials, SafeCommandExecutor};
