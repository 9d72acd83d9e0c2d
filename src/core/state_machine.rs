//! Stage tracking for one deployment pipeline invocation
//!
//! The tracker is purely in memory. The downstream release list is the only
//! durable record of progress, so nothing here survives the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment pipeline stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStage {
    Pending,
    AcquireWorkspace,
    ClearWorkspace,
    FetchArtifact,
    PatchManifest,
    OverlayResources,
    Commit,
    Push,
    Publish,
    Completed,
    Failed,
}

impl DeploymentStage {
    /// The eight working stages in execution order
    pub const ORDER: [DeploymentStage; 8] = [
        DeploymentStage::AcquireWorkspace,
        DeploymentStage::ClearWorkspace,
        DeploymentStage::FetchArtifact,
        DeploymentStage::PatchManifest,
        DeploymentStage::OverlayResources,
        DeploymentStage::Commit,
        DeploymentStage::Push,
        DeploymentStage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AcquireWorkspace => "acquire-workspace",
            Self::ClearWorkspace => "clear-workspace",
            Self::FetchArtifact => "fetch-artifact",
            Self::PatchManifest => "patch-manifest",
            Self::OverlayResources => "overlay-resources",
            Self::Commit => "commit",
            Self::Push => "push",
            Self::Publish => "publish",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTransition {
    pub from: DeploymentStage,
    pub to: DeploymentStage,
    pub timestamp: DateTime<Utc>,
}

/// Records the stages one release passed through
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: DeploymentStage,
    last_working: Option<DeploymentStage>,
    transitions: Vec<StageTransition>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: DeploymentStage::Pending,
            last_working: None,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new stage
    pub fn enter(&mut self, to: DeploymentStage) {
        self.transitions.push(StageTransition {
            from: self.current,
            to,
            timestamp: Utc::now(),
        });
        if !to.is_terminal() && to != DeploymentStage::Pending {
            self.last_working = Some(to);
        }
        self.current = to;
    }

    pub fn current(&self) -> DeploymentStage {
        self.current
    }

    /// Last non-terminal stage entered; the stage a failure happened in
    pub fn last_working_stage(&self) -> Option<DeploymentStage> {
        self.last_working
    }

    /// Stages entered so far, in order, excluding terminal markers
    pub fn visited(&self) -> Vec<DeploymentStage> {
        self.transitions
            .iter()
            .map(|t| t.to)
            .filter(|stage| !stage.is_terminal())
            .collect()
    }

    pub fn into_transitions(self) -> Vec<StageTransition> {
        self.transitions
    }

    /// Milliseconds between the first and last transition
    pub fn elapsed_ms(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Transition history as a human-readable string
    pub fn history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                format!(
                    "{}: {} → {}",
                    t.timestamp.to_rfc3339(),
                    t.from.as_str(),
                    t.to.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
