//! `package.json` patching
//!
//! The document is held as an ordered JSON map so keys keep their position
//! and fields this crate does not know about survive untouched. Only the
//! `dependencies` and `engines` objects are read through a typed view.

use crate::core::config::ManifestPatch;
use crate::core::error::PipelineError;
use semver::{Comparator, Op, Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

pub const MANIFEST_FILENAME: &str = "package.json";

/// The parts of a manifest the patch touches
#[derive(Debug, Default, Deserialize)]
struct ManifestView {
    #[serde(default)]
    dependencies: Option<Map<String, Value>>,
    #[serde(default)]
    engines: Option<Map<String, Value>>,
}

/// What [`PackageManifest::apply`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineChange {
    pub key: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    document: Map<String, Value>,
}

impl PackageManifest {
    pub fn parse(content: &str) -> Result<Self, PipelineError> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(document)) => Ok(Self { document }),
            Ok(_) => Err(PipelineError::ManifestMalformed(
                "top-level value is not an object".to_string(),
            )),
            Err(e) => Err(PipelineError::ManifestMalformed(e.to_string())),
        }
    }

    pub async fn load(workspace: &Path) -> Result<Self, PipelineError> {
        let path = workspace.join(MANIFEST_FILENAME);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|_| PipelineError::ManifestMissing(path.display().to_string()))?;
        Self::parse(&content)
    }

    pub async fn save(&self, workspace: &Path) -> Result<(), PipelineError> {
        let path = workspace.join(MANIFEST_FILENAME);
        fs::write(&path, self.render()?)
            .await
            .map_err(|e| PipelineError::ManifestMalformed(format!("{}: {}", path.display(), e)))
    }

    /// Two-space pretty JSON with a trailing newline
    pub fn render(&self) -> Result<String, PipelineError> {
        let mut rendered = serde_json::to_string_pretty(&self.document)
            .map_err(|e| PipelineError::ManifestMalformed(e.to_string()))?;
        rendered.push('\n');
        Ok(rendered)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    fn view(&self) -> Result<ManifestView, PipelineError> {
        ManifestView::deserialize(&Value::Object(self.document.clone()))
            .map_err(|e| PipelineError::ManifestMalformed(e.to_string()))
    }

    pub fn apply(&mut self, patch: &ManifestPatch) -> Result<ManifestChanges, PipelineError> {
        let view = self.view()?;
        let mut changes = ManifestChanges::default();

        if let Some(pin) = &patch.dependency {
            let mut dependencies = view.dependencies.unwrap_or_default();
            dependencies.insert(pin.name.clone(), Value::String(pin.version.clone()));
            self.document
                .insert("dependencies".to_string(), Value::Object(dependencies));
            changes.dependency = Some(format!("{}@{}", pin.name, pin.version));
        }

        if let Some(key) = &patch.engine {
            let mut engines = view.engines.unwrap_or_default();
            match engines.get(key) {
                Some(Value::String(range)) => {
                    let normalized = normalize_engine_range(range)?;
                    if normalized != *range {
                        changes.engine = Some(EngineChange {
                            key: key.clone(),
                            from: range.clone(),
                            to: normalized.clone(),
                        });
                        engines.insert(key.clone(), Value::String(normalized));
                        self.document
                            .insert("engines".to_string(), Value::Object(engines));
                    }
                }
                Some(other) => {
                    return Err(PipelineError::ManifestMalformed(format!(
                        "engines.{} is not a string: {}",
                        key, other
                    )));
                }
                None => debug!(engine = %key, "no engine range to normalize"),
            }
        }

        Ok(changes)
    }
}

/// Load, patch and rewrite the workspace manifest
pub async fn patch_manifest(
    workspace: &Path,
    patch: &ManifestPatch,
) -> Result<ManifestChanges, PipelineError> {
    let mut manifest = PackageManifest::load(workspace).await?;
    let changes = manifest.apply(patch)?;
    manifest.save(workspace).await?;

    info!(
        dependency = changes.dependency.as_deref().unwrap_or("-"),
        engine = changes.engine.as_ref().map(|c| c.to.as_str()).unwrap_or("-"),
        "manifest patched"
    );
    Ok(changes)
}

/// Keep the `||` alternative with the highest minimum version.
///
/// A single alternative is returned unchanged.
pub fn normalize_engine_range(range: &str) -> Result<String, PipelineError> {
    let invalid = |message: String| PipelineError::InvalidEngineRange {
        range: range.to_string(),
        message,
    };

    let alternatives: Vec<&str> = range.split("||").map(str::trim).collect();
    let mut best: Option<(Version, &str)> = None;

    for alternative in &alternatives {
        if alternative.is_empty() {
            return Err(invalid("empty alternative".to_string()));
        }
        let requirement = parse_requirement(alternative).map_err(invalid)?;
        let floor = minimum_version(&requirement);
        if best.as_ref().is_none_or(|(current, _)| floor > *current) {
            best = Some((floor, alternative));
        }
    }

    if alternatives.len() == 1 {
        return Ok(range.to_string());
    }
    best.map(|(_, alternative)| alternative.to_string())
        .ok_or_else(|| invalid("no alternatives".to_string()))
}

/// Parse a node-style range: space separated comparators or `a - b`
fn parse_requirement(alternative: &str) -> Result<VersionReq, String> {
    let tokens: Vec<&str> = alternative.split_whitespace().collect();

    let normalized = if tokens.len() == 3 && tokens[1] == "-" {
        format!(">={}, <={}", tokens[0], tokens[2])
    } else {
        let mut comparators: Vec<String> = Vec::new();
        let mut pending_operator = String::new();
        for token in tokens {
            if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
                pending_operator.push_str(token);
            } else {
                comparators.push(format!("{}{}", std::mem::take(&mut pending_operator), token));
            }
        }
        if !pending_operator.is_empty() {
            return Err(format!("dangling operator '{}'", pending_operator));
        }
        comparators.join(", ")
    };

    VersionReq::parse(&normalized).map_err(|e| e.to_string())
}

/// Lowest version a requirement can match
fn minimum_version(requirement: &VersionReq) -> Version {
    requirement
        .comparators
        .iter()
        .map(comparator_floor)
        .max()
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

fn comparator_floor(comparator: &Comparator) -> Version {
    let major = comparator.major;
    let minor = comparator.minor.unwrap_or(0);
    let patch = comparator.patch.unwrap_or(0);

    match comparator.op {
        Op::Less | Op::LessEq => Version::new(0, 0, 0),
        Op::Greater => match (comparator.minor, comparator.patch) {
            (Some(_), Some(_)) => Version::new(major, minor, patch.saturating_add(1)),
            (Some(_), None) => Version::new(major, minor.saturating_add(1), 0),
            _ => Version::new(major.saturating_add(1), 0, 0),
        },
        _ => Version::new(major, minor, patch),
    }
}
