//! Configuration loader for release-mirror
//!
//! Layers, from lowest to highest priority: built-in defaults, the YAML file
//! (with optional `extends`), `MIRROR_*` environment variables, CLI overrides.
//! String fields may reference environment variables as `${NAME}`.

use super::config::*;
use crate::core::error::MirrorError;
use crate::core::traits::{CommitAuthor, RepoIdentity};
use crate::security::GitCredentials;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name looked up in the working directory
pub const CONFIG_FILENAME: &str = "release-mirror.yaml";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Explicit config file; must exist when given
    pub config_path: Option<PathBuf>,

    /// Directory searched for `release-mirror.yaml` when no path is given
    pub working_dir: PathBuf,

    /// CLI overrides (highest priority)
    pub cli_overrides: Option<MirrorConfigFile>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "repository.owner")
    pub field: String,
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, merge, expand, validate and resolve the configuration
    pub async fn load(options: ConfigLoadOptions) -> Result<MirrorConfig, MirrorError> {
        let merged = Self::load_merged(&options).await?;
        let expanded = Self::expand_env_vars(merged, &options.env)?;

        Self::resolve(expanded)
    }

    /// Merge every layer without expanding or validating it.
    ///
    /// For commands that only read a few fields, such as the history file
    /// location, and must work without credentials.
    pub async fn load_merged(
        options: &ConfigLoadOptions,
    ) -> Result<MirrorConfigFile, MirrorError> {
        let mut layers: Vec<MirrorConfigFile> = Vec::new();

        match &options.config_path {
            Some(path) => {
                let file = Self::load_config_file(path).await?.ok_or_else(|| {
                    MirrorError::ConfigError(format!(
                        "config file not found: {}",
                        path.display()
                    ))
                })?;
                layers.push(file);
            }
            None => {
                let default_path = options.working_dir.join(CONFIG_FILENAME);
                if let Some(file) = Self::load_config_file(&default_path).await? {
                    layers.push(file);
                }
            }
        }

        if let Some(env_config) = Self::load_env_config(&options.env)? {
            layers.push(env_config);
        }

        if let Some(cli_config) = &options.cli_overrides {
            layers.push(cli_config.clone());
        }

        Ok(Self::merge_configs(layers))
    }

    /// Load configuration from a YAML file, following `extends`
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Option<MirrorConfigFile>, MirrorError>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            debug!(path = %file_path.display(), "loading config file");

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                MirrorError::ConfigError(format!(
                    "failed to read {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let config: MirrorConfigFile = serde_yaml::from_str(&content).map_err(|e| {
                MirrorError::ConfigError(format!(
                    "failed to parse {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| {
                        MirrorError::ConfigError("invalid config file path".to_string())
                    })?
                    .join(extends_path);

                match Self::load_config_file(&base_path).await? {
                    Some(base_config) => {
                        return Ok(Some(Self::merge_configs(vec![base_config, config])));
                    }
                    None => {
                        return Err(MirrorError::ConfigError(format!(
                            "extended config file not found: {}",
                            base_path.display()
                        )));
                    }
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from `MIRROR_*` environment variables
    fn load_env_config(
        env: &HashMap<String, String>,
    ) -> Result<Option<MirrorConfigFile>, MirrorError> {
        let mut config = MirrorConfigFile::default();
        let mut has_changes = false;
        let get = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();

        if let Some(username) = get("MIRROR_GIT_USERNAME") {
            config.credentials.get_or_insert_with(Default::default).username = Some(username);
            has_changes = true;
        }
        if let Some(password) = get("MIRROR_GIT_PASSWORD") {
            config.credentials.get_or_insert_with(Default::default).password = Some(password);
            has_changes = true;
        }

        if let Some(owner) = get("MIRROR_REPO_OWNER") {
            config.repository.get_or_insert_with(Default::default).owner = Some(owner);
            has_changes = true;
        }
        if let Some(name) = get("MIRROR_REPO_NAME") {
            config.repository.get_or_insert_with(Default::default).name = Some(name);
            has_changes = true;
        }

        if let Some(owner) = get("MIRROR_UPSTREAM_OWNER") {
            config.upstream.get_or_insert_with(Default::default).owner = Some(owner);
            has_changes = true;
        }
        if let Some(name) = get("MIRROR_UPSTREAM_NAME") {
            config.upstream.get_or_insert_with(Default::default).name = Some(name);
            has_changes = true;
        }

        if let Some(name) = get("MIRROR_AUTHOR_NAME") {
            config.author.get_or_insert_with(Default::default).name = Some(name);
            has_changes = true;
        }
        if let Some(email) = get("MIRROR_AUTHOR_EMAIL") {
            config.author.get_or_insert_with(Default::default).email = Some(email);
            has_changes = true;
        }

        if let Some(branches) = get("MIRROR_BRANCHES") {
            config.branches = Some(Self::parse_branches(&branches)?);
            has_changes = true;
        }

        if let Some(dir) = get("MIRROR_RESOURCES_DIR") {
            config.resources_dir = Some(PathBuf::from(dir));
            has_changes = true;
        }
        if let Some(root) = get("MIRROR_WORKSPACE_ROOT") {
            config.workspace.get_or_insert_with(Default::default).root = Some(PathBuf::from(root));
            has_changes = true;
        }
        if let Some(retention) = get("MIRROR_RETENTION") {
            let retention = retention
                .parse::<WorkspaceRetention>()
                .map_err(|e| MirrorError::ConfigError(format!("MIRROR_RETENTION: {}", e)))?;
            config.workspace.get_or_insert_with(Default::default).retention = Some(retention);
            has_changes = true;
        }
        if let Some(url) = get("MIRROR_API_URL") {
            config.api_url = Some(url);
            has_changes = true;
        }
        if let Some(path) = get("MIRROR_HISTORY_FILE") {
            config.history_file = Some(PathBuf::from(path));
            has_changes = true;
        }

        Ok(if has_changes { Some(config) } else { None })
    }

    /// Parse `branch:prefix,branch:prefix`
    pub fn parse_branches(value: &str) -> Result<Vec<BranchTarget>, MirrorError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (branch, prefix) = entry.split_once(':').ok_or_else(|| {
                    MirrorError::ConfigError(format!(
                        "branch entry '{}' must look like branch:prefix",
                        entry
                    ))
                })?;
                Ok(BranchTarget::new(branch.trim(), prefix.trim()))
            })
            .collect()
    }

    /// Merge multiple configurations, later entries winning
    fn merge_configs(configs: Vec<MirrorConfigFile>) -> MirrorConfigFile {
        let mut result = MirrorConfigFile::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target
    fn merge_into(target: &mut MirrorConfigFile, source: MirrorConfigFile) {
        if !source.version.is_empty() {
            target.version = source.version;
        }
        if source.extends.is_some() {
            target.extends = source.extends;
        }

        if let Some(source_credentials) = source.credentials {
            let credentials = target.credentials.get_or_insert_with(Default::default);
            if source_credentials.username.is_some() {
                credentials.username = source_credentials.username;
            }
            if source_credentials.password.is_some() {
                credentials.password = source_credentials.password;
            }
        }

        if let Some(source_repo) = source.repository {
            Self::merge_repo(target.repository.get_or_insert_with(Default::default), source_repo);
        }
        if let Some(source_repo) = source.upstream {
            Self::merge_repo(target.upstream.get_or_insert_with(Default::default), source_repo);
        }

        if let Some(source_author) = source.author {
            let author = target.author.get_or_insert_with(Default::default);
            if source_author.name.is_some() {
                author.name = source_author.name;
            }
            if source_author.email.is_some() {
                author.email = source_author.email;
            }
        }

        // Branch lists replace each other wholesale
        if source.branches.is_some() {
            target.branches = source.branches;
        }

        if let Some(source_manifest) = source.manifest {
            let manifest = target.manifest.get_or_insert_with(Default::default);
            if source_manifest.dependency.is_some() {
                manifest.dependency = source_manifest.dependency;
            }
            if source_manifest.engine.is_some() {
                manifest.engine = source_manifest.engine;
            }
        }

        if source.resources_dir.is_some() {
            target.resources_dir = source.resources_dir;
        }

        if let Some(source_workspace) = source.workspace {
            let workspace = target.workspace.get_or_insert_with(Default::default);
            if source_workspace.root.is_some() {
                workspace.root = source_workspace.root;
            }
            if source_workspace.retention.is_some() {
                workspace.retention = source_workspace.retention;
            }
        }

        if let Some(source_run) = source.run {
            let run = target.run.get_or_insert_with(Default::default);
            if source_run.sequential.is_some() {
                run.sequential = source_run.sequential;
            }
            if source_run.max_concurrency.is_some() {
                run.max_concurrency = source_run.max_concurrency;
            }
            if source_run.lock_file.is_some() {
                run.lock_file = source_run.lock_file;
            }
            if source_run.stale_lock_hours.is_some() {
                run.stale_lock_hours = source_run.stale_lock_hours;
            }
            if source_run.http_timeout_secs.is_some() {
                run.http_timeout_secs = source_run.http_timeout_secs;
            }
        }

        if let Some(source_schedule) = source.schedule {
            let schedule = target.schedule.get_or_insert_with(Default::default);
            if source_schedule.hour.is_some() {
                schedule.hour = source_schedule.hour;
            }
            if source_schedule.minute.is_some() {
                schedule.minute = source_schedule.minute;
            }
            if source_schedule.run_on_startup.is_some() {
                schedule.run_on_startup = source_schedule.run_on_startup;
            }
        }

        if source.api_url.is_some() {
            target.api_url = source.api_url;
        }
        if source.clone_base_url.is_some() {
            target.clone_base_url = source.clone_base_url;
        }
        if source.history_file.is_some() {
            target.history_file = source.history_file;
        }
    }

    fn merge_repo(target: &mut RepoConfig, source: RepoConfig) {
        if source.owner.is_some() {
            target.owner = source.owner;
        }
        if source.name.is_some() {
            target.name = source.name;
        }
    }

    /// Expand `${VAR}` references in the string fields that may carry them
    fn expand_env_vars(
        mut config: MirrorConfigFile,
        env: &HashMap<String, String>,
    ) -> Result<MirrorConfigFile, MirrorError> {
        let pattern = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| MirrorError::ConfigError(format!("invalid env pattern: {}", e)))?;
        let expand = |value: &mut Option<String>| -> Result<(), MirrorError> {
            if let Some(v) = value.as_deref() {
                *value = Some(Self::expand_string(&pattern, v, env)?);
            }
            Ok(())
        };

        if let Some(credentials) = &mut config.credentials {
            expand(&mut credentials.username)?;
            expand(&mut credentials.password)?;
        }
        for repo in [&mut config.repository, &mut config.upstream]
            .into_iter()
            .flatten()
        {
            expand(&mut repo.owner)?;
            expand(&mut repo.name)?;
        }
        if let Some(author) = &mut config.author {
            expand(&mut author.name)?;
            expand(&mut author.email)?;
        }
        expand(&mut config.api_url)?;
        expand(&mut config.clone_base_url)?;

        Ok(config)
    }

    /// Expand environment variables in a single string
    fn expand_string(
        pattern: &Regex,
        input: &str,
        env: &HashMap<String, String>,
    ) -> Result<String, MirrorError> {
        let mut missing: Option<String> = None;
        let expanded = pattern.replace_all(input, |caps: &regex::Captures| {
            let name = &caps[1];
            match env.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(MirrorError::ConfigError(format!(
                "environment variable {} is referenced but not set",
                name
            ))),
            None => Ok(expanded.into_owned()),
        }
    }

    /// Validate a merged configuration
    pub fn validate(config: &MirrorConfigFile) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut require = |field: &str, value: Option<&String>| {
            if value.is_none_or(|v| v.trim().is_empty()) {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: "is required".to_string(),
                });
            }
        };

        let credentials = config.credentials.clone().unwrap_or_default();
        require("credentials.username", credentials.username.as_ref());
        require("credentials.password", credentials.password.as_ref());

        let repository = config.repository.clone().unwrap_or_default();
        require("repository.owner", repository.owner.as_ref());
        require("repository.name", repository.name.as_ref());

        let upstream = config.upstream.clone().unwrap_or_default();
        require("upstream.owner", upstream.owner.as_ref());
        require("upstream.name", upstream.name.as_ref());

        let author = config.author.clone().unwrap_or_default();
        require("author.name", author.name.as_ref());
        require("author.email", author.email.as_ref());

        if let Some(email) = &author.email
            && !email.trim().is_empty()
            && !email.contains('@')
        {
            errors.push(ConfigValidationError {
                field: "author.email".to_string(),
                message: format!("'{}' is not an email address", email),
            });
        }

        match &config.branches {
            None => errors.push(ConfigValidationError {
                field: "branches".to_string(),
                message: "at least one branch target is required".to_string(),
            }),
            Some(branches) if branches.is_empty() => errors.push(ConfigValidationError {
                field: "branches".to_string(),
                message: "at least one branch target is required".to_string(),
            }),
            Some(branches) => {
                let mut seen = std::collections::HashSet::new();
                for (i, target) in branches.iter().enumerate() {
                    if target.branch.trim().is_empty() {
                        errors.push(ConfigValidationError {
                            field: format!("branches[{}].branch", i),
                            message: "is required".to_string(),
                        });
                    } else if !seen.insert(target.branch.as_str()) {
                        errors.push(ConfigValidationError {
                            field: format!("branches[{}].branch", i),
                            message: format!("branch '{}' is listed twice", target.branch),
                        });
                    }
                    if target.name_prefix.is_empty() {
                        warnings.push(ConfigValidationWarning {
                            field: format!("branches[{}].namePrefix", i),
                            message: "empty prefix mirrors every upstream release".to_string(),
                            suggestion: Some("use a major version prefix such as \"3.\"".to_string()),
                        });
                    }
                }
            }
        }

        if let Some(run) = &config.run {
            if run.max_concurrency == Some(0) {
                errors.push(ConfigValidationError {
                    field: "run.maxConcurrency".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            if run
                .stale_lock_hours
                .is_some_and(|hours| hours.checked_mul(3600).is_none())
            {
                errors.push(ConfigValidationError {
                    field: "run.staleLockHours".to_string(),
                    message: "is too large".to_string(),
                });
            }
        }

        if let Some(schedule) = &config.schedule {
            if schedule.hour.is_some_and(|h| h > 23) {
                errors.push(ConfigValidationError {
                    field: "schedule.hour".to_string(),
                    message: "must be between 0 and 23".to_string(),
                });
            }
            if schedule.minute.is_some_and(|m| m > 59) {
                errors.push(ConfigValidationError {
                    field: "schedule.minute".to_string(),
                    message: "must be between 0 and 59".to_string(),
                });
            }
        }

        if config.manifest.as_ref().is_none_or(|m| m.dependency.is_none()) {
            warnings.push(ConfigValidationWarning {
                field: "manifest.dependency".to_string(),
                message: "no dependency pin configured; manifests are only reformatted".to_string(),
                suggestion: None,
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Turn a merged configuration into a [`MirrorConfig`], applying defaults
    pub fn resolve(config: MirrorConfigFile) -> Result<MirrorConfig, MirrorError> {
        let validation = Self::validate(&config);
        for warning in &validation.warnings {
            warn!(field = %warning.field, suggestion = ?warning.suggestion, "{}", warning.message);
        }
        if !validation.valid {
            return Err(MirrorError::InvalidConfig(
                validation
                    .errors
                    .iter()
                    .map(|e| format!("{} {}", e.field, e.message))
                    .collect(),
            ));
        }

        let credentials = config.credentials.unwrap_or_default();
        let repository = config.repository.unwrap_or_default();
        let upstream = config.upstream.unwrap_or_default();
        let author = config.author.unwrap_or_default();
        let workspace = config.workspace.unwrap_or_default();
        let run = config.run.unwrap_or_default();
        let schedule = config.schedule.unwrap_or_default();

        let workspace_root = workspace
            .root
            .unwrap_or_else(|| std::env::temp_dir().join("release-mirror"));
        let lock_file = run
            .lock_file
            .unwrap_or_else(|| workspace_root.join(LOCK_FILENAME));

        Ok(MirrorConfig {
            credentials: GitCredentials::new(
                credentials.username.unwrap_or_default(),
                credentials.password.unwrap_or_default(),
            ),
            repository: RepoIdentity::new(
                repository.owner.unwrap_or_default(),
                repository.name.unwrap_or_default(),
            ),
            upstream: RepoIdentity::new(
                upstream.owner.unwrap_or_default(),
                upstream.name.unwrap_or_default(),
            ),
            author: CommitAuthor {
                name: author.name.unwrap_or_default(),
                email: author.email.unwrap_or_default(),
            },
            branches: config.branches.unwrap_or_default(),
            manifest: config.manifest.unwrap_or_default(),
            resources_dir: config
                .resources_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_DIR)),
            workspace_root,
            retention: workspace.retention.unwrap_or_default(),
            sequential: run.sequential.unwrap_or(false),
            max_concurrency: run.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            lock_file,
            stale_lock_after: Duration::from_secs(
                run.stale_lock_hours
                    .unwrap_or(DEFAULT_STALE_LOCK_HOURS)
                    .saturating_mul(3600),
            ),
            http_timeout: run.http_timeout_secs.map(Duration::from_secs),
            schedule_hour: schedule.hour.unwrap_or(DEFAULT_SCHEDULE_HOUR),
            schedule_minute: schedule.minute.unwrap_or(0),
            run_on_startup: schedule.run_on_startup.unwrap_or(false),
            api_url: config
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            clone_base_url: config
                .clone_base_url
                .unwrap_or_else(|| DEFAULT_CLONE_BASE_URL.to_string()),
            history_file: config.history_file,
        })
    }
}
