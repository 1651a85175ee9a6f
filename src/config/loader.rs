//! Pipeline definition loading.
//!
//! A pipeline directory looks like:
//!
//! ```text
//! pipelines/
//!   daily_stats/
//!     process.sql    transformation statement
//!     config.json    {"cron": "0 1 * * *", "window_days": 1, ...}
//! ```
//!
//! Entries that are not directories, or that lack either file, are skipped.
//! A present but malformed `config.json` fails the whole load.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

use super::error::ConfigError;
use crate::core::pipeline::{PipelineDefinition, PipelineRegistry};
use crate::core::schedule::{CronParser, SCHEDULE_TIMEZONE, ScheduleParser};
use crate::core::types::PipelineName;
use crate::core::window::WindowPolicy;

/// File holding the transformation statement.
pub const PIPELINE_STATEMENT_FILE: &str = "process.sql";

/// File holding the schedule and options.
pub const PIPELINE_CONFIG_FILE: &str = "config.json";

/// Parsed contents of a pipeline's `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Cron-like schedule; absent or blank means manual only.
    #[serde(default)]
    pub cron: Option<String>,

    /// Window size override in whole days.
    #[serde(default)]
    pub window_days: Option<u32>,

    /// Everything else, kept verbatim.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl PipelineConfig {
    /// Parse a `config.json` document.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Load every pipeline under `dir` into a registry.
pub fn load_pipelines(dir: impl AsRef<Path>) -> Result<PipelineRegistry, ConfigError> {
    load_pipelines_with(dir, &CronParser)
}

/// Load every pipeline under `dir`, validating schedules with `parser`.
pub fn load_pipelines_with(
    dir: impl AsRef<Path>,
    parser: &dyn ScheduleParser,
) -> Result<PipelineRegistry, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirRead {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::DirRead {
            path: dir.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort();

    let mut registry = PipelineRegistry::new();
    for path in paths {
        if let Some(definition) = load_pipeline(&path, parser)? {
            tracing::debug!(
                pipeline = %definition.name(),
                schedule = definition.schedule().unwrap_or("-"),
                "loaded pipeline"
            );
            registry.insert(definition)?;
        }
    }

    Ok(registry)
}

/// Load a single pipeline directory. `Ok(None)` means the entry is not a
/// pipeline and was skipped.
fn load_pipeline(
    path: &Path,
    parser: &dyn ScheduleParser,
) -> Result<Option<PipelineDefinition>, ConfigError> {
    if !path.is_dir() {
        return Ok(None);
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        tracing::warn!(path = %path.display(), "skipping pipeline with non UTF-8 name");
        return Ok(None);
    };

    let statement_path = path.join(PIPELINE_STATEMENT_FILE);
    let config_path = path.join(PIPELINE_CONFIG_FILE);
    if !statement_path.is_file() || !config_path.is_file() {
        tracing::debug!(path = %path.display(), "skipping incomplete pipeline entry");
        return Ok(None);
    }

    let statement = read_file(&statement_path)?;
    let config = PipelineConfig::parse(&read_file(&config_path)?).map_err(|source| {
        ConfigError::Json {
            path: config_path.clone(),
            source,
        }
    })?;

    build_definition(PipelineName::new(name), statement, config, parser).map(Some)
}

/// Validate a parsed config and turn it into a definition.
pub fn build_definition(
    name: PipelineName,
    statement: String,
    config: PipelineConfig,
    parser: &dyn ScheduleParser,
) -> Result<PipelineDefinition, ConfigError> {
    let mut definition = PipelineDefinition::new(name.clone(), statement)
        .with_schedule(config.cron.unwrap_or_default())
        .with_options(config.options);

    // Fail fast: a bad expression must never reach the scheduler
    if let Some(expression) = definition.schedule() {
        parser
            .parse(expression, SCHEDULE_TIMEZONE)
            .map_err(|source| ConfigError::InvalidSchedule {
                pipeline: name.clone(),
                source,
            })?;
    }

    if let Some(days) = config.window_days {
        let policy = WindowPolicy::days(days).map_err(|source| ConfigError::InvalidWindow {
            pipeline: name.clone(),
            source,
        })?;
        definition = definition.with_window(policy);
    }

    Ok(definition)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}
