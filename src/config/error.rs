//! Configuration error types.
//!
//! Every variant is fatal at startup: a process with a broken definition or
//! settings file never begins scheduling.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::pipeline::RegistryError;
use crate::core::schedule::ScheduleError;
use crate::core::types::PipelineName;
use crate::core::window::WindowError;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file.
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a directory.
    #[error("failed to read directory '{path}': {source}")]
    DirRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline options file is not valid JSON for its shape.
    #[error("malformed pipeline config '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The settings file is not valid YAML for its shape.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A pipeline declares a schedule that does not parse.
    #[error("invalid schedule for pipeline '{pipeline}': {source}")]
    InvalidSchedule {
        pipeline: PipelineName,
        #[source]
        source: ScheduleError,
    },

    /// A pipeline declares an unusable window size.
    #[error("invalid window for pipeline '{pipeline}': {source}")]
    InvalidWindow {
        pipeline: PipelineName,
        #[source]
        source: WindowError,
    },

    /// Two pipelines share a name.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
