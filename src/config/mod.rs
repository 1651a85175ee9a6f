//! Configuration loading and parsing.
//!
//! Pipeline definitions come from a directory of `process.sql` +
//! `config.json` pairs; global settings come from an optional YAML file.

mod error;
mod loader;
mod settings;

pub use error::ConfigError;
pub use loader::{
    PIPELINE_CONFIG_FILE, PIPELINE_STATEMENT_FILE, PipelineConfig, build_definition,
    load_pipelines, load_pipelines_with,
};
pub use settings::{ApiSettings, BackendSettings, Settings, StorageSettings};
