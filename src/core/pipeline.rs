//! Pipeline definitions and the registry they are loaded into.
//!
//! A pipeline pairs a transformation statement with an optional schedule.
//! Definitions are created once at startup and never change afterwards.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use thiserror::Error;

use super::types::PipelineName;
use super::window::WindowPolicy;

/// Errors raised while building a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two definitions share a name.
    #[error("duplicate pipeline name: {0}")]
    DuplicateName(PipelineName),
}

/// A named transformation with an optional schedule.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineDefinition {
    /// Unique pipeline name.
    name: PipelineName,
    /// Statement passed verbatim to the execution backend.
    statement: String,
    /// Schedule expression; `None` means manual only.
    schedule: Option<String>,
    /// Window size override.
    window: Option<WindowPolicy>,
    /// Remaining pipeline-specific options.
    options: Map<String, Value>,
}

impl PipelineDefinition {
    /// Create a manual-only definition.
    pub fn new(name: impl Into<PipelineName>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            schedule: None,
            window: None,
            options: Map::new(),
        }
    }

    /// Set the schedule expression. Blank expressions leave the pipeline
    /// unscheduled.
    pub fn with_schedule(mut self, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        self.schedule = if expression.trim().is_empty() {
            None
        } else {
            Some(expression)
        };
        self
    }

    /// Override the window size for this pipeline.
    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the pipeline-specific options.
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Get the pipeline name.
    pub fn name(&self) -> &PipelineName {
        &self.name
    }

    /// Get the transformation statement.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Get the schedule expression, if any.
    pub fn schedule(&self) -> Option<&str> {
        self.schedule.as_deref()
    }

    /// Whether the pipeline is triggered automatically.
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Get the window size override, if any.
    pub fn window(&self) -> Option<WindowPolicy> {
        self.window
    }

    /// Get the pipeline-specific options.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

/// Read-only set of loaded pipelines keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<PipelineName, Arc<PipelineDefinition>>,
}

impl PipelineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, rejecting duplicate names.
    pub fn insert(
        &mut self,
        definition: impl Into<Arc<PipelineDefinition>>,
    ) -> Result<(), RegistryError> {
        let definition = definition.into();
        match self.pipelines.entry(definition.name().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateName(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(definition);
                Ok(())
            }
        }
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &PipelineName) -> Option<&Arc<PipelineDefinition>> {
        self.pipelines.get(name)
    }

    /// Whether a pipeline with this name is loaded.
    pub fn contains(&self, name: &PipelineName) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Loaded pipeline names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &PipelineName> {
        self.pipelines.keys()
    }

    /// Loaded definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PipelineDefinition>> {
        self.pipelines.values()
    }

    /// Number of loaded pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipelines are loaded.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl TryFrom<Vec<PipelineDefinition>> for PipelineRegistry {
    type Error = RegistryError;

    fn try_from(definitions: Vec<PipelineDefinition>) -> Result<Self, Self::Error> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.insert(definition)?;
        }
        Ok(registry)
    }
}
