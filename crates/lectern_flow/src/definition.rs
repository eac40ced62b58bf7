//! Flows declared in TOML.
//!
//! ```toml
//! [flow]
//! name = "lesson_pack"
//! description = "Extract key points, then write one quiz question per point"
//!
//! [[stages]]
//! kind = "step"
//! name = "extract"
//! tier = "fast"
//! prompt = "List the key points of: {{input.text}}"
//! output_schema = { type = "object", required = ["points"] }
//!
//! [[stages]]
//! kind = "batch"
//! name = "questions"
//! max_concurrency = 3
//! for_each = "extract.points"
//!
//! [[stages.steps]]
//! name = "question"
//! prompt = "Write a quiz question about {{item}}"
//! ```

use crate::flow::{BatchStage, Flow};
use crate::step::{Step, StructuredStep, TextStep};
use lectern_core::ModelTier;
use lectern_error::{FlowError, FlowErrorKind};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Output format of a declared step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFormat {
    /// Free-form text
    #[default]
    Text,
    /// JSON, optionally schema-checked
    Json,
}

/// A declared step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepDefinition {
    /// Step name
    pub name: String,
    /// User prompt template
    pub prompt: String,
    /// System prompt template
    #[serde(default)]
    pub system: Option<String>,
    /// Reasoning tier
    #[serde(default)]
    pub tier: ModelTier,
    /// Output format; a declared schema implies `json`
    #[serde(default)]
    pub format: StepFormat,
    /// Schema for the step's input record
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// Schema for the step's output
    #[serde(default)]
    pub output_schema: Option<Value>,
}

impl StepDefinition {
    fn is_structured(&self) -> bool {
        self.format == StepFormat::Json
            || self.input_schema.is_some()
            || self.output_schema.is_some()
    }

    /// Build the step this definition declares.
    pub fn into_step(self) -> Result<Arc<dyn Step>, FlowError> {
        if self.is_structured() {
            let mut step = StructuredStep::new(self.name, &self.prompt)?.with_tier(self.tier);
            if let Some(system) = &self.system {
                step = step.with_system(system)?;
            }
            if let Some(schema) = self.input_schema {
                step = step.with_input_schema(schema)?;
            }
            if let Some(schema) = self.output_schema {
                step = step.with_output_schema(schema)?;
            }
            Ok(Arc::new(step))
        } else {
            let mut step = TextStep::new(self.name, &self.prompt)?.with_tier(self.tier);
            if let Some(system) = &self.system {
                step = step.with_system(system)?;
            }
            Ok(Arc::new(step))
        }
    }
}

/// A declared batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchDefinition {
    /// Batch name
    pub name: String,
    /// Members in flight at once; the engine default when absent
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Dotted path to an array to fan out over
    #[serde(default)]
    pub for_each: Option<String>,
    /// Member steps; exactly one when `for_each` is set
    pub steps: Vec<StepDefinition>,
}

/// A declared stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDefinition {
    /// A single step
    Step(StepDefinition),
    /// A bounded-parallel batch
    Batch(BatchDefinition),
}

/// The `[flow]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowHeader {
    /// Flow name
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: Option<String>,
}

/// A flow declared in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowDefinition {
    /// Name and description
    pub flow: FlowHeader,
    /// Stages in execution order
    pub stages: Vec<StageDefinition>,
}

impl FromStr for FlowDefinition {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| {
            FlowError::new(FlowErrorKind::Definition(format!(
                "Failed to parse flow TOML: {}",
                e
            )))
        })
    }
}

impl FlowDefinition {
    /// Read a definition from a file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FlowError::new(FlowErrorKind::Definition(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            )))
        })?;
        let definition: Self = content.parse()?;
        debug!(flow = %definition.flow.name, stages = definition.stages.len(), "Loaded flow definition");
        Ok(definition)
    }

    /// Build the flow; batches without a declared concurrency use `default_concurrency`.
    pub fn into_flow(self, default_concurrency: usize) -> Result<Flow, FlowError> {
        let mut builder = Flow::builder(self.flow.name);
        if let Some(description) = self.flow.description {
            builder = builder.description(description);
        }

        for stage in self.stages {
            builder = match stage {
                StageDefinition::Step(step) => builder.shared_step(step.into_step()?),
                StageDefinition::Batch(batch) => {
                    let concurrency = batch.max_concurrency.unwrap_or(default_concurrency);
                    match batch.for_each {
                        Some(source) => {
                            let mut steps = batch.steps.into_iter();
                            let (Some(step), None) = (steps.next(), steps.next()) else {
                                return Err(FlowError::new(FlowErrorKind::InvalidBatch {
                                    batch: batch.name,
                                    message: "for_each batches declare exactly one step"
                                        .to_string(),
                                }));
                            };
                            builder.batch(BatchStage::for_each(
                                batch.name,
                                step.into_step()?,
                                source,
                                concurrency,
                            ))
                        }
                        None => {
                            let members = batch
                                .steps
                                .into_iter()
                                .map(StepDefinition::into_step)
                                .collect::<Result<Vec<_>, _>>()?;
                            builder.batch(BatchStage::fixed(batch.name, members, concurrency))
                        }
                    }
                }
            };
        }

        builder.build()
    }
}
