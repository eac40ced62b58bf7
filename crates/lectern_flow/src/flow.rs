//! Flow definitions built in code.

use crate::engine::INPUT_KEY;
use crate::step::Step;
use lectern_error::{FlowError, FlowErrorKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Members of a bounded-parallel batch.
#[derive(Debug, Clone)]
pub enum BatchMembers {
    /// Distinct sibling steps, each run once
    Fixed(Vec<Arc<dyn Step>>),
    /// One step run per element of the array at `source` in the running context
    ForEach {
        /// The step to fan out
        step: Arc<dyn Step>,
        /// Dotted path to a JSON array
        source: String,
    },
}

/// A named group of steps run with at most `max_concurrency` in flight.
///
/// Members that fail are recorded individually and do not stop their
/// siblings.
#[derive(Debug, Clone)]
pub struct BatchStage {
    name: String,
    members: BatchMembers,
    max_concurrency: usize,
}

impl BatchStage {
    /// Run distinct sibling steps.
    pub fn fixed(
        name: impl Into<String>,
        members: Vec<Arc<dyn Step>>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            members: BatchMembers::Fixed(members),
            max_concurrency,
        }
    }

    /// Run `step` once per element of the array at `source`.
    ///
    /// Each member sees the running context plus `item` and `item_index`.
    pub fn for_each(
        name: impl Into<String>,
        step: Arc<dyn Step>,
        source: impl Into<String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            members: BatchMembers::ForEach {
                step,
                source: source.into(),
            },
            max_concurrency,
        }
    }

    /// Batch name; its output is stored under this key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Batch members.
    pub fn members(&self) -> &BatchMembers {
        &self.members
    }

    /// Maximum members in flight.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn validate(&self) -> Result<(), FlowError> {
        let invalid = |message: &str| {
            FlowError::new(FlowErrorKind::InvalidBatch {
                batch: self.name.clone(),
                message: message.to_string(),
            })
        };
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency must be at least 1"));
        }
        match &self.members {
            BatchMembers::Fixed(members) => {
                if members.is_empty() {
                    return Err(invalid("batch has no members"));
                }
                let mut seen = HashSet::new();
                for member in members {
                    if !seen.insert(member.name()) {
                        return Err(invalid(&format!(
                            "member '{}' appears more than once",
                            member.name()
                        )));
                    }
                }
            }
            BatchMembers::ForEach { source, .. } => {
                if source.trim().is_empty() {
                    return Err(invalid("for_each source path is empty"));
                }
            }
        }
        Ok(())
    }
}

/// One stage of a flow.
#[derive(Debug, Clone)]
pub enum Stage {
    /// A single step
    Step(Arc<dyn Step>),
    /// A bounded-parallel batch
    Batch(BatchStage),
}

impl Stage {
    /// Stage name; its output is stored under this key.
    pub fn name(&self) -> &str {
        match self {
            Stage::Step(step) => step.name(),
            Stage::Batch(batch) => batch.name(),
        }
    }
}

/// A named pipeline of stages.
///
/// Stages run in declaration order. Each stage sees the running context
/// `{"input": <run inputs>, "<earlier stage>": <its output>, ...}`.
///
/// # Examples
///
/// ```
/// use lectern_flow::{Flow, TextStep};
///
/// let flow = Flow::builder("lesson")
///     .step(TextStep::new("extract", "Key points: {{input.text}}").unwrap())
///     .step(TextStep::new("summarize", "Summarize: {{extract}}").unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(flow.stage_names(), vec!["extract", "summarize"]);
/// ```
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    description: Option<String>,
    stages: Vec<Stage>,
}

impl Flow {
    /// Start building a flow.
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            name: name.into(),
            description: None,
            stages: Vec::new(),
        }
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Progress denominator: one unit per stage.
    pub fn total_steps(&self) -> u32 {
        u32::try_from(self.stages.len()).unwrap_or(u32::MAX)
    }
}

/// Builder for [`Flow`].
#[derive(Debug)]
pub struct FlowBuilder {
    name: String,
    description: Option<String>,
    stages: Vec<Stage>,
}

impl FlowBuilder {
    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a step stage.
    pub fn step(self, step: impl Step + 'static) -> Self {
        self.shared_step(Arc::new(step))
    }

    /// Append a step stage from a shared step.
    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.stages.push(Stage::Step(step));
        self
    }

    /// Append a batch stage.
    pub fn batch(mut self, batch: BatchStage) -> Self {
        self.stages.push(Stage::Batch(batch));
        self
    }

    /// Validate and build.
    ///
    /// Flows must have at least one stage, stage names must be unique and
    /// must not shadow the `input` key of the running context.
    pub fn build(self) -> Result<Flow, FlowError> {
        if self.stages.is_empty() {
            return Err(FlowError::new(FlowErrorKind::EmptyFlow(self.name)));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            let name = stage.name();
            if name == INPUT_KEY || !seen.insert(name) {
                return Err(FlowError::new(FlowErrorKind::DuplicateStep {
                    flow: self.name.clone(),
                    step: name.to_string(),
                }));
            }
            if let Stage::Batch(batch) = stage {
                batch.validate()?;
            }
        }

        Ok(Flow {
            name: self.name,
            description: self.description,
            stages: self.stages,
        })
    }
}

/// Named flows available to the engine.
#[derive(Debug, Clone, Default)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<Flow>>,
}

impl FlowRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flow, replacing any flow with the same name.
    pub fn register(&mut self, flow: Flow) -> &mut Self {
        self.flows.insert(flow.name().to_string(), Arc::new(flow));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, flow: Flow) -> Self {
        self.register(flow);
        self
    }

    /// Look up a flow.
    pub fn get(&self, name: &str) -> Result<Arc<Flow>, FlowError> {
        self.flows
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::new(FlowErrorKind::UnknownFlow(name.to_string())))
    }

    /// Registered flow names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.flows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
