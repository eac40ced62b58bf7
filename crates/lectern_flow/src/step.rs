//! The step abstraction.
//!
//! A step turns an input record into model messages and turns the model's
//! content back into an output value. It never calls the model itself;
//! [`StepExecutor`](crate::StepExecutor) owns retries, timeouts and the
//! request ledger.

use crate::extraction::extract_json;
use crate::template::PromptTemplate;
use lectern_core::{Message, ModelTier};
use lectern_error::{FlowError, FlowErrorKind, StepError};
use lectern_interface::ModelContent;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One model-backed unit of work.
///
/// The tier selects a model variant through configuration; it never
/// changes how the engine runs the step.
pub trait Step: Send + Sync + fmt::Debug {
    /// Step name, unique within its flow stage.
    fn name(&self) -> &str;

    /// Reasoning/quality tier.
    fn tier(&self) -> ModelTier;

    /// Reject malformed inputs before any model call.
    fn validate_inputs(&self, inputs: &Value) -> Result<(), StepError>;

    /// Messages sent to the model for `inputs`.
    fn build_messages(&self, inputs: &Value) -> Result<Vec<Message>, StepError>;

    /// Schema the model's structured output must follow.
    fn output_schema(&self) -> Option<&Value> {
        None
    }

    /// Convert model content into the step output.
    ///
    /// Unusable content is a transient failure so the call is retried.
    fn parse_output(&self, content: ModelContent) -> Result<Value, StepError>;
}

/// A compiled JSON Schema.
#[derive(Clone)]
pub struct JsonSchema {
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl JsonSchema {
    /// Compile a schema document.
    pub fn new(schema: Value) -> Result<Self, FlowError> {
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            FlowError::new(FlowErrorKind::Definition(format!(
                "Failed to compile schema: {}",
                e
            )))
        })?;
        Ok(Self {
            schema,
            validator: Arc::new(validator),
        })
    }

    /// The schema document.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Every violation of `instance`; empty when valid.
    pub fn errors(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|e| format!("{}", e))
            .collect()
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JsonSchema").field(&self.schema).finish()
    }
}

#[derive(Debug, Clone)]
struct Prompt {
    system: Option<PromptTemplate>,
    user: PromptTemplate,
}

impl Prompt {
    fn messages(
        &self,
        step: &str,
        inputs: &Value,
        suffix: Option<String>,
    ) -> Result<Vec<Message>, StepError> {
        let mut system = match &self.system {
            Some(template) => Some(template.render(step, inputs)?),
            None => None,
        };
        if let Some(suffix) = suffix {
            system = Some(match system {
                Some(text) => format!("{}\n\n{}", text, suffix),
                None => suffix,
            });
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(text) = system {
            messages.push(Message::system(text));
        }
        messages.push(Message::user(self.user.render(step, inputs)?));
        Ok(messages)
    }
}

/// A step with JSON inputs and outputs, optionally schema-checked.
///
/// # Examples
///
/// ```
/// use lectern_flow::{Step, StructuredStep};
/// use lectern_interface::ModelContent;
/// use serde_json::json;
///
/// let step = StructuredStep::new("extract", "Key points of: {{input.text}}")
///     .unwrap()
///     .with_output_schema(json!({
///         "type": "object",
///         "required": ["points"],
///         "properties": {"points": {"type": "array"}}
///     }))
///     .unwrap();
///
/// let output = step
///     .parse_output(ModelContent::Text("```json\n{\"points\": [\"a\"]}\n```".into()))
///     .unwrap();
/// assert_eq!(output, json!({"points": ["a"]}));
/// assert!(step.parse_output(ModelContent::Text("{\"oops\": 1}".into())).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct StructuredStep {
    name: String,
    tier: ModelTier,
    prompt: Prompt,
    input_schema: Option<JsonSchema>,
    output_schema: Option<JsonSchema>,
}

impl StructuredStep {
    /// A structured step rendering `prompt` against its inputs.
    pub fn new(name: impl Into<String>, prompt: &str) -> Result<Self, FlowError> {
        Ok(Self {
            name: name.into(),
            tier: ModelTier::default(),
            prompt: Prompt {
                system: None,
                user: PromptTemplate::new(prompt)?,
            },
            input_schema: None,
            output_schema: None,
        })
    }

    /// Use a different reasoning tier.
    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    /// Add a system prompt template.
    pub fn with_system(mut self, system: &str) -> Result<Self, FlowError> {
        self.prompt.system = Some(PromptTemplate::new(system)?);
        Ok(self)
    }

    /// Validate inputs against a schema.
    pub fn with_input_schema(mut self, schema: Value) -> Result<Self, FlowError> {
        self.input_schema = Some(JsonSchema::new(schema)?);
        Ok(self)
    }

    /// Validate outputs against a schema.
    pub fn with_output_schema(mut self, schema: Value) -> Result<Self, FlowError> {
        self.output_schema = Some(JsonSchema::new(schema)?);
        Ok(self)
    }
}

impl Step for StructuredStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn validate_inputs(&self, inputs: &Value) -> Result<(), StepError> {
        if let Some(schema) = &self.input_schema {
            let errors = schema.errors(inputs);
            if !errors.is_empty() {
                return Err(StepError::validation(&self.name, errors.join("; ")));
            }
        }
        self.prompt.messages(&self.name, inputs, None).map(|_| ())
    }

    fn build_messages(&self, inputs: &Value) -> Result<Vec<Message>, StepError> {
        let instruction = match &self.output_schema {
            Some(schema) => format!(
                "Respond only with JSON matching this schema:\n{}",
                schema.schema()
            ),
            None => "Respond only with JSON.".to_string(),
        };
        self.prompt.messages(&self.name, inputs, Some(instruction))
    }

    fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref().map(JsonSchema::schema)
    }

    fn parse_output(&self, content: ModelContent) -> Result<Value, StepError> {
        let value = match content {
            ModelContent::Json(value) => value,
            ModelContent::Text(text) => extract_json(&text).map_err(|e| {
                StepError::transient(
                    &self.name,
                    format!("Malformed structured output: {}", e.message),
                )
            })?,
        };

        if let Some(schema) = &self.output_schema {
            let errors = schema.errors(&value);
            if !errors.is_empty() {
                return Err(StepError::transient(
                    &self.name,
                    format!("Output does not match schema: {}", errors.join("; ")),
                ));
            }
        }
        Ok(value)
    }
}

/// A free-form step; its output is the model's text.
///
/// # Examples
///
/// ```
/// use lectern_flow::{Step, TextStep};
/// use serde_json::json;
///
/// let step = TextStep::new("summarize", "Summarize: {{input.text}}").unwrap();
/// let messages = step.build_messages(&json!({"input": {"text": "Ratios compare."}})).unwrap();
/// assert_eq!(messages.last().unwrap().content, "Summarize: Ratios compare.");
/// ```
#[derive(Debug, Clone)]
pub struct TextStep {
    name: String,
    tier: ModelTier,
    prompt: Prompt,
}

impl TextStep {
    /// A text step rendering `prompt` against its inputs.
    pub fn new(name: impl Into<String>, prompt: &str) -> Result<Self, FlowError> {
        Ok(Self {
            name: name.into(),
            tier: ModelTier::default(),
            prompt: Prompt {
                system: None,
                user: PromptTemplate::new(prompt)?,
            },
        })
    }

    /// Use a different reasoning tier.
    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    /// Add a system prompt template.
    pub fn with_system(mut self, system: &str) -> Result<Self, FlowError> {
        self.prompt.system = Some(PromptTemplate::new(system)?);
        Ok(self)
    }
}

impl Step for TextStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn validate_inputs(&self, inputs: &Value) -> Result<(), StepError> {
        self.prompt.messages(&self.name, inputs, None).map(|_| ())
    }

    fn build_messages(&self, inputs: &Value) -> Result<Vec<Message>, StepError> {
        self.prompt.messages(&self.name, inputs, None)
    }

    fn parse_output(&self, content: ModelContent) -> Result<Value, StepError> {
        let text = content.as_text();
        if text.trim().is_empty() {
            return Err(StepError::transient(&self.name, "Empty model response"));
        }
        Ok(Value::String(text))
    }
}
