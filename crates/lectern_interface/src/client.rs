//! Model client contract.

use async_trait::async_trait;
use derive_getters::Getters;
use lectern_core::{Message, TokenUsage};
use lectern_error::ModelError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A single call to an external model.
///
/// # Examples
///
/// ```
/// use lectern_core::Message;
/// use lectern_interface::ModelRequestBuilder;
/// use std::time::Duration;
///
/// let request = ModelRequestBuilder::default()
///     .model("gpt-4o-mini")
///     .messages(vec![Message::user("Summarize fractions")])
///     .timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
///
/// assert_eq!(request.model(), "gpt-4o-mini");
/// assert!(request.schema().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Getters, derive_builder::Builder)]
#[builder(setter(into))]
pub struct ModelRequest {
    /// Model name
    model: String,
    /// Conversation payload
    messages: Vec<Message>,
    /// Caller label (step name or conversation kind) for tracing and routing
    #[builder(default)]
    label: Option<String>,
    /// JSON schema the structured output must follow, if any
    #[builder(default)]
    schema: Option<Value>,
    /// Per-call timeout
    #[builder(default = "Duration::from_secs(60)")]
    timeout: Duration,
    /// Output token cap
    #[builder(default)]
    max_tokens: Option<u32>,
    /// Sampling temperature
    #[builder(default)]
    temperature: Option<f32>,
}

/// Content returned by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ModelContent {
    /// Free-form text
    Text(String),
    /// Structured output already parsed by the client
    Json(Value),
}

impl ModelContent {
    /// Text form of the content; JSON is serialized.
    pub fn as_text(&self) -> String {
        match self {
            ModelContent::Text(text) => text.clone(),
            ModelContent::Json(value) => value.to_string(),
        }
    }
}

/// Result of a successful model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Returned content
    pub content: ModelContent,
    /// Token usage reported by the provider
    pub usage: TokenUsage,
    /// Provider's own cost estimate, when it reports one
    pub cost_estimate: Option<f64>,
    /// Whether the provider served the response from a cache
    pub cached: bool,
    /// Provider response id or other opaque reference
    pub response_ref: Option<String>,
}

impl ModelResponse {
    /// A text response with the given usage.
    pub fn text(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: ModelContent::Text(content.into()),
            usage,
            cost_estimate: None,
            cached: false,
            response_ref: None,
        }
    }

    /// A structured response with the given usage.
    pub fn json(value: Value, usage: TokenUsage) -> Self {
        Self {
            content: ModelContent::Json(value),
            usage,
            cost_estimate: None,
            cached: false,
            response_ref: None,
        }
    }
}

/// External model client.
///
/// Implementations classify their failures through [`ModelError`]:
/// timeouts, rate limits and malformed structured output are retryable,
/// authentication and configuration errors are not.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Perform one call attempt.
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Provider name recorded in the request ledger.
    fn provider_name(&self) -> &str;
}
