//! Deterministic model client driven by a script.

use async_trait::async_trait;
use lectern_core::{Role, TokenUsage};
use lectern_error::{ModelError, ModelErrorKind};
use lectern_interface::{ModelClient, ModelContent, ModelRequest, ModelResponse};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A single scripted response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return this content
    Reply(ModelContent),
    /// Fail with this error
    Error(ModelErrorKind),
}

/// How the client answers calls for one label.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Always return the content
    Reply(ModelContent),
    /// Always fail
    Error(ModelErrorKind),
    /// Fail `fail_count` times, then return the content
    FailThenSucceed {
        /// Failing calls before the first success
        fail_count: usize,
        /// Error returned while failing
        error: ModelErrorKind,
        /// Content returned afterwards
        reply: ModelContent,
    },
    /// Play responses in order; the last one repeats
    Sequence(Vec<MockResponse>),
    /// Return the last user message as text
    Echo,
}

#[derive(Debug, Default)]
struct ScriptState {
    calls: HashMap<String, usize>,
    requests: Vec<ModelRequest>,
}

const UNLABELLED: &str = "<unlabelled>";

/// Model client answering from a script keyed by request label.
///
/// Requests carry the step name (or conversation kind) as their label, so
/// a script can make one step fail while its siblings succeed.
///
/// # Examples
///
/// ```
/// use lectern_interface::{ModelClient, ModelContent, ModelRequestBuilder};
/// use lectern_models::{MockBehavior, ScriptedModelClient};
/// use lectern_core::Message;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let client = ScriptedModelClient::new()
///     .script("extract", MockBehavior::Reply(ModelContent::Text("facts".into())));
///
/// let request = ModelRequestBuilder::default()
///     .model("fast")
///     .messages(vec![Message::user("Lesson text")])
///     .label(Some("extract".to_string()))
///     .build()
///     .unwrap();
///
/// let response = client.call(&request).await.unwrap();
/// assert_eq!(response.content, ModelContent::Text("facts".into()));
/// assert_eq!(client.call_count("extract"), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct ScriptedModelClient {
    provider: String,
    default: MockBehavior,
    scripts: HashMap<String, MockBehavior>,
    prompt_failures: Vec<(String, ModelErrorKind)>,
    delays: HashMap<String, Duration>,
    usage: TokenUsage,
    cost: Option<f64>,
    state: Mutex<ScriptState>,
}

impl Default for ScriptedModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModelClient {
    /// A client that echoes the last user message for every label.
    pub fn new() -> Self {
        Self {
            provider: "scripted".to_string(),
            default: MockBehavior::Echo,
            scripts: HashMap::new(),
            prompt_failures: Vec::new(),
            delays: HashMap::new(),
            usage: TokenUsage::new(10, 5),
            cost: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// Behavior for labels without a script.
    pub fn with_default(mut self, behavior: MockBehavior) -> Self {
        self.default = behavior;
        self
    }

    /// Behavior for one label.
    pub fn script(mut self, label: impl Into<String>, behavior: MockBehavior) -> Self {
        self.scripts.insert(label.into(), behavior);
        self
    }

    /// Fail any call whose messages contain `needle`, regardless of label.
    pub fn fail_when_prompt_contains(
        mut self,
        needle: impl Into<String>,
        error: ModelErrorKind,
    ) -> Self {
        self.prompt_failures.push((needle.into(), error));
        self
    }

    /// Delay every call for one label.
    pub fn with_delay(mut self, label: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(label.into(), delay);
        self
    }

    /// Token usage reported for every call.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Cost estimate reported for every call.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Provider name reported to the ledger.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls received for a label.
    pub fn call_count(&self, label: &str) -> usize {
        self.state().calls.get(label).copied().unwrap_or(0)
    }

    /// Calls received across all labels.
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.state().requests.clone()
    }

    fn respond(behavior: &MockBehavior, call_index: usize, request: &ModelRequest) -> MockResponse {
        match behavior {
            MockBehavior::Reply(content) => MockResponse::Reply(content.clone()),
            MockBehavior::Error(kind) => MockResponse::Error(kind.clone()),
            MockBehavior::FailThenSucceed {
                fail_count,
                error,
                reply,
            } => {
                if call_index < *fail_count {
                    MockResponse::Error(error.clone())
                } else {
                    MockResponse::Reply(reply.clone())
                }
            }
            MockBehavior::Sequence(responses) => responses
                .get(call_index)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or_else(|| {
                    MockResponse::Error(ModelErrorKind::Config("empty response sequence".into()))
                }),
            MockBehavior::Echo => {
                let text = request
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                MockResponse::Reply(ModelContent::Text(text))
            }
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let label = request.label().as_deref().unwrap_or(UNLABELLED).to_string();

        let call_index = {
            let mut state = self.state();
            state.requests.push(request.clone());
            let count = state.calls.entry(label.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        debug!(label = %label, call_index, "Scripted model call");

        if let Some(delay) = self.delays.get(&label) {
            tokio::time::sleep(*delay).await;
        }

        let prompt_failure = self.prompt_failures.iter().find(|(needle, _)| {
            request
                .messages()
                .iter()
                .any(|m| m.content.contains(needle.as_str()))
        });
        if let Some((_, kind)) = prompt_failure {
            return Err(ModelError::new(kind.clone()));
        }

        let behavior = self.scripts.get(&label).unwrap_or(&self.default);
        match Self::respond(behavior, call_index, request) {
            MockResponse::Reply(content) => Ok(ModelResponse {
                content,
                usage: self.usage,
                cost_estimate: self.cost,
                cached: false,
                response_ref: Some(format!("scripted-{}-{}", label, call_index)),
            }),
            MockResponse::Error(kind) => Err(ModelError::new(kind)),
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}
