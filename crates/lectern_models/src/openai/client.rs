//! HTTP client for OpenAI-compatible chat completions.

use super::dto::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, JsonSchemaFormat, ResponseFormat,
};
use async_trait::async_trait;
use lectern_core::TokenUsage;
use lectern_error::{ModelError, ModelErrorKind};
use lectern_interface::{ModelClient, ModelContent, ModelRequest, ModelResponse};
use lectern_rate_limit::ClientConfig;
use reqwest::Client;
use tracing::{debug, instrument, warn};

/// Client for any OpenAI-compatible `chat/completions` endpoint.
///
/// Structured requests are sent with a `json_schema` response format; the
/// returned content is parsed as JSON when possible and passed through as
/// text otherwise, leaving extraction and validation to the step.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    provider: String,
}

impl OpenAiCompatibleClient {
    /// Create a client for `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider: provider.into(),
        }
    }

    /// Create a client from configuration, letting `LECTERN_BASE_URL` and
    /// `LECTERN_API_KEY` override it.
    #[instrument(skip_all, fields(provider = %config.provider))]
    pub fn from_config(config: &ClientConfig) -> Self {
        let base_url = std::env::var("LECTERN_BASE_URL").unwrap_or_else(|_| config.base_url.clone());
        let api_key = std::env::var("LECTERN_API_KEY").ok();
        if api_key.is_none() {
            warn!("LECTERN_API_KEY not set; requests will be sent without authorization");
        }
        Self::new(config.provider.clone(), base_url, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn classify_status(status: u16, body: String) -> ModelErrorKind {
    match status {
        401 | 403 => ModelErrorKind::Auth(body),
        429 => ModelErrorKind::RateLimited(body),
        408 | 409 | 500..=599 => ModelErrorKind::Server {
            status,
            message: body,
        },
        _ => ModelErrorKind::Request(format!("HTTP {}: {}", status, body)),
    }
}

/// Turn a parsed completion into a model response.
pub(crate) fn into_model_response(
    response: ChatCompletionResponse,
    structured: bool,
) -> Result<ModelResponse, ModelErrorKind> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ModelErrorKind::MalformedOutput("response has no content".to_string()))?;

    let content = if structured {
        match serde_json::from_str(&content) {
            Ok(value) => ModelContent::Json(value),
            Err(_) => ModelContent::Text(content),
        }
    } else {
        ModelContent::Text(content)
    };

    let cached = response
        .usage
        .prompt_tokens_details
        .as_ref()
        .is_some_and(|details| details.cached_tokens > 0);

    Ok(ModelResponse {
        content,
        usage: TokenUsage::from(&response.usage),
        cost_estimate: None,
        cached,
        response_ref: response.id,
    })
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    #[instrument(skip(self, request), fields(provider = %self.provider, model = %request.model()))]
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = ChatCompletionRequest {
            model: request.model().clone(),
            messages: request.messages().iter().map(ChatMessage::from).collect(),
            max_tokens: *request.max_tokens(),
            temperature: *request.temperature(),
            response_format: request.schema().clone().map(|schema| ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: "output",
                    schema,
                    strict: false,
                },
            }),
        };

        let mut http = self
            .client
            .post(self.endpoint())
            .timeout(*request.timeout())
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        debug!(endpoint = %self.endpoint(), "Sending chat completion request");
        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::new(ModelErrorKind::Timeout(request.timeout().as_millis() as u64))
            } else if e.is_connect() {
                ModelError::new(ModelErrorKind::Server {
                    status: 503,
                    message: format!("connection failed: {}", e),
                })
            } else {
                ModelError::new(ModelErrorKind::Request(e.to_string()))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Chat completion request failed");
            return Err(ModelError::new(classify_status(status.as_u16(), text)));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::new(ModelErrorKind::Timeout(request.timeout().as_millis() as u64))
            } else {
                ModelError::new(ModelErrorKind::MalformedOutput(format!(
                    "Failed to parse response: {}",
                    e
                )))
            }
        })?;

        into_model_response(parsed, request.schema().is_some()).map_err(ModelError::new)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}
