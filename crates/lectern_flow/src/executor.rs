//! Step execution with retries, timeouts and the request ledger.

use crate::step::Step;
use chrono::Utc;
use lectern_core::{
    CallId, FailureKind, LedgerAttachment, LedgerEntryBuilder, LedgerEntryId, LedgerStatus,
    TokenUsage,
};
use lectern_error::{
    ModelError, ModelErrorKind, RetryableError, StepError, StepErrorKind,
};
use lectern_interface::{LedgerStore, ModelClient, ModelRequest, ModelRequestBuilder, ModelResponse};
use lectern_rate_limit::{LecternConfig, ModelsConfig, RateLimiter, RetryPolicy, Tier, TierConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, instrument, warn};

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step output, or the error that ended the step
    pub output: Result<Value, StepError>,
    /// Logical call shared by every attempt
    pub call_id: CallId,
    /// Model call attempts made (0 when inputs were rejected)
    pub attempts: u32,
    /// Tokens summed over every attempt
    pub usage: TokenUsage,
    /// Cost summed over every attempt
    pub cost: f64,
    /// Ledger entries written, one per attempt
    pub ledger_entry_ids: Vec<LedgerEntryId>,
}

impl StepOutcome {
    /// Persisted classification of the failure, if the step failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.output.as_ref().err().map(failure_kind)
    }

    fn rejected(err: StepError) -> Self {
        Self {
            output: Err(err),
            call_id: CallId::new(),
            attempts: 0,
            usage: TokenUsage::default(),
            cost: 0.0,
            ledger_entry_ids: Vec::new(),
        }
    }
}

/// Classify a step error for persistence.
pub fn failure_kind(err: &StepError) -> FailureKind {
    match err.kind {
        StepErrorKind::Validation { .. } => FailureKind::Validation,
        StepErrorKind::Transient { .. } | StepErrorKind::RetriesExhausted { .. } => {
            FailureKind::Transient
        }
        StepErrorKind::Fatal { .. } => FailureKind::Fatal,
    }
}

#[derive(Debug, Default)]
struct Attempts {
    count: u32,
    usage: TokenUsage,
    cost: f64,
    ledger_entry_ids: Vec<LedgerEntryId>,
}

/// Runs steps against a model client.
///
/// Each attempt waits for a rate-limit permit, calls the model under the
/// policy's timeout and appends exactly one ledger entry. Retryable
/// failures back off exponentially with jitter until the attempt budget
/// is spent.
///
/// # Examples
///
/// ```rust,ignore
/// let executor = StepExecutor::new(client, &config)
///     .with_retry_policy(RetryPolicy::new(3, 10, 100, Duration::from_secs(5)));
/// let outcome = executor
///     .execute(&step, &inputs, LedgerAttachment::Detached, ledger.as_ref())
///     .await;
/// ```
pub struct StepExecutor {
    client: Arc<dyn ModelClient>,
    models: ModelsConfig,
    retry: RetryPolicy,
    tier: Option<TierConfig>,
    limiters: Mutex<HashMap<String, RateLimiter<TierConfig>>>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("provider", &self.client.provider_name())
            .field("models", &self.models)
            .field("retry", &self.retry)
            .field("tier", &self.tier.as_ref().map(|t| t.name.clone()))
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    /// An executor using the provider's default tier for limits and pricing.
    pub fn new(client: Arc<dyn ModelClient>, config: &LecternConfig) -> Self {
        let tier = config.get_tier(client.provider_name(), None);
        if tier.is_none() {
            debug!(
                provider = client.provider_name(),
                "No tier configured; calls are unlimited and priced by the client only"
            );
        }
        Self {
            client,
            models: config.models.clone(),
            retry: RetryPolicy::from(&config.retry),
            tier,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// The model client.
    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    /// The retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Rate limiter for `model`, with the tier's per-model overrides applied.
    ///
    /// Limiters are created on first use and shared by every later call to
    /// the same model. `None` when the provider has no tier configured.
    pub fn limiter_for(&self, model: &str) -> Option<RateLimiter<TierConfig>> {
        let tier = self.tier.as_ref()?;
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        let limiter = limiters
            .entry(model.to_string())
            .or_insert_with(|| {
                debug!(model, "Creating rate limiter");
                RateLimiter::new(tier.for_model(model))
            })
            .clone();
        Some(limiter)
    }

    fn cost_of(&self, response: &ModelResponse, model: &str) -> f64 {
        response
            .cost_estimate
            .or_else(|| {
                self.tier
                    .as_ref()
                    .and_then(|tier| tier.for_model(model).estimate_cost(&response.usage))
            })
            .unwrap_or(0.0)
            .max(0.0)
    }

    fn build_request(&self, step: &dyn Step, inputs: &Value) -> Result<ModelRequest, StepError> {
        let messages = step.build_messages(inputs)?;
        ModelRequestBuilder::default()
            .model(self.models.model_for(step.tier()))
            .messages(messages)
            .label(Some(step.name().to_string()))
            .schema(step.output_schema().cloned())
            .timeout(self.retry.call_timeout())
            .build()
            .map_err(|e| StepError::fatal(step.name(), format!("Failed to build request: {}", e)))
    }

    /// Execute a step: validate, then call the model with retries.
    ///
    /// Validation failures make no call and write no ledger entry.
    #[instrument(skip_all, fields(step = step.name(), tier = %step.tier()))]
    pub async fn execute(
        &self,
        step: &dyn Step,
        inputs: &Value,
        attachment: LedgerAttachment,
        ledger: &dyn LedgerStore,
    ) -> StepOutcome {
        if let Err(e) = step.validate_inputs(inputs) {
            warn!(error = %e.kind, "Step inputs rejected");
            return StepOutcome::rejected(e);
        }
        let request = match self.build_request(step, inputs) {
            Ok(request) => request,
            Err(e) => return StepOutcome::rejected(e),
        };

        let call_id = CallId::new();
        let state = Mutex::new(Attempts::default());
        let result = {
            let executor = self;
            let request = &request;
            let attachment = &attachment;
            let state = &state;
            Retry::spawn(self.retry.backoff(), move || async move {
                executor
                    .attempt(step, request, call_id, attachment, ledger, state)
                    .await
            })
            .await
        };

        let attempts = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let output = result.map_err(|err| {
            if err.is_retryable() {
                StepError::new(StepErrorKind::RetriesExhausted {
                    step: step.name().to_string(),
                    attempts: attempts.count,
                    last_error: err.kind.to_string(),
                })
            } else {
                err
            }
        });

        match &output {
            Ok(_) => info!(attempts = attempts.count, cost = attempts.cost, "Step succeeded"),
            Err(e) => warn!(attempts = attempts.count, error = %e.kind, "Step failed"),
        }

        StepOutcome {
            output,
            call_id,
            attempts: attempts.count,
            usage: attempts.usage,
            cost: attempts.cost,
            ledger_entry_ids: attempts.ledger_entry_ids,
        }
    }

    /// Execute with typed inputs and outputs.
    pub async fn execute_typed<I, O>(
        &self,
        step: &dyn Step,
        inputs: &I,
        attachment: LedgerAttachment,
        ledger: &dyn LedgerStore,
    ) -> Result<(O, StepOutcome), StepError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let inputs = serde_json::to_value(inputs)
            .map_err(|e| StepError::validation(step.name(), format!("Unserializable inputs: {}", e)))?;
        let outcome = self.execute(step, &inputs, attachment, ledger).await;
        let value = outcome.output.clone()?;
        let typed = serde_json::from_value(value).map_err(|e| {
            StepError::fatal(step.name(), format!("Output has unexpected shape: {}", e))
        })?;
        Ok((typed, outcome))
    }

    async fn attempt(
        &self,
        step: &dyn Step,
        request: &ModelRequest,
        call_id: CallId,
        attachment: &LedgerAttachment,
        ledger: &dyn LedgerStore,
        state: &Mutex<Attempts>,
    ) -> Result<Value, RetryError<StepError>> {
        let attempt = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.count += 1;
            state.count
        };

        let started_at = Utc::now();
        let call = {
            let _permit = match self.limiter_for(request.model()) {
                Some(limiter) => Some(limiter.acquire(estimate_tokens(request)).await),
                None => None,
            };
            let timeout = self.retry.call_timeout();
            tokio::time::timeout(timeout, self.client.call(request))
                .await
                .unwrap_or_else(|_| {
                    Err(ModelError::new(ModelErrorKind::Timeout(
                        timeout.as_millis() as u64,
                    )))
                })
        };

        let (result, usage, cost, cached, response_ref) = match call {
            Ok(response) => {
                let cost = self.cost_of(&response, request.model());
                let usage = response.usage;
                let cached = response.cached;
                let response_ref = response.response_ref.clone();
                (step.parse_output(response.content), usage, cost, cached, response_ref)
            }
            Err(e) => (
                Err(StepError::from_model(step.name(), &e)),
                TokenUsage::default(),
                0.0,
                false,
                None,
            ),
        };

        let entry = LedgerEntryBuilder::default()
            .call_id(call_id)
            .attachment(attachment.clone())
            .provider(self.client.provider_name())
            .model(request.model().clone())
            .usage(usage)
            .cost_estimate(cost)
            .status(if result.is_ok() {
                LedgerStatus::Succeeded
            } else {
                LedgerStatus::Failed
            })
            .retry_attempt(attempt)
            .cached(cached)
            .error_message(result.as_ref().err().map(|e| e.kind.to_string()))
            .started_at(started_at)
            .completed_at(Utc::now())
            .response_ref(response_ref)
            .build()
            .map_err(|e| {
                RetryError::Permanent(StepError::fatal(
                    step.name(),
                    format!("Invalid ledger entry: {}", e),
                ))
            })?;
        ledger.append(&entry).await.map_err(|e| {
            RetryError::Permanent(StepError::fatal(
                step.name(),
                format!("Request ledger unavailable: {}", e.kind),
            ))
        })?;

        {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.usage.add(&usage);
            state.cost += cost;
            state.ledger_entry_ids.push(*entry.id());
        }
        debug!(attempt, %call_id, ok = result.is_ok(), "Model call attempt recorded");

        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                warn!(attempt, error = %e.kind, "Transient step failure, will retry");
                Err(RetryError::Transient {
                    err: e,
                    retry_after: None,
                })
            }
            Err(e) => {
                warn!(attempt, error = %e.kind, "Permanent step failure, failing immediately");
                Err(RetryError::Permanent(e))
            }
        }
    }
}

/// Rough token estimate for rate limiting: four characters per token.
fn estimate_tokens(request: &ModelRequest) -> u64 {
    let chars: usize = request.messages().iter().map(|m| m.content.len()).sum();
    (chars / 4).max(1) as u64
}
