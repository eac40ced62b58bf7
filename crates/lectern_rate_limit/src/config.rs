//! Configuration structures.
//!
//! The configuration system supports:
//! - Bundled defaults (include_str! from lectern.toml)
//! - User overrides (~/.config/lectern/lectern.toml, then ./lectern.toml)
//! - Automatic merging with user values taking precedence

use crate::Tier;
use config::{Config, File, FileFormat};
use lectern_core::ModelTier;
use lectern_error::{ConfigError, LecternError, LecternResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_CONFIG: &str = include_str!("../../../lectern.toml");

/// Model-specific overrides of a tier.
///
/// ```toml
/// [providers.openai.tiers.tier1.models."gpt-4o"]
/// tpm = 30_000
/// cost_per_million_input_tokens = 2.50
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ModelTierConfig {
    /// Requests per minute limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    /// Tokens per minute limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpm: Option<u64>,
    /// Requests per day limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpd: Option<u32>,
    /// Maximum concurrent requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    /// Cost per million input tokens in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_million_input_tokens: Option<f64>,
    /// Cost per million output tokens in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_million_output_tokens: Option<f64>,
}

/// Limits and pricing of one provider tier.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TierConfig {
    /// Display name of the tier
    pub name: String,
    /// Requests per minute limit
    #[serde(default)]
    pub rpm: Option<u32>,
    /// Tokens per minute limit
    #[serde(default)]
    pub tpm: Option<u64>,
    /// Requests per day limit
    #[serde(default)]
    pub rpd: Option<u32>,
    /// Maximum concurrent requests
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    /// Cost per million input tokens in USD
    #[serde(default)]
    pub cost_per_million_input_tokens: Option<f64>,
    /// Cost per million output tokens in USD
    #[serde(default)]
    pub cost_per_million_output_tokens: Option<f64>,
    /// Model-specific overrides
    #[serde(default)]
    pub models: HashMap<String, ModelTierConfig>,
}

impl Tier for TierConfig {
    fn rpm(&self) -> Option<u32> {
        self.rpm
    }

    fn tpm(&self) -> Option<u64> {
        self.tpm
    }

    fn rpd(&self) -> Option<u32> {
        self.rpd
    }

    fn max_concurrent(&self) -> Option<u32> {
        self.max_concurrent
    }

    fn cost_per_million_input_tokens(&self) -> Option<f64> {
        self.cost_per_million_input_tokens
    }

    fn cost_per_million_output_tokens(&self) -> Option<f64> {
        self.cost_per_million_output_tokens
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TierConfig {
    /// This tier with the overrides for `model_name` applied.
    pub fn for_model(&self, model_name: &str) -> TierConfig {
        match self.models.get(model_name) {
            Some(model) => TierConfig {
                name: self.name.clone(),
                rpm: model.rpm.or(self.rpm),
                tpm: model.tpm.or(self.tpm),
                rpd: model.rpd.or(self.rpd),
                max_concurrent: model.max_concurrent.or(self.max_concurrent),
                cost_per_million_input_tokens: model
                    .cost_per_million_input_tokens
                    .or(self.cost_per_million_input_tokens),
                cost_per_million_output_tokens: model
                    .cost_per_million_output_tokens
                    .or(self.cost_per_million_output_tokens),
                models: HashMap::new(),
            },
            None => self.clone(),
        }
    }
}

/// Tiers offered by one provider.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Tier used when none is named
    pub default_tier: String,
    /// Tier name to tier configuration
    pub tiers: HashMap<String, TierConfig>,
}

/// Default model client settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Provider name used for ledger entries and tier lookup
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
        }
    }
}

/// Reasoning tier to model name mapping.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelsConfig {
    /// Model for [`ModelTier::Fast`]
    pub fast: String,
    /// Model for [`ModelTier::Balanced`]
    pub balanced: String,
    /// Model for [`ModelTier::Deep`]
    pub deep: String,
}

impl ModelsConfig {
    /// Model name configured for a tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Balanced => &self.balanced,
            ModelTier::Deep => &self.deep,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: "gpt-4o-mini".to_string(),
            balanced: "gpt-4o-mini".to_string(),
            deep: "gpt-4o".to_string(),
        }
    }
}

/// Step retry budget and call timeout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts per logical call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout applied to every model call attempt
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Flow engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlowConfig {
    /// Batch concurrency used when a batch does not declare one
    #[serde(default = "default_batch_concurrency")]
    pub default_batch_concurrency: usize,
    /// Non-terminal runs idle for longer than this are considered interrupted
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_stale_run_after_secs() -> u64 {
    3_600
}

impl FlowConfig {
    /// Stale threshold as a duration.
    pub fn stale_run_after(&self) -> Duration {
        Duration::from_secs(self.stale_run_after_secs)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_batch_concurrency: default_batch_concurrency(),
            stale_run_after_secs: default_stale_run_after_secs(),
        }
    }
}

/// Conversation session settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConversationConfig {
    /// Minimum confidence for the introduction to name a guessed topic
    #[serde(default = "default_intro_confidence_threshold")]
    pub intro_confidence_threshold: f64,
    /// Fewest quick replies offered
    #[serde(default = "default_min_quick_replies")]
    pub min_quick_replies: usize,
    /// Most quick replies offered
    #[serde(default = "default_max_quick_replies")]
    pub max_quick_replies: usize,
    /// Messages of history forwarded to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Reasoning tier used for replies
    #[serde(default)]
    pub tier: ModelTier,
}

fn default_intro_confidence_threshold() -> f64 {
    0.6
}

fn default_min_quick_replies() -> usize {
    2
}

fn default_max_quick_replies() -> usize {
    4
}

fn default_history_window() -> usize {
    20
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            intro_confidence_threshold: default_intro_confidence_threshold(),
            min_quick_replies: default_min_quick_replies(),
            max_quick_replies: default_max_quick_replies(),
            history_window: default_history_window(),
            tier: ModelTier::default(),
        }
    }
}

/// Top-level Lectern configuration.
///
/// # Example
///
/// ```
/// use lectern_core::ModelTier;
/// use lectern_rate_limit::LecternConfig;
///
/// let config = LecternConfig::bundled().unwrap();
/// assert_eq!(config.retry.max_attempts, 3);
/// assert_eq!(config.models.model_for(ModelTier::Deep), "gpt-4o");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct LecternConfig {
    /// Provider name to provider configuration
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Default model client settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Tier to model mapping
    #[serde(default)]
    pub models: ModelsConfig,
    /// Retry budget and timeouts
    #[serde(default)]
    pub retry: RetryConfig,
    /// Flow engine settings
    #[serde(default)]
    pub flow: FlowConfig,
    /// Conversation settings
    #[serde(default)]
    pub conversation: ConversationConfig,
}

fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> LecternResult<LecternConfig> {
    builder
        .build()
        .map_err(|e| {
            LecternError::from(ConfigError::new(format!(
                "Failed to build configuration: {}",
                e
            )))
        })?
        .try_deserialize()
        .map_err(|e| {
            LecternError::from(ConfigError::new(format!(
                "Failed to parse configuration: {}",
                e
            )))
        })
}

impl LecternConfig {
    /// The bundled defaults only.
    pub fn bundled() -> LecternResult<Self> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml: &str) -> LecternResult<Self> {
        build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    /// Load configuration from a specific file path.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> LecternResult<Self> {
        debug!("Loading configuration from file");
        build(Config::builder().add_source(File::from(path.as_ref())))
    }

    /// Load configuration with precedence: current dir > home dir > bundled defaults.
    ///
    /// User config files are optional and silently skipped if not found.
    #[instrument]
    pub fn load() -> LecternResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/lectern/lectern.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("lectern").required(false));

        build(builder)
    }

    /// Tier configuration for a provider.
    ///
    /// Uses the provider's default tier when `tier_name` is `None`.
    #[instrument(skip(self))]
    pub fn get_tier(&self, provider: &str, tier_name: Option<&str>) -> Option<TierConfig> {
        let provider_config = self.providers.get(provider)?;
        let tier = tier_name.unwrap_or(&provider_config.default_tier);
        debug!(provider, tier, "Looking up tier configuration");
        provider_config.tiers.get(tier).cloned()
    }

    /// Default tier of a provider with overrides for `model` applied.
    pub fn tier_for_model(&self, provider: &str, model: &str) -> Option<TierConfig> {
        self.get_tier(provider, None).map(|tier| tier.for_model(model))
    }

    /// Call timeout as a duration.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.retry.call_timeout_ms)
    }
}
