//! Rate limiting of step execution per resolved model.

use lectern_core::{LedgerAttachment, ModelTier};
use lectern_flow::{StepExecutor, TextStep};
use lectern_interface::ModelClient;
use lectern_models::ScriptedModelClient;
use lectern_rate_limit::{LecternConfig, ModelTierConfig};
use lectern_storage::InMemoryLedgerStore;
use serde_json::json;
use std::sync::Arc;

/// Bundled config with the `gpt-4o` override tightened to one request per minute.
fn config_with_strict_override() -> LecternConfig {
    let mut config = LecternConfig::bundled().unwrap();
    let tier = config
        .providers
        .get_mut("openai")
        .unwrap()
        .tiers
        .get_mut("tier1")
        .unwrap();
    tier.models.insert(
        "gpt-4o".to_string(),
        ModelTierConfig {
            rpm: Some(1),
            tpm: Some(30_000),
            ..ModelTierConfig::default()
        },
    );
    config
}

fn executor(config: &LecternConfig) -> StepExecutor {
    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new().with_provider("openai"));
    StepExecutor::new(client, config)
}

#[test]
fn test_limiter_applies_model_override() {
    let config = config_with_strict_override();
    let executor = executor(&config);

    let deep = executor.limiter_for("gpt-4o").unwrap();
    assert_eq!(deep.inner().rpm, Some(1));
    assert_eq!(deep.inner().tpm, Some(30_000));
    assert_eq!(deep.inner().max_concurrent, Some(8));

    let fast = executor.limiter_for("gpt-4o-mini").unwrap();
    assert_eq!(fast.inner().rpm, Some(500));
    assert_eq!(fast.inner().tpm, Some(200_000));
}

#[test]
fn test_limiter_absent_without_tier() {
    let executor = executor(&LecternConfig::default());
    assert!(executor.limiter_for("gpt-4o").is_none());
}

#[tokio::test]
async fn test_model_override_throttles_its_calls_only() {
    let config = config_with_strict_override();
    let executor = executor(&config);
    let ledger = InMemoryLedgerStore::new();

    let step = TextStep::new("review", "Review: {{input.text}}")
        .unwrap()
        .with_tier(ModelTier::Deep);
    let outcome = executor
        .execute(
            &step,
            &json!({"input": {"text": "Halves and quarters"}}),
            LedgerAttachment::Detached,
            &ledger,
        )
        .await;
    assert!(outcome.output.is_ok());

    // The single gpt-4o request this minute is spent; the shared limiter refuses.
    assert!(executor.limiter_for("gpt-4o").unwrap().try_acquire(1).is_none());
    // Other models keep the tier's own budget.
    assert!(executor.limiter_for("gpt-4o-mini").unwrap().try_acquire(1).is_some());
}
