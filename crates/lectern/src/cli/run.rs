//! Flow execution command handler.

use lectern::{
    BackendError, ExecutionMode, Flow, FlowDefinition, JsonError, Lectern, LecternResult, Run,
};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const PROGRESS_POLL: Duration = Duration::from_millis(500);

/// Parse run inputs given inline or as `@path`.
pub fn parse_input(input: &str) -> LecternResult<Value> {
    let text = match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| BackendError::new(format!("Failed to read {}: {}", path, e)))?,
        None => input.to_string(),
    };
    let value = serde_json::from_str(&text)
        .map_err(|e| JsonError::new(format!("Run inputs are not valid JSON: {}", e)))?;
    Ok(value)
}

/// Load a flow definition file.
pub fn load_flow(path: &Path, default_concurrency: usize) -> LecternResult<Flow> {
    Ok(FlowDefinition::from_file(path)?.into_flow(default_concurrency)?)
}

/// Run a registered flow and print its outputs.
///
/// Background runs are detached from the command; the command polls the
/// stored run and prints progress until the run is terminal.
pub async fn run_flow(
    lectern: &Lectern,
    flow_name: &str,
    input: &str,
    background: bool,
) -> LecternResult<()> {
    let inputs = parse_input(input)?;
    let mode = if background {
        ExecutionMode::Background
    } else {
        ExecutionMode::Sync
    };

    let handle = lectern.engine().start(flow_name, inputs, mode).await?;
    let run_id = *handle.run_id();
    info!(%run_id, flow = flow_name, %mode, "Run started");

    if background {
        println!("Started run {}", run_id);
        let mut last_progress = None;
        loop {
            if let Some(snapshot) = lectern.engine().get_run(&run_id).await? {
                let progress = *snapshot.run.step_progress();
                if last_progress != Some(progress) {
                    println!(
                        "  {}/{} stages complete{}",
                        progress,
                        snapshot.run.total_steps(),
                        snapshot
                            .run
                            .current_step()
                            .as_ref()
                            .map(|s| format!(" (at {})", s))
                            .unwrap_or_default()
                    );
                    last_progress = Some(progress);
                }
                if snapshot.run.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(PROGRESS_POLL).await;
        }
    }

    let run = handle.wait().await?;
    print_run(&run)
}

fn print_run(run: &Run) -> LecternResult<()> {
    println!("Run {} {}", run.id(), run.status());
    if let Some(completion) = run.completion() {
        println!("Completion: {}", completion);
    }
    for item in run.failed_items() {
        println!("  failed {} [{}]: {}", item.item, item.kind, item.message);
    }
    if let Some(message) = run.error_message() {
        println!("Error: {}", message);
    }
    println!(
        "Tokens: {} (cost ${:.4})",
        run.usage().total_tokens,
        run.cost_estimate()
    );
    if let Some(outputs) = run.outputs() {
        let json = serde_json::to_string_pretty(outputs)
            .map_err(|e| JsonError::new(e.to_string()))?;
        println!("{}", json);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_inline_input() {
        let value = parse_input(r#"{"topic": "ratios"}"#).unwrap();
        assert_eq!(value, json!({"topic": "ratios"}));
    }

    #[test]
    fn test_parse_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        std::fs::write(&path, r#"{"parts": [1, 2]}"#).unwrap();

        let value = parse_input(&format!("@{}", path.display())).unwrap();
        assert_eq!(value, json!({"parts": [1, 2]}));
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(parse_input("{not json").is_err());
        assert!(parse_input("@/definitely/missing.json").is_err());
    }
}
