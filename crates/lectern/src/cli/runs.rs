//! Run inspection and recovery command handlers.

use lectern::{FlowError, FlowErrorKind, JsonError, Lectern, LecternResult, RunId};
use std::time::Duration;

/// Print a run snapshot as JSON.
pub async fn show_status(lectern: &Lectern, run_id: &str) -> LecternResult<()> {
    let id: RunId = run_id
        .parse()
        .map_err(|e| FlowError::new(FlowErrorKind::RunNotFound(format!("{} ({})", run_id, e))))?;
    let snapshot = lectern
        .engine()
        .get_run(&id)
        .await?
        .ok_or_else(|| FlowError::new(FlowErrorKind::RunNotFound(run_id.to_string())))?;
    let json =
        serde_json::to_string_pretty(&snapshot).map_err(|e| JsonError::new(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

/// Fail runs that stopped making progress.
pub async fn sweep(lectern: &Lectern, stale_after_secs: Option<u64>) -> LecternResult<()> {
    let older_than = stale_after_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| lectern.config().flow.stale_run_after());
    let recovered = lectern.engine().recover_stale_runs(older_than).await?;
    if recovered.is_empty() {
        println!("No stale runs");
    } else {
        println!("Marked {} stale run(s) as interrupted:", recovered.len());
        for id in recovered {
            println!("  {}", id);
        }
    }
    Ok(())
}
