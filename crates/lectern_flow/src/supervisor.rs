//! Detached execution of background runs.

use crate::engine::persist_terminal;
use futures::FutureExt;
use lectern_core::{Run, RunId};
use lectern_error::{FlowError, StorageError};
use lectern_interface::{PersistenceContext, PersistenceProvider};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Spawns background runs and tracks which are still in flight.
///
/// Each scheduled task gets its own [`PersistenceContext`], so nothing the
/// scheduling caller does afterwards can block or roll back its writes.
/// A task that panics is caught and its run is marked failed. Scheduled
/// work cannot be cancelled.
#[derive(Clone)]
pub struct BackgroundSupervisor {
    persistence: Arc<dyn PersistenceProvider>,
    tasks: Arc<RwLock<HashMap<RunId, JoinHandle<()>>>>,
}

impl std::fmt::Debug for BackgroundSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSupervisor")
            .field("active", &self.tasks.try_read().map(|t| t.len()).ok())
            .finish_non_exhaustive()
    }
}

impl BackgroundSupervisor {
    /// A supervisor opening task contexts from `persistence`.
    pub fn new(persistence: Arc<dyn PersistenceProvider>) -> Self {
        Self {
            persistence,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Launch `execute` as a detached task and return immediately.
    ///
    /// The receiver resolves to the terminal run, or to the error that kept
    /// its terminal state out of storage. The sender is dropped only when
    /// the task could not report a run, e.g. it vanished from storage after
    /// a panic.
    #[instrument(skip(self, execute), fields(run_id = %run_id))]
    pub async fn schedule<F, Fut>(
        &self,
        run_id: RunId,
        execute: F,
    ) -> Result<oneshot::Receiver<Result<Run, FlowError>>, StorageError>
    where
        F: FnOnce(PersistenceContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Run, FlowError>> + Send + 'static,
    {
        let context = self.persistence.open_context().await?;
        let (sender, receiver) = oneshot::channel();
        let tasks = Arc::clone(&self.tasks);

        // Hold the write lock across spawn so the task cannot untrack itself
        // before it is tracked.
        let mut tracked = self.tasks.write().await;
        let task_context = context.clone();
        let handle = tokio::spawn(
            async move {
                let outcome = AssertUnwindSafe(async move { execute(task_context).await })
                    .catch_unwind()
                    .await;
                let reported = match outcome {
                    Ok(result) => Some(result),
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(%message, "Background run panicked");
                        mark_panicked(&context, &run_id, &message).await
                    }
                };

                tasks.write().await.remove(&run_id);
                match reported {
                    Some(result) => {
                        match &result {
                            Ok(run) => info!(status = %run.status(), "Background run finished"),
                            Err(e) => error!(error = %e.kind, "Background run finished unsaved"),
                        }
                        if sender.send(result).is_err() {
                            debug!("Run handle dropped before completion");
                        }
                    }
                    None => warn!("Background run finished without a terminal record"),
                }
            }
            .instrument(info_span!("background_run", run_id = %run_id)),
        );
        tracked.insert(run_id, handle);
        debug!(active = tracked.len(), "Run scheduled");

        Ok(receiver)
    }

    /// Ids of runs still executing in this process.
    pub async fn active_runs(&self) -> Vec<RunId> {
        self.tasks.read().await.keys().copied().collect()
    }

    /// Whether a run is still executing in this process.
    pub async fn is_active(&self, run_id: &RunId) -> bool {
        self.tasks.read().await.contains_key(run_id)
    }

    /// Wait for every in-flight task to finish.
    #[instrument(skip(self))]
    pub async fn drain(&self) {
        let handles: Vec<(RunId, JoinHandle<()>)> = self.tasks.write().await.drain().collect();
        info!(count = handles.len(), "Draining background runs");
        for (run_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(%run_id, error = %e, "Background task ended abnormally");
            }
        }
    }
}

async fn mark_panicked(
    context: &PersistenceContext,
    run_id: &RunId,
    message: &str,
) -> Option<Result<Run, FlowError>> {
    let mut run = match context.runs.find_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => {
            error!("Panicked run is missing from storage");
            return None;
        }
        Err(e) => {
            error!(error = %e.kind, "Failed to load panicked run");
            return None;
        }
    };
    if run.is_terminal() {
        return Some(Ok(run));
    }

    let outputs = run.outputs().clone();
    if let Err(e) = run.fail(format!("panicked: {}", message), outputs) {
        error!(error = %e.kind, "Failed to mark panicked run");
        return Some(Ok(run));
    }
    Some(
        persist_terminal(context.runs.as_ref(), &run)
            .await
            .map(|()| run),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
