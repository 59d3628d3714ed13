//! Backend that delegates to the orchestrator.
//!
//! Each script run or script authoring job becomes one `generate_asset`
//! request, and each validation one `validate_script` request. Correlated
//! `task_update` frames drive progress until a terminal status arrives.

use crate::backend::{
    Backend, BackendError, BackendResult, ProgressReporter, ScriptGenerator, ScriptingBackend,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use swarmforge_client::{PendingResponse, RequestTagger};
use swarmforge_core::{
    AssetKind, GenerateAsset, Outbound, SCRIPT_ASSET_TYPE, ScriptParams, ScriptSpec, TaskOutcome,
    TaskUpdate, ValidateScript,
};
use tracing::{debug, info, warn};

/// Share of the remaining distance covered by each in-progress update.
const PROGRESS_STEP: f32 = 0.25;

pub struct RemoteScriptingBackend {
    tagger: RequestTagger,
    update_timeout: Duration,
    /// correlation id -> orchestrator request ids, one per run in flight
    active: Mutex<HashMap<String, Vec<String>>>,
}

impl RemoteScriptingBackend {
    pub fn new(tagger: RequestTagger, update_timeout: Duration) -> Self {
        Self {
            tagger,
            update_timeout,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Orchestrator request ids currently running under `correlation_id`.
    pub fn active_requests(&self, correlation_id: &str) -> Vec<String> {
        self.active().get(correlation_id).cloned().unwrap_or_default()
    }

    fn track(&self, correlation_id: &str, request_id: &str) -> ActiveGuard<'_> {
        self.active()
            .entry(correlation_id.to_string())
            .or_default()
            .push(request_id.to_string());
        ActiveGuard {
            backend: self,
            correlation_id: correlation_id.to_string(),
            request_id: request_id.to_string(),
        }
    }

    /// Send `data` and follow its task updates to the end.
    ///
    /// Returns the terminal update, which is either completed or failed.
    async fn run_task<T: Outbound>(
        &self,
        data: T,
        progress: &ProgressReporter,
    ) -> BackendResult<TaskUpdate> {
        let mut pending = self.tagger.request::<T, TaskUpdate>(data).await?;
        let _guard = self.track(progress.request_id(), pending.request_id());
        info!(
            request_id = pending.request_id(),
            message_type = T::TYPE,
            "task submitted to orchestrator"
        );
        progress.report(0.0, "Submitted");
        self.follow(&mut pending, progress).await
    }

    async fn follow(
        &self,
        pending: &mut PendingResponse<TaskUpdate>,
        progress: &ProgressReporter,
    ) -> BackendResult<TaskUpdate> {
        let mut fraction = 0.0;
        loop {
            let update = pending.next(self.update_timeout).await?.into_data();
            fraction = next_fraction(fraction, &update);
            progress.report(fraction, status_text(&update));

            match update.outcome() {
                TaskOutcome::InProgress => continue,
                TaskOutcome::Completed | TaskOutcome::Failed => return Ok(update),
                TaskOutcome::Cancelled => return Err(BackendError::Cancelled),
            }
        }
    }
}

/// Removes one run's entry however the run ends.
struct ActiveGuard<'a> {
    backend: &'a RemoteScriptingBackend,
    correlation_id: String,
    request_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.backend.active();
        if let Some(ids) = active.get_mut(&self.correlation_id) {
            ids.retain(|id| *id != self.request_id);
            if ids.is_empty() {
                active.remove(&self.correlation_id);
            }
        }
    }
}

/// Advance `last` toward 1.0 without ever moving backwards.
fn next_fraction(last: f32, update: &TaskUpdate) -> f32 {
    match update.outcome() {
        TaskOutcome::Completed => 1.0,
        TaskOutcome::InProgress => last + (1.0 - last) * PROGRESS_STEP,
        TaskOutcome::Failed | TaskOutcome::Cancelled => last,
    }
}

fn status_text(update: &TaskUpdate) -> String {
    match update.description.as_deref() {
        Some(description) if !description.is_empty() => {
            format!("{}: {description}", update.status)
        }
        _ => update.status.clone(),
    }
}

/// Locator from a completed update, or the failure it reports.
fn locator(update: TaskUpdate) -> BackendResult<Option<String>> {
    if update.outcome() == TaskOutcome::Failed {
        let reason = update.details.unwrap_or(update.status);
        return Err(BackendError::Failed(format!(
            "orchestrator task {} failed: {reason}",
            update.task_id
        )));
    }
    Ok(update
        .details
        .filter(|details| !details.is_empty())
        .or(update.description.filter(|d| !d.is_empty())))
}

#[async_trait]
impl Backend for RemoteScriptingBackend {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn cancel(&self, correlation_id: &str) -> bool {
        let targets = self.active_requests(correlation_id);
        if targets.is_empty() {
            debug!(correlation_id, "nothing to cancel");
            return false;
        }
        let mut sent = false;
        for target in targets {
            match self.tagger.cancel_task(target).await {
                Ok(_) => sent = true,
                Err(error) => warn!(correlation_id, %error, "failed to send cancel_task"),
            }
        }
        sent
    }
}

#[async_trait]
impl ScriptingBackend for RemoteScriptingBackend {
    async fn execute_script(
        &self,
        params: &ScriptParams,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        let parameters = serde_json::to_value(params)
            .map_err(|error| BackendError::InvalidInput(error.to_string()))?;
        debug!(script = %params.script_path, "running script remotely");
        let update = self
            .run_task(
                GenerateAsset {
                    asset_type: AssetKind::Scripting.tag().to_string(),
                    parameters,
                },
                progress,
            )
            .await?;
        locator(update)
    }

    async fn import_file(
        &self,
        _path: &str,
        _progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        Err(BackendError::Unsupported {
            backend: self.name().to_string(),
            operation: "import_file",
        })
    }
}

#[async_trait]
impl ScriptGenerator for RemoteScriptingBackend {
    async fn generate_script(
        &self,
        spec: &ScriptSpec,
        progress: &ProgressReporter,
    ) -> BackendResult<Option<String>> {
        if spec.name.trim().is_empty() {
            return Err(BackendError::InvalidInput("script name is empty".to_string()));
        }
        let parameters = serde_json::to_value(spec)
            .map_err(|error| BackendError::InvalidInput(error.to_string()))?;
        debug!(script = %spec.name, "requesting script");
        let update = self
            .run_task(
                GenerateAsset {
                    asset_type: SCRIPT_ASSET_TYPE.to_string(),
                    parameters,
                },
                progress,
            )
            .await?;
        locator(update)
    }

    async fn validate_script(
        &self,
        script_content: &str,
        progress: &ProgressReporter,
    ) -> BackendResult<bool> {
        let update = self
            .run_task(
                ValidateScript {
                    script_content: script_content.to_string(),
                },
                progress,
            )
            .await?;
        if update.outcome() == TaskOutcome::Failed {
            let reason = update.details.as_deref().unwrap_or(&update.status);
            info!(task_id = %update.task_id, reason, "script rejected");
            return Ok(false);
        }
        Ok(true)
    }
}
