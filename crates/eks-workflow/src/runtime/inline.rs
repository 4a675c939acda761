//! In-process workflow runtime
//!
//! Runs activities on the current task under their retry policy and
//! start-to-close timeout, and keeps a journal of completed step outputs.
//! A runtime built from an earlier journal replays those steps instead of
//! executing them again, which is how a crashed execution resumes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use eks_common::retry::retry_with_policy;
use eks_common::{Error, Result, StepKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Activity, ActivityContext, ActivityOptions, WorkflowContext};

/// Completed step outputs keyed by step
pub type Journal = BTreeMap<StepKey, serde_json::Value>;

/// Outcome of one recorded attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum StepOutcome {
    /// The attempt succeeded
    Completed,
    /// The attempt failed with this message
    Failed(String),
    /// The output was taken from the journal
    Replayed,
}

/// One entry of the execution history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Step key
    pub step: StepKey,
    /// Activity type name
    pub activity: String,
    /// 1-based attempt, 0 for replays
    pub attempt: u32,
    /// What happened
    pub outcome: StepOutcome,
}

/// In-process [`WorkflowContext`]
///
/// Schedule-to-start timeouts do not apply: there is no task queue, every
/// activity starts immediately.
#[derive(Debug, Default)]
pub struct InlineRuntime {
    journal: Mutex<Journal>,
    history: Mutex<Vec<HistoryEvent>>,
    cancel: CancellationToken,
}

impl InlineRuntime {
    /// Runtime with an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime resuming from the journal of an earlier execution
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Mutex::new(journal),
            ..Self::default()
        }
    }

    /// Snapshot of the completed steps
    pub async fn journal(&self) -> Journal {
        self.journal.lock().await.clone()
    }

    /// Snapshot of the execution history, in order
    pub async fn history(&self) -> Vec<HistoryEvent> {
        self.history.lock().await.clone()
    }

    /// Token cancelling this runtime and every in-flight activity
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn record(&self, step: &StepKey, activity: &str, attempt: u32, outcome: StepOutcome) {
        self.history.lock().await.push(HistoryEvent {
            step: step.clone(),
            activity: activity.to_string(),
            attempt,
            outcome,
        });
    }

    async fn run_attempt<A: Activity>(
        &self,
        activity: &A,
        activity_id: &str,
        step: &StepKey,
        attempt: u32,
        input: A::Input,
        options: &ActivityOptions,
    ) -> Result<A::Output> {
        let ctx = ActivityContext::new(activity_id, attempt, self.cancel.child_token());
        debug!(activity = %activity_id, attempt, "Starting activity attempt");

        let work = tokio::time::timeout(options.start_to_close, activity.execute(&ctx, input));
        let result = match options.heartbeat_timeout {
            Some(heartbeat_timeout) => tokio::select! {
                r = work => r,
                e = heartbeat_watchdog(&ctx, heartbeat_timeout) => Ok(Err(e)),
            },
            None => work.await,
        };

        let result = match result {
            Ok(r) => r,
            Err(_) => Err(Error::timeout(
                format!("start-to-close of {activity_id}"),
                attempt,
            )),
        };

        let outcome = match &result {
            Ok(_) => StepOutcome::Completed,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        self.record(step, A::NAME, attempt, outcome).await;
        result
    }
}

/// Resolves with a timeout error once no heartbeat arrived for `timeout`
async fn heartbeat_watchdog(ctx: &ActivityContext, timeout: Duration) -> Error {
    let mut seen = ctx.heartbeat_count();
    loop {
        tokio::time::sleep(timeout).await;
        let now = ctx.heartbeat_count();
        if now == seen {
            warn!(activity = %ctx.activity_id(), "Activity missed its heartbeat");
            return Error::timeout(format!("heartbeat of {}", ctx.activity_id()), ctx.attempt());
        }
        seen = now;
    }
}

#[async_trait]
impl WorkflowContext for InlineRuntime {
    async fn execute_activity<A: Activity>(
        &self,
        activity: &A,
        step: &StepKey,
        input: A::Input,
    ) -> Result<A::Output> {
        let activity_id = format!("{}#{}", A::NAME, step);

        let replayed = self.journal.lock().await.get(step).cloned();
        if let Some(value) = replayed {
            debug!(activity = %activity_id, "Replaying completed step");
            self.record(step, A::NAME, 0, StepOutcome::Replayed).await;
            return serde_json::from_value(value)
                .map_err(|e| Error::serialization_for_kind(A::NAME, e.to_string()));
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled.in_activity(activity_id));
        }

        let options = activity.options();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            r = retry_with_policy(&options.retry, A::NAME, |attempt| {
                self.run_attempt(activity, &activity_id, step, attempt, input.clone(), &options)
            }) => r,
        };

        match result {
            Ok(output) => {
                let value = serde_json::to_value(&output)?;
                self.journal.lock().await.insert(step.clone(), value);
                info!(activity = %activity_id, "Activity completed");
                Ok(output)
            }
            Err(e) => Err(e.in_activity(activity_id)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
