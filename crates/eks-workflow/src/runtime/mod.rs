//! Durable-execution seam
//!
//! Workflow code only talks to a [`WorkflowContext`]: it hands over an
//! [`Activity`], the deterministic [`StepKey`] of the step and the step input,
//! and gets back the step output. Retries, timeouts, heartbeats and history
//! are the runtime's business. [`InlineRuntime`] is the in-process
//! implementation used by local hosts and tests.

mod inline;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eks_common::config::ActivityProfile;
use eks_common::retry::RetryPolicy;
use eks_common::{Error, Result, StepKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use inline::{HistoryEvent, InlineRuntime, Journal, StepOutcome};

/// Timeouts and retry policy of one activity
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityOptions {
    /// Maximum time the activity may wait for a worker
    pub schedule_to_start: Duration,
    /// Maximum duration of a single attempt
    pub start_to_close: Duration,
    /// An attempt without a heartbeat for this long counts as hung
    pub heartbeat_timeout: Option<Duration>,
    /// Retry policy across attempts
    pub retry: RetryPolicy,
}

impl From<&ActivityProfile> for ActivityOptions {
    fn from(profile: &ActivityProfile) -> Self {
        Self {
            schedule_to_start: Duration::from_secs(profile.schedule_to_start_secs),
            start_to_close: Duration::from_secs(profile.start_to_close_secs),
            heartbeat_timeout: (profile.heartbeat_timeout_secs > 0)
                .then(|| Duration::from_secs(profile.heartbeat_timeout_secs)),
            retry: profile.retry.clone(),
        }
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self::from(&ActivityProfile::default())
    }
}

/// One externally observable, independently retryable unit of work
///
/// Inputs and outputs are serde types so the runtime can journal them.
#[async_trait]
pub trait Activity: Send + Sync {
    /// Activity type name, stable across releases
    const NAME: &'static str;

    /// Step input
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Step output
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Timeouts and retry policy of this activity
    fn options(&self) -> ActivityOptions;

    /// Run one attempt
    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<Self::Output>;
}

/// Per-attempt context handed to a running activity
#[derive(Clone, Debug)]
pub struct ActivityContext {
    activity_id: String,
    attempt: u32,
    heartbeats: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl ActivityContext {
    /// Context for attempt `attempt` of `activity_id`
    pub fn new(activity_id: impl Into<String>, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            activity_id: activity_id.into(),
            attempt,
            heartbeats: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    /// Context outside of any runtime, for direct calls and tests
    pub fn detached(activity_id: impl Into<String>) -> Self {
        Self::new(activity_id, 1, CancellationToken::new())
    }

    /// Activity name and step key
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report liveness, with progress details for the logs
    pub fn heartbeat(&self, details: &impl Serialize) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        let details = serde_json::to_string(details).unwrap_or_default();
        debug!(activity = %self.activity_id, attempt = self.attempt, %details, "Heartbeat");
    }

    /// Number of heartbeats reported so far in this attempt
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Fail with [`Error::Cancelled`] once the owning workflow is cancelled
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the owning workflow is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// What workflow code may do: run steps
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Execute `activity` as step `step`
    ///
    /// Errors come back wrapped in [`Error::Activity`] naming the activity and
    /// step. A completed step is never executed twice for the same key.
    async fn execute_activity<A: Activity>(
        &self,
        activity: &A,
        step: &StepKey,
        input: A::Input,
    ) -> Result<A::Output>;

    /// Whether the workflow has been cancelled
    fn is_cancelled(&self) -> bool;
}
