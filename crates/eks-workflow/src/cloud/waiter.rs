//! Stack waiter
//!
//! Polls a stack at a fixed interval until it reaches a success or failure
//! status of the operation being waited for. Every poll is reported as an
//! activity heartbeat. On a failure status the last failure event is fetched
//! and attached, and the result is classified: DELETE_FAILED may clear once
//! dependent resources are released and is retryable; every other failure
//! status is final and stops the retry policy.

use std::time::Duration;

use eks_common::config::PollSettings;
use eks_common::{Error, ErrorKind, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use super::stack::{StackDescription, StackOperation, StackStatus};
use super::StackApi;
use crate::runtime::ActivityContext;

/// What a poll decided
#[derive(Debug, PartialEq, Eq)]
enum Acceptor {
    Success,
    Failure { retryable: bool },
    Retry,
}

fn classify(operation: StackOperation, status: &StackStatus) -> Acceptor {
    use StackStatus::*;
    match (operation, status) {
        (StackOperation::Create, CreateComplete) => Acceptor::Success,
        (
            StackOperation::Create,
            CreateFailed | RollbackComplete | RollbackFailed | DeleteComplete | DeleteFailed,
        ) => Acceptor::Failure { retryable: false },

        (StackOperation::Update, UpdateComplete) => Acceptor::Success,
        (
            StackOperation::Update,
            UpdateFailed | UpdateRollbackComplete | UpdateRollbackFailed,
        ) => Acceptor::Failure { retryable: false },

        (StackOperation::Delete, DeleteComplete) => Acceptor::Success,
        (StackOperation::Delete, DeleteFailed) => Acceptor::Failure { retryable: true },
        (StackOperation::Delete, RollbackFailed | UpdateRollbackFailed) => {
            Acceptor::Failure { retryable: false }
        }

        _ => Acceptor::Retry,
    }
}

/// Waits for stacks to settle
#[derive(Clone, Debug)]
pub struct StackWaiter {
    poll_interval: Duration,
    max_attempts: u32,
}

impl StackWaiter {
    /// Waiter polling every `poll_interval` at most `max_attempts` times
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Waiter configured from settings
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self::new(settings.poll_interval(), settings.max_attempts)
    }

    /// Wait until `stack_name` completes `operation`
    ///
    /// Returns the final description, or `None` for a delete whose stack is
    /// gone.
    pub async fn wait(
        &self,
        api: &dyn StackApi,
        ctx: &ActivityContext,
        stack_name: &str,
        operation: StackOperation,
    ) -> Result<Option<StackDescription>> {
        for attempt in 1..=self.max_attempts {
            let described = match api.describe_stack(stack_name).await {
                Ok(d) => d,
                // A validation error from DescribeStacks means the stack is gone
                Err(e)
                    if operation == StackOperation::Delete
                        && matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Validation) =>
                {
                    None
                }
                Err(e) => return Err(e),
            };

            let Some(stack) = described else {
                ctx.heartbeat(&json!({"stack": stack_name, "attempt": attempt, "status": null}));
                if operation == StackOperation::Delete {
                    info!(stack = %stack_name, "Stack deleted");
                    return Ok(None);
                }
                return Err(Error::stack_failed(
                    stack_name,
                    "NOT_FOUND",
                    format!("stack disappeared while waiting for {operation}"),
                ));
            };

            ctx.heartbeat(&json!({
                "stack": stack_name,
                "attempt": attempt,
                "status": stack.status.as_str(),
            }));

            match classify(operation, &stack.status) {
                Acceptor::Success => {
                    info!(stack = %stack_name, status = %stack.status, "Stack reached target status");
                    return Ok(Some(stack));
                }
                Acceptor::Failure { retryable } => {
                    return Err(self.failure(api, &stack, retryable).await);
                }
                Acceptor::Retry => {
                    debug!(
                        stack = %stack_name,
                        status = %stack.status,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Stack not settled yet"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(stack = %stack_name, attempts = self.max_attempts, "Stack waiter timed out");
        Err(Error::timeout(format!("stack {stack_name}"), self.max_attempts))
    }

    async fn failure(&self, api: &dyn StackApi, stack: &StackDescription, retryable: bool) -> Error {
        let reason = match api.last_failure_reason(&stack.stack_name).await {
            Ok(Some(reason)) => reason,
            Ok(None) => stack.status_reason.clone().unwrap_or_default(),
            Err(e) => {
                warn!(stack = %stack.stack_name, error = %e, "Failed to fetch stack events");
                stack.status_reason.clone().unwrap_or_default()
            }
        };
        warn!(
            stack = %stack.stack_name,
            status = %stack.status,
            reason = %reason,
            retryable,
            "Stack reached failure status"
        );
        if retryable {
            Error::stack_failed_transient(&stack.stack_name, stack.status.as_str(), reason)
        } else {
            Error::stack_failed(&stack.stack_name, stack.status.as_str(), reason)
        }
    }
}
