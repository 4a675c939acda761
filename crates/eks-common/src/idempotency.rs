//! Idempotency tokens and explicit workflow identity
//!
//! Every create/update call against the cloud carries a client request token
//! derived from the workflow identity and the step name. The same step of the
//! same workflow always produces the same token, so a retried or replayed step
//! is deduplicated by the cloud API instead of creating a second resource.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a client request token accepted by CloudFormation
pub const MAX_REQUEST_TOKEN_LEN: usize = 64;

const SEPARATOR: char = '-';

/// Build a request token from one or more elements.
///
/// Elements are joined with `-`, every run of characters outside
/// `[A-Za-z0-9]` becomes a single `-`, leading separators are dropped and the
/// result is truncated to [`MAX_REQUEST_TOKEN_LEN`]. An empty element list
/// yields the empty string.
pub fn request_token<S: AsRef<str>>(elements: &[S]) -> String {
    let mut token = String::with_capacity(MAX_REQUEST_TOKEN_LEN);
    let mut pending_separator = false;

    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            pending_separator = true;
        }
        for c in element.as_ref().chars() {
            if c.is_ascii_alphanumeric() {
                if pending_separator && !token.is_empty() {
                    token.push(SEPARATOR);
                }
                pending_separator = false;
                token.push(c);
            } else {
                pending_separator = true;
            }
            if token.len() >= MAX_REQUEST_TOKEN_LEN {
                token.truncate(MAX_REQUEST_TOKEN_LEN);
                return token;
            }
        }
    }

    token
}

/// Key of one step inside one workflow, used for journaling and for tokens
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepKey(String);

impl StepKey {
    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one workflow execution
///
/// `workflow_id` is stable across retries of the whole workflow and is the
/// seed of every request token. `run_id` changes per execution and is only
/// used for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    /// Stable workflow id
    pub workflow_id: String,
    /// Execution id of this run
    pub run_id: String,
}

impl WorkflowIdentity {
    /// Identity with an explicit run id
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Identity for a fresh run of `workflow_id`
    pub fn new_run(workflow_id: impl Into<String>) -> Self {
        Self::new(workflow_id, uuid::Uuid::new_v4().to_string())
    }

    /// Deterministic key for step `name` of this workflow
    pub fn step(&self, name: &str) -> StepKey {
        StepKey(format!("{}/{}", self.workflow_id, name))
    }

    /// Identity of a child workflow started by this one
    pub fn child(&self, name: &str) -> WorkflowIdentity {
        WorkflowIdentity {
            workflow_id: format!("{}/{}", self.workflow_id, name),
            run_id: self.run_id.clone(),
        }
    }

    /// Request token for step `name`
    pub fn request_token(&self, name: &str) -> String {
        request_token(&[self.workflow_id.as_str(), name])
    }
}
