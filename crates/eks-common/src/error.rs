//! Error types for EKS infrastructure orchestration
//!
//! Errors are structured with fields to aid debugging in production.
//! Every variant maps onto one [`ErrorKind`] so the orchestrator can tell a
//! deliberately fatal condition (bad descriptor, permanently failed stack)
//! apart from a transient one that is safe to retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Coarse classification of an [`Error`], used by retry policies and by the
/// serialized workflow result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Caller-supplied descriptor violates an invariant
    Validation,
    /// Recoverable cloud or store failure (throttling, eventual consistency)
    Transient,
    /// A stack reached a terminal failure status
    FinalStackFailure,
    /// A waiter exhausted its attempts without reaching a terminal status
    Timeout,
    /// One or more parallel branches failed
    PartialFailure,
    /// A resource that had to exist was not found
    NotFound,
    /// The workflow was cancelled
    Cancelled,
    /// Programming or serialization error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::FinalStackFailure => "final_stack_failure",
            Self::Timeout => "timeout",
            Self::PartialFailure => "partial_failure",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Main error type for orchestration operations
#[derive(Debug, Error)]
pub enum Error {
    /// Descriptor validation failed before any cloud mutation
    #[error("validation error for {cluster}: {}", .violations.join("; "))]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Every violated invariant, in descriptor order
        violations: Vec<String>,
    },

    /// Cloud API call failed
    #[error("cloud error [{operation}]: {message}")]
    Cloud {
        /// The remote operation (e.g. "cloudformation:CreateStack")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// A stack reached a terminal failure status
    #[error("stack {stack} reached {status}: {reason}")]
    StackFailed {
        /// Stack name
        stack: String,
        /// Terminal status (e.g. CREATE_FAILED)
        status: String,
        /// Last failure reason reported by the stack events
        reason: String,
        /// Final failures stop the retry policy immediately
        permanent: bool,
    },

    /// A waiter ran out of attempts
    #[error("timed out waiting for {resource} after {attempts} attempts")]
    Timeout {
        /// The resource being waited on
        resource: String,
        /// Number of polls performed
        attempts: u32,
    },

    /// A required resource does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "cluster", "image")
        kind: String,
        /// Resource name or ID
        name: String,
    },

    /// One or more parallel branches failed
    #[error("{stage}: {} of {total} failed: {}", .errors.len(), join_branches(.errors))]
    PartialFailure {
        /// The fan-out stage (e.g. "subnets", "node pools")
        stage: String,
        /// Number of branches started
        total: usize,
        /// Every branch error, each tagged with its identity
        errors: Vec<BranchError>,
    },

    /// An activity failed (the runtime's transport wrapper)
    #[error("activity {activity} failed: {source}")]
    Activity {
        /// Activity id (name + step key)
        activity: String,
        /// The error returned by the activity's last attempt
        #[source]
        source: Box<Error>,
    },

    /// Step-identifying context added while crossing a layer
    #[error("{context}: {source}")]
    Context {
        /// What was being done
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Persistence collaborator failure
    #[error("store error [{store}]: {message}")]
    Store {
        /// Which store failed (cluster, node pool, secret)
        store: String,
        /// Description of what failed
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The type being serialized (if known)
        kind: Option<String>,
    },

    /// The workflow was cancelled before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

/// An error from one branch of a parallel fan-out
#[derive(Debug)]
pub struct BranchError {
    /// Identity of the failing branch (node pool name, subnet CIDR, ...)
    pub branch: String,
    /// The branch's error
    pub error: Error,
}

impl BranchError {
    /// Tag an error with its branch identity
    pub fn new(branch: impl Into<String>, error: Error) -> Self {
        Self {
            branch: branch.into(),
            error,
        }
    }
}

impl fmt::Display for BranchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.branch, self.error)
    }
}

fn join_branches(errors: &[BranchError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Serialized form of a failed workflow, returned at the orchestration boundary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    /// Error classification
    pub kind: ErrorKind,
    /// Whether re-invoking the same workflow identity may succeed
    pub retryable: bool,
    /// Human-readable detail
    pub detail: String,
}

impl Error {
    /// Create a validation error with a single violation
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            violations: vec![msg.into()],
        }
    }

    /// Create a validation error with cluster context and every violation found
    pub fn validation_for(cluster: impl Into<String>, violations: Vec<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            violations,
        }
    }

    /// Create a retryable cloud error
    pub fn cloud(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable cloud error (e.g. access denied, malformed request)
    pub fn cloud_permanent(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a final stack failure
    pub fn stack_failed(
        stack: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StackFailed {
            stack: stack.into(),
            status: status.into(),
            reason: reason.into(),
            permanent: true,
        }
    }

    /// Create a stack failure that a later attempt may get past (e.g. DELETE_FAILED
    /// while dependent resources are still being released)
    pub fn stack_failed_transient(
        stack: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StackFailed {
            stack: stack.into(),
            status: status.into(),
            reason: reason.into(),
            permanent: false,
        }
    }

    /// Create a waiter timeout error
    pub fn timeout(resource: impl Into<String>, attempts: u32) -> Self {
        Self::Timeout {
            resource: resource.into(),
            attempts,
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Combine branch errors from a fan-out stage
    pub fn partial(stage: impl Into<String>, total: usize, errors: Vec<BranchError>) -> Self {
        Self::PartialFailure {
            stage: stage.into(),
            total,
            errors,
        }
    }

    /// Create a store error
    pub fn store(store: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            store: store.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with type context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap this error in the activity transport layer
    pub fn in_activity(self, activity: impl Into<String>) -> Self {
        Self::Activity {
            activity: activity.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with step-identifying context
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through activity and context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Cloud { .. } | Error::Store { .. } | Error::Kube { .. } => {
                ErrorKind::Transient
            }
            Error::StackFailed { permanent, .. } => {
                if *permanent {
                    ErrorKind::FinalStackFailure
                } else {
                    ErrorKind::Transient
                }
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::PartialFailure { .. } => ErrorKind::PartialFailure,
            Error::Activity { source, .. } | Error::Context { source, .. } => source.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Serialization { .. } | Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, final stack failures, cancellation and serialization errors
    /// are not retryable. Partial failures are retryable only when every branch is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 429
            ),
            Error::Cloud { retryable, .. } => *retryable,
            Error::StackFailed { permanent, .. } => !permanent,
            Error::Store { .. } | Error::Timeout { .. } | Error::Internal { .. } => true,
            Error::Validation { .. }
            | Error::NotFound { .. }
            | Error::Cancelled
            | Error::Serialization { .. } => false,
            Error::PartialFailure { errors, .. } => errors.iter().all(|b| b.error.is_retryable()),
            Error::Activity { source, .. } | Error::Context { source, .. } => {
                source.is_retryable()
            }
        }
    }

    /// Strip activity and context wrappers, returning the deepest cause
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Activity { source, .. } | Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Message suitable for the persisted cluster/node pool status
    ///
    /// Transport wrapping is stripped so a user sees "stack ... reached
    /// CREATE_FAILED: ..." instead of the activity envelope around it.
    pub fn user_message(&self) -> String {
        match self.root_cause() {
            Error::Validation { violations, .. } => violations.join("; "),
            Error::Cloud { message, .. } => message.clone(),
            Error::StackFailed { reason, status, .. } if !reason.is_empty() => {
                format!("{}: {}", status, reason)
            }
            Error::PartialFailure { errors, .. } => errors
                .iter()
                .map(|b| format!("{}: {}", b.branch, b.error.user_message()))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }

    /// Serialized boundary form of this error
    pub fn to_failure(&self) -> WorkflowFailure {
        WorkflowFailure {
            kind: self.kind(),
            retryable: self.is_retryable(),
            detail: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            message: e.to_string(),
            kind: None,
        }
    }
}
