//! Common types for EKS infrastructure orchestration: errors, descriptors,
//! retry, idempotency tokens and node pool fingerprints

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod idempotency;
pub mod model;
pub mod retry;
pub mod telemetry;

pub use error::{BranchError, Error, ErrorKind, WorkflowFailure};
pub use fingerprint::NodePoolVersion;
pub use idempotency::{request_token, StepKey, WorkflowIdentity};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix of every CloudFormation stack owned by this system
pub const STACK_NAME_PREFIX: &str = "pipeline-eks";

/// Tag key carrying the cluster name on every stack
pub const CLUSTER_TAG_KEY: &str = "pipeline-eks-cluster";

/// Root volume size used when neither the pool nor the settings give one
pub const FALLBACK_VOLUME_SIZE_GB: u32 = 50;
