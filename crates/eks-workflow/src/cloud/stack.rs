//! CloudFormation stack names, statuses and request types

use std::collections::BTreeMap;
use std::fmt;

use eks_common::{CLUSTER_TAG_KEY, STACK_NAME_PREFIX};
use serde::{Deserialize, Serialize};

/// Deterministic stack names
///
/// The name is the natural idempotency key of a stack: creating a stack
/// whose name already exists is a no-op.
pub struct StackName;

impl StackName {
    /// IAM roles stack of a cluster
    pub fn iam(cluster: &str) -> String {
        format!("{STACK_NAME_PREFIX}-iam-{cluster}")
    }

    /// VPC stack of a cluster
    pub fn vpc(cluster: &str) -> String {
        format!("{STACK_NAME_PREFIX}-vpc-{cluster}")
    }

    /// Subnet stack for `cidr`; characters a stack name cannot hold become `-`
    pub fn subnet(cluster: &str, cidr: &str) -> String {
        let cidr: String = cidr
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{}{}", Self::subnet_prefix(cluster), cidr)
    }

    /// Common prefix of every subnet stack of a cluster
    pub fn subnet_prefix(cluster: &str) -> String {
        format!("{STACK_NAME_PREFIX}-subnet-{cluster}-")
    }

    /// Autoscaling group stack of a node pool
    pub fn node_pool(cluster: &str, pool: &str) -> String {
        format!("{STACK_NAME_PREFIX}-nodepool-{cluster}-{pool}")
    }
}

/// Tags every stack of `cluster` carries
pub fn cluster_tags(cluster: &str, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut tags = extra.clone();
    tags.insert(CLUSTER_TAG_KEY.to_string(), cluster.to_string());
    tags
}

/// CloudFormation stack status
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StackStatus {
    /// CREATE_IN_PROGRESS
    CreateInProgress,
    /// CREATE_COMPLETE
    CreateComplete,
    /// CREATE_FAILED
    CreateFailed,
    /// ROLLBACK_IN_PROGRESS
    RollbackInProgress,
    /// ROLLBACK_COMPLETE
    RollbackComplete,
    /// ROLLBACK_FAILED
    RollbackFailed,
    /// UPDATE_IN_PROGRESS
    UpdateInProgress,
    /// UPDATE_COMPLETE_CLEANUP_IN_PROGRESS
    UpdateCompleteCleanupInProgress,
    /// UPDATE_COMPLETE
    UpdateComplete,
    /// UPDATE_FAILED
    UpdateFailed,
    /// UPDATE_ROLLBACK_IN_PROGRESS
    UpdateRollbackInProgress,
    /// UPDATE_ROLLBACK_COMPLETE
    UpdateRollbackComplete,
    /// UPDATE_ROLLBACK_FAILED
    UpdateRollbackFailed,
    /// DELETE_IN_PROGRESS
    DeleteInProgress,
    /// DELETE_COMPLETE
    DeleteComplete,
    /// DELETE_FAILED
    DeleteFailed,
    /// Any status this crate has no special handling for
    Other(String),
}

impl StackStatus {
    /// The CloudFormation status string
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Other(s) => s,
        }
    }

    /// Whether the stack is already gone or going
    pub fn is_deleting(&self) -> bool {
        matches!(self, Self::DeleteInProgress | Self::DeleteComplete)
    }
}

impl From<&str> for StackStatus {
    fn from(s: &str) -> Self {
        match s {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" => Self::CreateFailed,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateCompleteCleanupInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "DELETE_FAILED" => Self::DeleteFailed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StackStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<StackStatus> for String {
    fn from(status: StackStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static CloudFormation templates known to the stack API implementation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackTemplate {
    /// Cluster and node instance roles, optional cluster user
    Iam,
    /// VPC, route table and security groups
    Vpc,
    /// One subnet
    Subnet,
    /// Node pool launch template and autoscaling group
    NodePool,
}

/// Live state of a stack
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Stack id (ARN)
    pub stack_id: String,
    /// Stack name
    pub stack_name: String,
    /// Current status
    pub status: StackStatus,
    /// Reason attached to the current status, if any
    pub status_reason: Option<String>,
    /// Template outputs
    pub outputs: BTreeMap<String, String>,
    /// Template parameters
    pub parameters: BTreeMap<String, String>,
    /// Stack tags
    pub tags: BTreeMap<String, String>,
}

impl Default for StackStatus {
    fn default() -> Self {
        Self::CreateInProgress
    }
}

impl StackDescription {
    /// Output `key`, or a not-found error naming the stack
    pub fn output(&self, key: &str) -> eks_common::Result<&str> {
        self.outputs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                eks_common::Error::not_found("stack output", format!("{}.{}", self.stack_name, key))
            })
    }
}

/// A stack create or update request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRequest {
    /// Stack name
    pub stack_name: String,
    /// Template to instantiate
    pub template: StackTemplate,
    /// Template parameters
    pub parameters: BTreeMap<String, String>,
    /// Stack tags
    pub tags: BTreeMap<String, String>,
    /// Client request token
    pub request_token: String,
}

/// Result of a create request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateStackOutcome {
    /// The stack is being created
    Accepted {
        /// Stack id
        stack_id: String,
    },
    /// A stack with this name already exists
    AlreadyExists,
}

/// Result of an update request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateStackOutcome {
    /// The stack is being updated
    Accepted {
        /// Stack id
        stack_id: String,
    },
    /// The template and parameters are unchanged
    NoChanges,
}

/// Result of a delete request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStackOutcome {
    /// The stack is being deleted
    Accepted,
    /// No such stack
    NotFound,
}

/// Operation a waiter waits for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackOperation {
    /// Wait for CREATE_COMPLETE
    Create,
    /// Wait for UPDATE_COMPLETE
    Update,
    /// Wait for DELETE_COMPLETE or disappearance
    Delete,
}

impl fmt::Display for StackOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}
