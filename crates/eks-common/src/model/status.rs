//! Cluster and node pool status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted cluster status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    /// Infrastructure is being created
    Creating,
    /// Cluster or one of its node pools is being updated
    Updating,
    /// Every stage succeeded
    Running,
    /// The cluster works but part of it failed (e.g. one node pool)
    Warning,
    /// A fatal failure
    Error,
    /// Infrastructure is being torn down
    Deleting,
}

impl ClusterStatus {
    /// Whether no workflow is operating on the cluster in this status
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Running | Self::Warning | Self::Error)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Running => "RUNNING",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// Persisted node pool status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodePoolStatus {
    /// Autoscaling group stack is being created
    Creating,
    /// Autoscaling group stack is being updated
    Updating,
    /// Autoscaling group stack is being deleted
    Deleting,
    /// Last operation failed
    Error,
    /// Last operation succeeded
    Active,
}

impl NodePoolStatus {
    /// Whether the pool is in an error state
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl fmt::Display for NodePoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Error => "ERROR",
            Self::Active => "ACTIVE",
        };
        f.write_str(s)
    }
}
