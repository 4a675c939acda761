//! Worker settings
//!
//! Every field has a default, so an empty or absent YAML file yields a
//! working configuration. The file is chosen by an explicit path or by the
//! `EKS_WORKFLOW_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "EKS_WORKFLOW_CONFIG";

/// Top-level worker settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// CloudFormation stack polling
    pub stack_waiter: PollSettings,
    /// Node pool sizing and fulfillment
    pub node_pool: NodePoolSettings,
    /// Waiting for load balancers to be released before VPC teardown
    pub load_balancer: PollSettings,
    /// Kubernetes bootstrap after the control plane is up
    pub bootstrap: BootstrapSettings,
    /// Timeouts and retry policies of activities
    pub activities: ActivitySettings,
}

/// A fixed-interval, bounded poll loop
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollSettings {
    /// Seconds between polls
    pub poll_interval_secs: u64,
    /// Maximum number of polls
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            max_attempts: 180,
        }
    }
}

impl PollSettings {
    /// Interval between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Node pool settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodePoolSettings {
    /// Default root volume size in GiB, 0 when unset
    pub default_volume_size_gb: u32,
    /// Seconds between autoscaling group fulfillment checks
    pub fulfillment_poll_interval_secs: u64,
    /// Give up on fulfillment after this many seconds
    pub fulfillment_timeout_secs: u64,
    /// Register Kubernetes label sets while creating the cluster
    pub register_label_sets: bool,
}

impl Default for NodePoolSettings {
    fn default() -> Self {
        Self {
            default_volume_size_gb: 0,
            fulfillment_poll_interval_secs: 20,
            fulfillment_timeout_secs: 30 * 60,
            register_label_sets: true,
        }
    }
}

/// An EKS add-on installed by bootstrap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonSettings {
    /// Add-on name
    pub name: String,
    /// Add-on version, the cluster default when absent
    #[serde(default)]
    pub version: Option<String>,
}

/// Bootstrap settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BootstrapSettings {
    /// Add-ons installed on every new cluster
    pub addons: Vec<AddonSettings>,
    /// Name of the default storage class
    pub storage_class_name: String,
    /// EBS volume type backing the default storage class
    pub storage_class_volume_type: String,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        let addon = |name: &str| AddonSettings {
            name: name.to_string(),
            version: None,
        };
        Self {
            addons: vec![addon("vpc-cni"), addon("coredns"), addon("kube-proxy")],
            storage_class_name: "gp2".to_string(),
            storage_class_volume_type: "gp2".to_string(),
        }
    }
}

/// Timeouts and retry policy of one class of activities
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivityProfile {
    /// Seconds an activity may wait for a worker
    pub schedule_to_start_secs: u64,
    /// Seconds a single attempt may run
    pub start_to_close_secs: u64,
    /// Seconds without a heartbeat before an attempt counts as hung, 0 = off
    pub heartbeat_timeout_secs: u64,
    /// Retry policy
    pub retry: RetryPolicy,
}

impl Default for ActivityProfile {
    fn default() -> Self {
        Self {
            schedule_to_start_secs: 10 * 60,
            start_to_close_secs: 5 * 60,
            heartbeat_timeout_secs: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl ActivityProfile {
    /// Profile for stack and control plane steps that poll for a long time
    pub fn long_running() -> Self {
        Self {
            start_to_close_secs: 2 * 60 * 60,
            heartbeat_timeout_secs: 5 * 60,
            retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

/// Activity profiles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivitySettings {
    /// Short cloud and store calls
    pub default: ActivityProfile,
    /// Stack creation, control plane, fulfillment waits
    pub long_running: ActivityProfile,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            default: ActivityProfile::default(),
            long_running: ActivityProfile::long_running(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to `EKS_WORKFLOW_CONFIG` and
    /// then to the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let settings = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading settings");
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    Error::internal_with_context(
                        "settings",
                        format!("failed to read {}: {}", path.display(), e),
                    )
                })?;
                Self::from_yaml(&raw)?
            }
            None => {
                debug!("No settings file given, using defaults");
                Self::default()
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from YAML; an empty document yields the defaults
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|e| Error::serialization_for_kind("Settings", e.to_string()))
    }

    /// Reject settings that would make a poll loop or retry policy degenerate
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        for (name, poll) in [
            ("stackWaiter", &self.stack_waiter),
            ("loadBalancer", &self.load_balancer),
        ] {
            if poll.poll_interval_secs == 0 {
                violations.push(format!("{name}.pollIntervalSecs must be greater than 0"));
            }
            if poll.max_attempts == 0 {
                violations.push(format!("{name}.maxAttempts must be greater than 0"));
            }
        }

        if self.node_pool.fulfillment_poll_interval_secs == 0 {
            violations.push("nodePool.fulfillmentPollIntervalSecs must be greater than 0".into());
        }
        if self.node_pool.fulfillment_timeout_secs < self.node_pool.fulfillment_poll_interval_secs
        {
            violations.push(
                "nodePool.fulfillmentTimeoutSecs must not be shorter than the poll interval"
                    .into(),
            );
        }

        for (name, profile) in [
            ("activities.default", &self.activities.default),
            ("activities.longRunning", &self.activities.long_running),
        ] {
            if profile.start_to_close_secs == 0 {
                violations.push(format!("{name}.startToCloseSecs must be greater than 0"));
            }
            if profile.retry.backoff_coefficient < 1.0 {
                violations.push(format!(
                    "{name}.retry.backoffCoefficient must be at least 1.0"
                ));
            }
            if profile.retry.initial_interval_ms == 0 {
                violations.push(format!("{name}.retry.initialIntervalMs must be greater than 0"));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_for("settings", violations))
        }
    }
}
