//! Node pool descriptor and its validation rules

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Autoscaling bounds of a node pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Autoscaling {
    /// Whether the cluster autoscaler manages this pool
    pub enabled: bool,
    /// Lower bound on the group size
    pub min_size: u32,
    /// Upper bound on the group size
    pub max_size: u32,
}

/// Root volume encryption
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEncryption {
    /// Whether the root volume is encrypted
    pub enabled: bool,
    /// Customer managed KMS key; the account default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,
}

/// Root volume of every instance in the pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Requested size in GiB, 0 when unset
    #[serde(default)]
    pub size_gb: u32,
    /// EBS volume type (gp3, io2, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    /// Encryption settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<VolumeEncryption>,
}

/// A named, independently scaled group of worker machines
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolDescriptor {
    /// Name, unique within the cluster
    pub name: String,
    /// Desired number of nodes
    pub size: u32,
    /// Autoscaling bounds
    #[serde(default)]
    pub autoscaling: Autoscaling,
    /// EC2 instance type
    pub instance_type: String,
    /// Image reference (AMI id)
    #[serde(default)]
    pub image: String,
    /// Spot bid price, "0" or empty for on-demand
    #[serde(default)]
    pub spot_price: String,
    /// Root volume
    #[serde(default)]
    pub volume: VolumeSpec,
    /// Custom security groups attached in addition to the cluster's
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Subnet the pool must be placed in, in addition to its resolved subnets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Kubernetes node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodePoolDescriptor {
    /// Fixed-size on-demand pool with defaults for everything else
    pub fn fixed(name: impl Into<String>, size: u32, instance_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            autoscaling: Autoscaling::default(),
            instance_type: instance_type.into(),
            image: String::new(),
            spot_price: String::new(),
            volume: VolumeSpec::default(),
            security_groups: Vec::new(),
            subnet_id: None,
            labels: BTreeMap::new(),
        }
    }

    /// Autoscaling pool between `min_size` and `max_size`
    pub fn autoscaling(
        name: impl Into<String>,
        size: u32,
        min_size: u32,
        max_size: u32,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            autoscaling: Autoscaling {
                enabled: true,
                min_size,
                max_size,
            },
            ..Self::fixed(name, size, instance_type)
        }
    }

    /// Whether the pool runs on spot instances
    pub fn is_spot(&self) -> bool {
        !self.spot_price.is_empty() && self.spot_price.parse::<f64>().map_or(true, |p| p != 0.0)
    }

    /// Group bounds as applied to the autoscaling group
    ///
    /// Fixed-size pools pin min and max to the desired size.
    pub fn bounds(&self) -> (u32, u32) {
        if self.autoscaling.enabled {
            (self.autoscaling.min_size, self.autoscaling.max_size)
        } else {
            (self.size, self.size)
        }
    }

    /// Every violated invariant, prefixed with the pool name
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let name = if self.name.is_empty() {
            violations.push("node pool name must not be empty".to_string());
            "<unnamed>"
        } else {
            self.name.as_str()
        };

        if self.instance_type.trim().is_empty() {
            violations.push(format!("node pool {name}: instance type must not be empty"));
        }

        if self.autoscaling.enabled {
            let Autoscaling {
                min_size, max_size, ..
            } = self.autoscaling;
            if max_size <= min_size {
                violations.push(format!(
                    "node pool {name}: max size ({max_size}) must be greater than min size ({min_size})"
                ));
            }
            if self.size < min_size || self.size > max_size {
                violations.push(format!(
                    "node pool {name}: size ({}) must be between min size ({min_size}) and max size ({max_size})",
                    self.size
                ));
            }
        } else if self.size < 1 {
            violations.push(format!(
                "node pool {name}: size must be at least 1 when autoscaling is disabled"
            ));
        }

        if !self.spot_price.is_empty() && self.spot_price.parse::<f64>().is_err() {
            violations.push(format!(
                "node pool {name}: spot price {:?} is not a number",
                self.spot_price
            ));
        }

        violations
    }
}

/// Validate every pool of a cluster, including name uniqueness
///
/// Returns an [`Error::Validation`] listing all violations, before any cloud
/// mutation has been attempted.
pub fn validate_node_pools(cluster: &str, pools: &[NodePoolDescriptor]) -> crate::Result<()> {
    let mut violations: Vec<String> = pools.iter().flat_map(NodePoolDescriptor::validate).collect();

    let mut seen = BTreeSet::new();
    for pool in pools {
        if !pool.name.is_empty() && !seen.insert(pool.name.as_str()) {
            violations.push(format!("node pool {}: duplicate name", pool.name));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::validation_for(cluster, violations))
    }
}
