//! Cluster infrastructure descriptor and the persisted cluster model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node_pool::NodePoolDescriptor;
use super::status::ClusterStatus;
use crate::Error;

/// Identity of a cluster within an organization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentity {
    /// Generic cluster id in the cluster store
    pub id: u64,
    /// Globally unique id
    pub uid: String,
    /// Cluster name, used in every stack name
    pub name: String,
    /// Owning organization
    pub organization_id: u64,
    /// Cloud region
    pub region: String,
    /// Reference to the cloud credential secret
    pub secret_id: String,
}

/// VPC parameters: an existing VPC or one to be created
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Existing VPC id; a new VPC is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// CIDR of the VPC to create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    /// Existing route table id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
}

/// IAM parameters: existing roles or roles to be created
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamSpec {
    /// Existing control plane role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_role_id: Option<String>,
    /// Existing node instance role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_instance_role_id: Option<String>,
    /// Use the caller's IAM user instead of creating a cluster user
    #[serde(default)]
    pub default_user: bool,
}

/// Envelope encryption of Kubernetes secrets
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// KMS key used for secret encryption
    pub provider_key_arn: String,
    /// Resources to encrypt, usually ["secrets"]
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Control plane log types shipped to the log service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Enabled log types (api, audit, authenticator, ...)
    #[serde(default)]
    pub enabled_types: Vec<String>,
}

/// Where the control plane endpoint is reachable from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAccess {
    /// Reachable from the internet
    pub public: bool,
    /// Reachable from within the VPC
    pub private: bool,
}

impl Default for EndpointAccess {
    fn default() -> Self {
        Self {
            public: true,
            private: false,
        }
    }
}

/// A subnet request: create one from a CIDR or use an existing one
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum SubnetSpec {
    /// Use an existing subnet
    #[serde(rename_all = "camelCase")]
    Existing {
        /// Subnet id
        subnet_id: String,
    },
    /// Create a subnet stack
    #[serde(rename_all = "camelCase")]
    New {
        /// Subnet CIDR
        cidr: String,
        /// Availability zone, chosen by the cloud when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        availability_zone: Option<String>,
    },
}

impl SubnetSpec {
    /// Stable identity of the spec, used to tag fan-out branch errors
    pub fn identity(&self) -> &str {
        match self {
            SubnetSpec::Existing { subnet_id } => subnet_id,
            SubnetSpec::New { cidr, .. } => cidr,
        }
    }
}

/// A resolved subnet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet id
    pub subnet_id: String,
    /// Subnet CIDR
    pub cidr: String,
    /// Availability zone
    pub availability_zone: String,
}

/// SSH key attached to the worker nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SshKeySpec {
    /// Generated public key that has to be imported into the account
    Generated {
        /// OpenSSH public key material
        public_key: String,
    },
    /// Key pair that already exists in the account
    Existing {
        /// Key pair name
        key_name: String,
    },
}

/// Everything needed to create the infrastructure of one cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfraDescriptor {
    /// Cluster identity
    pub cluster: ClusterIdentity,
    /// VPC parameters
    #[serde(default)]
    pub network: NetworkSpec,
    /// IAM parameters
    #[serde(default)]
    pub iam: IamSpec,
    /// Kubernetes version of the control plane
    pub kubernetes_version: String,
    /// Secret encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionConfig>,
    /// Control plane logging
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Endpoint access
    #[serde(default)]
    pub endpoint_access: EndpointAccess,
    /// SSH key for the worker nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SshKeySpec>,
    /// Cluster subnets
    pub subnets: Vec<SubnetSpec>,
    /// Node pools
    #[serde(default)]
    pub node_pools: Vec<NodePoolDescriptor>,
    /// Candidate subnets per node pool; pools without an entry use every
    /// cluster subnet
    #[serde(default)]
    pub node_pool_subnets: BTreeMap<String, Vec<SubnetSpec>>,
    /// Resource tags applied to every stack
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// EKS-specific part of a persisted cluster
///
/// Fields are optional because records written before the infrastructure
/// was saved (or by older code paths) may be missing them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksClusterModel {
    /// VPC id
    #[serde(default)]
    pub vpc_id: Option<String>,
    /// Cluster security group
    #[serde(default)]
    pub security_group_id: Option<String>,
    /// Worker node security group
    #[serde(default)]
    pub node_security_group_id: Option<String>,
    /// Cluster subnets
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    /// Control plane role ARN
    #[serde(default)]
    pub cluster_role_arn: Option<String>,
    /// Node instance role name
    #[serde(default)]
    pub node_instance_role_id: Option<String>,
    /// Node instance role ARN
    #[serde(default)]
    pub node_instance_role_arn: Option<String>,
    /// SSH key pair name
    #[serde(default)]
    pub ssh_key_name: Option<String>,
    /// Whether the SSH key was generated and imported by the create path
    #[serde(default)]
    pub ssh_key_generated: bool,
    /// Kubernetes version
    #[serde(default)]
    pub kubernetes_version: String,
    /// Kubeconfig secret reference
    #[serde(default)]
    pub config_secret_id: Option<String>,
}

/// Distribution-specific part of a persisted cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "distribution", content = "model")]
pub enum Distribution {
    /// Amazon EKS
    Eks(EksClusterModel),
    /// Any distribution this crate does not orchestrate
    Unsupported(String),
}

/// A cluster record as held by the cluster store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCluster {
    /// Cluster identity
    pub identity: ClusterIdentity,
    /// Current status
    pub status: ClusterStatus,
    /// Message accompanying the status
    #[serde(default)]
    pub status_message: String,
    /// Distribution-specific model
    pub distribution: Distribution,
}

impl StoredCluster {
    /// The EKS model of this cluster, or a validation error for any other
    /// distribution
    pub fn eks(&self) -> crate::Result<&EksClusterModel> {
        match &self.distribution {
            Distribution::Eks(model) => Ok(model),
            Distribution::Unsupported(name) => Err(Error::validation_for(
                &self.identity.name,
                vec![format!("cluster distribution {name} is not EKS")],
            )),
        }
    }

    /// Mutable access to the EKS model
    pub fn eks_mut(&mut self) -> crate::Result<&mut EksClusterModel> {
        match &mut self.distribution {
            Distribution::Eks(model) => Ok(model),
            Distribution::Unsupported(name) => Err(Error::validation_for(
                &self.identity.name,
                vec![format!("cluster distribution {name} is not EKS")],
            )),
        }
    }
}
