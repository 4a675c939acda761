//! Descriptor and persisted-record data model

mod cluster;
mod node_pool;
mod status;

pub use cluster::{
    ClusterIdentity, ClusterInfraDescriptor, Distribution, EksClusterModel, EncryptionConfig,
    EndpointAccess, IamSpec, LoggingConfig, NetworkSpec, SshKeySpec, StoredCluster, Subnet,
    SubnetSpec,
};
pub use node_pool::{
    validate_node_pools, Autoscaling, NodePoolDescriptor, VolumeEncryption, VolumeSpec,
};
pub use status::{ClusterStatus, NodePoolStatus};
