//! Workflows composed from the resource step activities
//!
//! Workflows are plain async functions generic over a [`WorkflowContext`];
//! they never call the cloud directly. Child workflows derive their identity
//! from the parent with [`WorkflowIdentity::child`].
//!
//! [`WorkflowContext`]: crate::runtime::WorkflowContext
//! [`WorkflowIdentity::child`]: eks_common::WorkflowIdentity::child

pub mod bootstrap;
pub mod create_infra;
pub mod delete_infra;
pub mod join;
pub mod node_pool;

pub use bootstrap::{bootstrap_cluster, BootstrapInput};
pub use create_infra::{create_infrastructure, validate_descriptor, CreateInfrastructureOutput};
pub use delete_infra::{delete_infrastructure, DeleteInfrastructureInput, DeleteInfrastructureOutput};
pub use node_pool::{
    create_node_pool, run_node_pool, update_node_pool, ClusterStatusPolicy, NodePoolInput,
    NodePoolMode, NodePoolOutput, NodePoolStage,
};
