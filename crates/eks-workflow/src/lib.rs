//! EKS cluster and node pool lifecycle: resource step activities, the
//! Stack-Waiter and the create/delete/node pool workflows

#![deny(missing_docs)]

pub mod activities;
pub mod cloud;
pub mod runtime;
pub mod store;
pub mod workflows;

pub use activities::{ActivityInput, Dependencies, EksActivities};
pub use runtime::{Activity, ActivityContext, ActivityOptions, InlineRuntime, WorkflowContext};
pub use workflows::{
    create_infrastructure, create_node_pool, delete_infrastructure, update_node_pool,
};
