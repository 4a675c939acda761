//! Delete-infrastructure workflow, reverse dependency order
//!
//! Every step tolerates resources that are already gone, so a failed delete
//! can simply be started again.

use std::collections::BTreeSet;

use eks_common::model::{ClusterIdentity, ClusterStatus, NodePoolStatus};
use eks_common::{Error, Result, WorkflowIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::join::{join_branches, FanIn};
use crate::activities::network::{DeleteStackInput, DeleteStackOutput, VpcScopedInput};
use crate::activities::status::{
    DeleteNodePoolRecordInput, SetClusterStatusInput, SetNodePoolStatusInput,
};
use crate::activities::{ActivityInput, EksActivities};
use crate::cloud::stack::StackName;
use crate::runtime::WorkflowContext;

/// Input of [`delete_infrastructure`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInfrastructureInput {
    /// Cluster to tear down
    pub cluster: ClusterIdentity,
    /// Node pools known to the caller, merged with the recorded ones
    #[serde(default)]
    pub node_pools: Vec<String>,
    /// Whether the SSH key was generated for this cluster
    #[serde(default)]
    pub generated_ssh_key: bool,
}

/// Result of [`delete_infrastructure`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInfrastructureOutput {
    /// Whether the VPC stack still existed
    pub vpc_existed: bool,
    /// Stacks deleted by this run, in deletion order
    pub deleted_stacks: Vec<String>,
    /// Orphaned network interfaces removed
    pub deleted_network_interfaces: Vec<String>,
}

/// Tear down every resource of a cluster
///
/// The cluster is `DELETING` while this runs and `ERROR` when a step fails.
pub async fn delete_infrastructure<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    input: DeleteInfrastructureInput,
) -> Result<DeleteInfrastructureOutput> {
    let envelope = ActivityInput::new(&input.cluster, wf);
    let cluster = envelope.cluster_name.clone();
    info!(cluster = %cluster, workflow = %wf.workflow_id, run = %wf.run_id, "Deleting cluster infrastructure");

    ctx.execute_activity(
        &activities.set_cluster_status,
        &wf.step("set-status-deleting"),
        SetClusterStatusInput {
            envelope: envelope.clone(),
            status: ClusterStatus::Deleting,
            message: String::new(),
        },
    )
    .await?;

    match teardown(ctx, activities, wf, &envelope, &input).await {
        Ok(output) => {
            info!(
                cluster = %cluster,
                stacks = output.deleted_stacks.len(),
                "Cluster infrastructure deleted"
            );
            Ok(output)
        }
        Err(error) => {
            warn!(cluster = %cluster, error = %error, "Cluster deletion failed");
            let status = ctx
                .execute_activity(
                    &activities.set_cluster_status,
                    &wf.step("set-status-error"),
                    SetClusterStatusInput {
                        envelope: envelope.clone(),
                        status: ClusterStatus::Error,
                        message: error.user_message(),
                    },
                )
                .await;
            if let Err(status_error) = status {
                warn!(cluster = %cluster, error = %status_error, "Failed to record cluster error status");
            }
            Err(error)
        }
    }
}

async fn delete_stack<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: &ActivityInput,
    stack_name: String,
) -> Result<DeleteStackOutput> {
    let step = wf.step(&format!("delete-stack-{stack_name}"));
    ctx.execute_activity(
        &activities.delete_stack,
        &step,
        DeleteStackInput {
            envelope: envelope.clone(),
            stack_name,
        },
    )
    .await
}

fn deleted(outputs: impl IntoIterator<Item = DeleteStackOutput>) -> Vec<String> {
    outputs
        .into_iter()
        .filter(|o| o.deleted)
        .map(|o| o.stack_name)
        .collect()
}

async fn teardown<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: &ActivityInput,
    input: &DeleteInfrastructureInput,
) -> Result<DeleteInfrastructureOutput> {
    let cluster = envelope.cluster_name.as_str();
    let mut output = DeleteInfrastructureOutput::default();

    let vpc = ctx
        .execute_activity(&activities.get_vpc_config, &wf.step("get-vpc-config"), envelope.clone())
        .await?;
    output.vpc_existed = vpc.is_some();

    if let Some(vpc) = &vpc {
        ctx.execute_activity(
            &activities.wait_for_load_balancers,
            &wf.step("wait-for-load-balancers"),
            VpcScopedInput {
                envelope: envelope.clone(),
                vpc_id: vpc.vpc_id.clone(),
                security_group_ids: vpc.security_group_ids(),
            },
        )
        .await?;
    } else {
        info!(cluster = %cluster, "VPC stack is gone, skipping VPC cleanup");
    }

    let recorded = ctx
        .execute_activity(&activities.list_node_pools, &wf.step("list-node-pools"), envelope.clone())
        .await?;
    let recorded: BTreeSet<String> = recorded.into_iter().collect();
    let pools: BTreeSet<String> = recorded.iter().chain(input.node_pools.iter()).cloned().collect();

    let branches = pools
        .iter()
        .map(|pool| {
            let has_record = recorded.contains(pool);
            (pool.clone(), async move {
                if has_record {
                    ctx.execute_activity(
                        &activities.set_node_pool_status,
                        &wf.step(&format!("set-node-pool-deleting-{pool}")),
                        SetNodePoolStatusInput {
                            envelope: envelope.clone(),
                            node_pool: pool.clone(),
                            status: NodePoolStatus::Deleting,
                            message: String::new(),
                        },
                    )
                    .await?;
                }
                let stack = delete_stack(ctx, activities, wf, envelope, StackName::node_pool(cluster, pool)).await?;
                ctx.execute_activity(
                    &activities.delete_node_pool_record,
                    &wf.step(&format!("delete-node-pool-record-{pool}")),
                    DeleteNodePoolRecordInput {
                        envelope: envelope.clone(),
                        node_pool: pool.clone(),
                    },
                )
                .await?;
                Ok::<_, Error>(stack)
            })
        })
        .collect();
    output.deleted_stacks.extend(deleted(join_branches("node pools", branches).await?));

    let network_branch = async {
        ctx.execute_activity(
            &activities.delete_control_plane,
            &wf.step("delete-control-plane"),
            envelope.clone(),
        )
        .await?;

        let mut interfaces = Vec::new();
        if let Some(vpc) = &vpc {
            interfaces = ctx
                .execute_activity(
                    &activities.delete_orphan_network_interfaces,
                    &wf.step("delete-orphan-network-interfaces"),
                    VpcScopedInput {
                        envelope: envelope.clone(),
                        vpc_id: vpc.vpc_id.clone(),
                        security_group_ids: vpc.security_group_ids(),
                    },
                )
                .await?;
        }

        let subnet_stacks = ctx
            .execute_activity(&activities.list_subnet_stacks, &wf.step("list-subnet-stacks"), envelope.clone())
            .await?;
        let branches = subnet_stacks
            .into_iter()
            .map(|stack| (stack.clone(), delete_stack(ctx, activities, wf, envelope, stack)))
            .collect();
        let mut stacks = deleted(join_branches("subnets", branches).await?);
        stacks.extend(deleted([delete_stack(ctx, activities, wf, envelope, StackName::vpc(cluster)).await?]));
        Ok::<_, Error>((stacks, interfaces))
    };

    let ssh_branch = async {
        if input.generated_ssh_key {
            ctx.execute_activity(&activities.delete_ssh_key, &wf.step("delete-ssh-key"), envelope.clone())
                .await?;
        }
        Ok::<_, Error>(())
    };

    let (network, ssh) = futures::join!(network_branch, ssh_branch);
    let mut fan_in = FanIn::new("teardown", 2);
    let network = fan_in.take("network", network);
    fan_in.take("ssh", ssh);
    fan_in.finish()?;
    if let Some((stacks, interfaces)) = network {
        output.deleted_stacks.extend(stacks);
        output.deleted_network_interfaces = interfaces;
    }

    let iam = delete_stack(ctx, activities, wf, envelope, StackName::iam(cluster)).await?;
    output.deleted_stacks.extend(deleted([iam]));
    Ok(output)
}
