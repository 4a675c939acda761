//! Create-infrastructure workflow
//!
//! ```text
//! validate ─► IAM roles ─► access key ─┐
//!          ├► VPC ─► subnets (fan-out) ├► save ─► control plane ─► records
//!          └► SSH key ─────────────────┘
//!      ─► bootstrap ─────────────┐
//!      └► node pools (fan-out) ──┴► config secret ─► RUNNING | WARNING | ERROR
//! ```
//!
//! Parallel branches always run to completion before their join, their
//! errors are combined with branch identity, and only this workflow decides
//! the final cluster status.

use std::collections::BTreeSet;

use eks_common::model::{
    validate_node_pools, ClusterInfraDescriptor, ClusterStatus, SshKeySpec, Subnet, SubnetSpec,
};
use eks_common::{BranchError, Error, Result, WorkflowIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::bootstrap::{bootstrap_cluster, BootstrapInput};
use super::join::{join_branches, settle_branches, FanIn};
use super::node_pool::{run_node_pool, ClusterStatusPolicy, NodePoolInput, NodePoolMode, NodePoolOutput};
use crate::activities::bootstrap::SaveConfigSecretInput;
use crate::activities::control_plane::CreateControlPlaneInput;
use crate::activities::iam::{
    CreateClusterUserAccessKeyInput, CreateIamStackInput, IamStackOutput, ValidateIamRoleInput,
};
use crate::activities::network::{CreateSubnetInput, CreateVpcInput, GetSubnetInput, VpcConfig};
use crate::activities::ssh::UploadSshKeyInput;
use crate::activities::status::{
    ClusterInfra, EnsureNodePoolRecordsInput, SaveClusterInfraInput, SetClusterStatusInput,
};
use crate::activities::{ActivityInput, EksActivities};
use crate::runtime::WorkflowContext;

/// Result of a successful [`create_infrastructure`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInfrastructureOutput {
    /// VPC id
    pub vpc_id: String,
    /// Node instance role name
    pub node_instance_role_id: String,
    /// Node instance role ARN
    pub node_instance_role_arn: String,
    /// Control plane role ARN
    pub cluster_role_arn: String,
    /// Cluster subnets in request order
    pub subnets: Vec<Subnet>,
    /// Kubeconfig secret reference
    pub config_secret: String,
    /// Cluster user access key secret, absent with the default user
    pub cluster_user_secret: Option<String>,
    /// Node pools in request order
    pub node_pools: Vec<NodePoolOutput>,
}

/// Every violated invariant of a descriptor, before any side effect
pub fn validate_descriptor(descriptor: &ClusterInfraDescriptor) -> Result<()> {
    let cluster = &descriptor.cluster.name;
    let mut violations = match validate_node_pools(cluster, &descriptor.node_pools) {
        Ok(()) => Vec::new(),
        Err(Error::Validation { violations, .. }) => violations,
        Err(other) => return Err(other),
    };

    if cluster.is_empty() {
        violations.push("cluster name must not be empty".to_string());
    }
    if descriptor.kubernetes_version.trim().is_empty() {
        violations.push("kubernetes version must not be empty".to_string());
    }
    if descriptor.subnets.is_empty() {
        violations.push("at least one subnet is required".to_string());
    }
    let mut seen = BTreeSet::new();
    for spec in &descriptor.subnets {
        if !seen.insert(spec.identity()) {
            violations.push(format!("subnet {} is listed more than once", spec.identity()));
        }
    }
    for (pool, specs) in &descriptor.node_pool_subnets {
        if !descriptor.node_pools.iter().any(|p| &p.name == pool) {
            violations.push(format!("subnets given for unknown node pool {pool}"));
        }
        for spec in specs {
            if let SubnetSpec::New { cidr, .. } = spec {
                let known = descriptor
                    .subnets
                    .iter()
                    .any(|s| matches!(s, SubnetSpec::New { cidr: c, .. } if c == cidr));
                if !known {
                    violations.push(format!(
                        "node pool {pool} references subnet {cidr} which is not a cluster subnet"
                    ));
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::validation_for(cluster, violations))
    }
}

fn checkpoint<C: WorkflowContext>(ctx: &C) -> Result<()> {
    if ctx.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

struct Provisioned {
    output: CreateInfrastructureOutput,
    total_pools: usize,
    failed_pools: Vec<BranchError>,
}

/// Create every resource of a cluster and settle its status
///
/// `RUNNING` when every stage succeeded. When only node pools failed the
/// cluster is still usable: the status becomes `WARNING` and the combined
/// node pool errors are returned. Any other failure moves the cluster to
/// `ERROR`.
pub async fn create_infrastructure<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    descriptor: ClusterInfraDescriptor,
) -> Result<CreateInfrastructureOutput> {
    let envelope = ActivityInput::new(&descriptor.cluster, wf);
    let cluster = envelope.cluster_name.clone();
    info!(cluster = %cluster, workflow = %wf.workflow_id, run = %wf.run_id, "Creating cluster infrastructure");

    let settle = |status: ClusterStatus, message: String| {
        let input = SetClusterStatusInput {
            envelope: envelope.clone(),
            status,
            message,
        };
        // keyed by status: a resumed run must not replay an earlier outcome
        let step = wf.step(&format!("set-cluster-{}", status.to_string().to_lowercase()));
        async move {
            ctx.execute_activity(&activities.set_cluster_status, &step, input)
                .await
        }
    };

    match provision(ctx, activities, wf, &envelope, &descriptor).await {
        Ok(provisioned) if provisioned.failed_pools.is_empty() => {
            settle(ClusterStatus::Running, String::new()).await?;
            info!(cluster = %cluster, "Cluster infrastructure created");
            Ok(provisioned.output)
        }
        Ok(provisioned) => {
            let error = Error::partial("node pools", provisioned.total_pools, provisioned.failed_pools);
            warn!(cluster = %cluster, error = %error, "Cluster created with failed node pools");
            settle(ClusterStatus::Warning, error.user_message()).await?;
            Err(error)
        }
        Err(error) => {
            warn!(cluster = %cluster, error = %error, "Cluster creation failed");
            if let Err(status_error) = settle(ClusterStatus::Error, error.user_message()).await {
                warn!(cluster = %cluster, error = %status_error, "Failed to record cluster error status");
            }
            Err(error)
        }
    }
}

async fn provision<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: &ActivityInput,
    descriptor: &ClusterInfraDescriptor,
) -> Result<Provisioned> {
    validate_descriptor(descriptor)?;

    for (step, role) in [
        ("validate-cluster-role", &descriptor.iam.cluster_role_id),
        ("validate-node-instance-role", &descriptor.iam.node_instance_role_id),
    ] {
        if let Some(role) = role {
            ctx.execute_activity(
                &activities.validate_iam_role,
                &wf.step(step),
                ValidateIamRoleInput {
                    envelope: envelope.clone(),
                    role_name: role.clone(),
                },
            )
            .await?;
        }
    }
    checkpoint(ctx)?;

    let iam_branch = async {
        let iam: IamStackOutput = ctx
            .execute_activity(
                &activities.create_iam_stack,
                &wf.step("create-iam-stack"),
                CreateIamStackInput {
                    envelope: envelope.clone(),
                    cluster_role_id: descriptor.iam.cluster_role_id.clone(),
                    node_instance_role_id: descriptor.iam.node_instance_role_id.clone(),
                    default_user: descriptor.iam.default_user,
                    tags: descriptor.tags.clone(),
                },
            )
            .await?;
        let user_name = if descriptor.iam.default_user {
            None
        } else {
            iam.cluster_user_name.clone()
        };
        let secret = ctx
            .execute_activity(
                &activities.create_cluster_user_access_key,
                &wf.step("create-cluster-user-access-key"),
                CreateClusterUserAccessKeyInput {
                    envelope: envelope.clone(),
                    user_name,
                },
            )
            .await?;
        Ok::<_, Error>((iam, secret))
    };

    let network_branch = async {
        let vpc: VpcConfig = ctx
            .execute_activity(
                &activities.create_vpc,
                &wf.step("create-vpc"),
                CreateVpcInput {
                    envelope: envelope.clone(),
                    vpc_id: descriptor.network.vpc_id.clone(),
                    vpc_cidr: descriptor.network.vpc_cidr.clone(),
                    route_table_id: descriptor.network.route_table_id.clone(),
                    tags: descriptor.tags.clone(),
                },
            )
            .await?;

        let vpc_ref = &vpc;
        let branches = descriptor
            .subnets
            .iter()
            .map(|spec| {
                let step = wf.step(&format!("subnet-{}", spec.identity()));
                (spec.identity().to_string(), async move {
                    match spec {
                        SubnetSpec::Existing { subnet_id } => {
                            ctx.execute_activity(
                                &activities.get_subnet,
                                &step,
                                GetSubnetInput {
                                    envelope: envelope.clone(),
                                    subnet_id: subnet_id.clone(),
                                },
                            )
                            .await
                        }
                        SubnetSpec::New {
                            cidr,
                            availability_zone,
                        } => {
                            ctx.execute_activity(
                                &activities.create_subnet,
                                &step,
                                CreateSubnetInput {
                                    envelope: envelope.clone(),
                                    vpc_id: vpc_ref.vpc_id.clone(),
                                    route_table_id: vpc_ref.route_table_id.clone(),
                                    cidr: cidr.clone(),
                                    availability_zone: availability_zone.clone(),
                                    tags: descriptor.tags.clone(),
                                },
                            )
                            .await
                        }
                    }
                })
            })
            .collect();
        let subnets = join_branches("subnets", branches).await?;
        Ok::<_, Error>((vpc, subnets))
    };

    let ssh_branch = async {
        match &descriptor.ssh_key {
            Some(SshKeySpec::Generated { public_key }) => {
                let key_name = ctx
                    .execute_activity(
                        &activities.upload_ssh_key,
                        &wf.step("upload-ssh-key"),
                        UploadSshKeyInput {
                            envelope: envelope.clone(),
                            public_key: public_key.clone(),
                        },
                    )
                    .await?;
                Ok::<_, Error>((Some(key_name), true))
            }
            Some(SshKeySpec::Existing { key_name }) => Ok((Some(key_name.clone()), false)),
            None => Ok((None, false)),
        }
    };

    let (iam, network, ssh) = futures::join!(iam_branch, network_branch, ssh_branch);
    let mut fan_in = FanIn::new("infrastructure", 3);
    let iam = fan_in.take("iam", iam);
    let network = fan_in.take("network", network);
    let ssh = fan_in.take("ssh", ssh);
    fan_in.finish()?;
    let (Some((iam, cluster_user_secret)), Some((vpc, subnets)), Some((ssh_key_name, ssh_key_generated))) =
        (iam, network, ssh)
    else {
        return Err(Error::internal_with_context(
            "create-infrastructure",
            "infrastructure branch finished without output",
        ));
    };
    checkpoint(ctx)?;

    ctx.execute_activity(
        &activities.save_cluster_infra,
        &wf.step("save-cluster-infra"),
        SaveClusterInfraInput {
            envelope: envelope.clone(),
            infra: ClusterInfra {
                vpc_id: vpc.vpc_id.clone(),
                security_group_id: vpc.security_group_id.clone(),
                node_security_group_id: vpc.node_security_group_id.clone(),
                subnets: subnets.clone(),
                cluster_role_arn: iam.cluster_role_arn.clone(),
                node_instance_role_id: iam.node_instance_role_id.clone(),
                node_instance_role_arn: iam.node_instance_role_arn.clone(),
                ssh_key_name,
                ssh_key_generated,
                kubernetes_version: descriptor.kubernetes_version.clone(),
            },
        },
    )
    .await?;

    let control_plane = ctx
        .execute_activity(
            &activities.create_control_plane,
            &wf.step("create-control-plane"),
            CreateControlPlaneInput {
                envelope: envelope.clone(),
                kubernetes_version: descriptor.kubernetes_version.clone(),
                role_arn: iam.cluster_role_arn.clone(),
                security_group_id: vpc.security_group_id.clone(),
                subnet_ids: subnets.iter().map(|s| s.subnet_id.clone()).collect(),
                encryption: descriptor.encryption.clone(),
                logging: descriptor.logging.clone(),
                endpoint_access: descriptor.endpoint_access.clone(),
                tags: descriptor.tags.clone(),
            },
        )
        .await?;
    checkpoint(ctx)?;

    ctx.execute_activity(
        &activities.ensure_node_pool_records,
        &wf.step("ensure-node-pool-records"),
        EnsureNodePoolRecordsInput {
            envelope: envelope.clone(),
            node_pools: descriptor.node_pools.clone(),
        },
    )
    .await?;

    let bootstrap_branch = bootstrap_cluster(
        ctx,
        activities,
        wf,
        BootstrapInput {
            envelope: envelope.clone(),
            endpoint: control_plane.endpoint.clone(),
            certificate_authority: control_plane.certificate_authority.clone(),
            node_instance_role_arn: iam.node_instance_role_arn.clone(),
        },
    );

    let register_labels = activities.settings().node_pool.register_label_sets;
    let pool_branches = descriptor
        .node_pools
        .iter()
        .map(|pool| {
            let mapped = descriptor
                .node_pool_subnets
                .get(&pool.name)
                .cloned()
                .unwrap_or_default();
            (pool.name.clone(), async move {
                run_node_pool(
                    ctx,
                    activities,
                    wf,
                    NodePoolInput {
                        envelope: envelope.clone(),
                        pool: pool.clone(),
                        subnets: mapped,
                        mode: NodePoolMode::Create,
                        register_labels,
                        tags: descriptor.tags.clone(),
                    },
                    ClusterStatusPolicy::Leave,
                )
                .await
            })
        })
        .collect::<Vec<_>>();

    let (kubeconfig, pools) = futures::join!(bootstrap_branch, settle_branches(pool_branches));
    let kubeconfig = kubeconfig.map_err(|e| e.context("bootstrap"))?;

    let config_secret = ctx
        .execute_activity(
            &activities.save_config_secret,
            &wf.step("save-config-secret"),
            SaveConfigSecretInput {
                envelope: envelope.clone(),
                kubeconfig,
            },
        )
        .await?;

    let total_pools = pools.len();
    let mut node_pools = Vec::with_capacity(total_pools);
    let mut failed_pools = Vec::new();
    for (name, result) in pools {
        match result {
            Ok(output) => node_pools.push(output),
            Err(error) => failed_pools.push(BranchError::new(name, error)),
        }
    }

    Ok(Provisioned {
        output: CreateInfrastructureOutput {
            vpc_id: vpc.vpc_id,
            node_instance_role_id: iam.node_instance_role_id,
            node_instance_role_arn: iam.node_instance_role_arn,
            cluster_role_arn: iam.cluster_role_arn,
            subnets,
            config_secret,
            cluster_user_secret,
            node_pools,
        },
        total_pools,
        failed_pools,
    })
}
