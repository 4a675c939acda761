//! Node pool sub-workflow
//!
//! Resolving, Sizing, Labeling, Provisioning, Fulfilling, Done. Any failure
//! moves the pool to `ERROR` with the unwrapped cause and is handed back to
//! the caller, which picks what happens to the cluster status through
//! [`ClusterStatusPolicy`].

use std::collections::BTreeMap;
use std::fmt;

use eks_common::model::{
    validate_node_pools, ClusterStatus, NodePoolDescriptor, NodePoolStatus, Subnet, SubnetSpec,
};
use eks_common::{Error, NodePoolVersion, Result, WorkflowIdentity, FALLBACK_VOLUME_SIZE_GB};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activities::node_pool::{
    GetAmiSizeInput, NodePoolStackInput, RegisterLabelSetInput, WaitForFulfillmentInput,
};
use crate::activities::status::{
    EnsureNodePoolRecordsInput, SaveNodePoolStackIdInput, SetClusterStatusInput,
    SetNodePoolStatusInput,
};
use crate::activities::{ActivityInput, EksActivities};
use crate::runtime::WorkflowContext;

/// What a failed node pool does to its cluster's status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatusPolicy {
    /// Leave the cluster status to an aggregating parent workflow
    #[default]
    Leave,
    /// Move the cluster to `WARNING`
    MarkWarning,
    /// Move the cluster to `ERROR`
    MarkError,
}

impl ClusterStatusPolicy {
    fn cluster_status(self) -> Option<ClusterStatus> {
        match self {
            Self::Leave => None,
            Self::MarkWarning => Some(ClusterStatus::Warning),
            Self::MarkError => Some(ClusterStatus::Error),
        }
    }
}

/// Create a new autoscaling group stack or update the existing one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePoolMode {
    /// New pool
    Create,
    /// Existing pool, live desired capacity is kept within the new bounds
    Update,
}

/// Stages of the sub-workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodePoolStage {
    /// Loading the cluster context
    Resolving,
    /// Selecting the root volume size
    Sizing,
    /// Registering the label set
    Labeling,
    /// Creating or updating the stack
    Provisioning,
    /// Waiting for healthy instances
    Fulfilling,
    /// Finished
    Done,
}

impl fmt::Display for NodePoolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Sizing => "sizing",
            Self::Labeling => "labeling",
            Self::Provisioning => "provisioning",
            Self::Fulfilling => "fulfilling",
            Self::Done => "done",
        })
    }
}

/// Input of [`run_node_pool`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolInput {
    /// Envelope of the parent workflow
    pub envelope: ActivityInput,
    /// Requested pool
    pub pool: NodePoolDescriptor,
    /// Subnets the pool is restricted to; empty means every cluster subnet
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
    /// Create or update
    pub mode: NodePoolMode,
    /// Register the Kubernetes label set
    pub register_labels: bool,
    /// Extra stack tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Result of a node pool sub-workflow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolOutput {
    /// Node pool name
    pub name: String,
    /// Autoscaling group stack id
    pub stack_id: String,
    /// Launch configuration fingerprint
    pub version: NodePoolVersion,
    /// Desired capacity applied
    pub desired_capacity: u32,
    /// Effective root volume size
    pub volume_size: u32,
}

/// Effective root volume size of a pool
///
/// An explicit size wins over the configured default, which wins over
/// `max(FALLBACK_VOLUME_SIZE_GB, ami_size)`. A selected size below the
/// image's own root volume is an error naming where the size came from.
pub fn select_volume_size(ami_size: u32, explicit: u32, default: u32) -> Result<u32> {
    let (size, source) = if explicit > 0 {
        (explicit, "requested")
    } else if default > 0 {
        (default, "default-configured")
    } else {
        return Ok(FALLBACK_VOLUME_SIZE_GB.max(ami_size));
    };
    if size < ami_size {
        return Err(Error::validation(format!(
            "{source} volume size ({size} GiB) is smaller than the image root volume ({ami_size} GiB)"
        )));
    }
    Ok(size)
}

/// Subnet ids a pool may use: its mapped subnets resolved against the
/// cluster's, or every cluster subnet when it has no mapping
///
/// A mapped new subnet is matched by CIDR.
pub fn mapped_subnet_ids(
    pool: &str,
    mapped: &[SubnetSpec],
    cluster_subnets: &[Subnet],
) -> Result<Vec<String>> {
    if mapped.is_empty() {
        return Ok(cluster_subnets.iter().map(|s| s.subnet_id.clone()).collect());
    }
    mapped
        .iter()
        .map(|spec| match spec {
            SubnetSpec::Existing { subnet_id } => Ok(subnet_id.clone()),
            SubnetSpec::New { cidr, .. } => cluster_subnets
                .iter()
                .find(|s| &s.cidr == cidr)
                .map(|s| s.subnet_id.clone())
                .ok_or_else(|| {
                    Error::validation(format!(
                        "node pool {pool} references subnet {cidr} which is not a cluster subnet"
                    ))
                }),
        })
        .collect()
}

/// Subnets of a pool: the candidates plus the pool's explicit subnet,
/// appended once when missing
pub fn resolve_subnet_ids(candidates: &[String], explicit: Option<&str>) -> Result<Vec<String>> {
    let mut subnet_ids = candidates.to_vec();
    if let Some(explicit) = explicit.filter(|s| !s.is_empty()) {
        if !subnet_ids.iter().any(|s| s == explicit) {
            subnet_ids.push(explicit.to_string());
        }
    }
    if subnet_ids.is_empty() {
        return Err(Error::validation("node pool has no subnets"));
    }
    Ok(subnet_ids)
}

/// Create a standalone node pool on a running cluster
///
/// An invalid descriptor is rejected before any record or stack is written.
/// The cluster is `UPDATING` while the pool is built, `RUNNING` afterwards and
/// `WARNING` when the pool failed.
pub async fn create_node_pool<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: ActivityInput,
    pool: NodePoolDescriptor,
) -> Result<NodePoolOutput> {
    validate_node_pools(&envelope.cluster_name, std::slice::from_ref(&pool))?;
    ctx.execute_activity(
        &activities.ensure_node_pool_records,
        &wf.step("ensure-node-pool-record"),
        EnsureNodePoolRecordsInput {
            envelope: envelope.for_workflow(wf),
            node_pools: vec![pool.clone()],
        },
    )
    .await?;

    standalone(ctx, activities, wf, envelope, pool, NodePoolMode::Create).await
}

/// Update a standalone node pool
///
/// Same validation and cluster status handling as [`create_node_pool`]. The
/// pool is `UPDATING` until its stack settles.
pub async fn update_node_pool<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: ActivityInput,
    pool: NodePoolDescriptor,
) -> Result<NodePoolOutput> {
    validate_node_pools(&envelope.cluster_name, std::slice::from_ref(&pool))?;
    standalone(ctx, activities, wf, envelope, pool, NodePoolMode::Update).await
}

async fn standalone<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    wf: &WorkflowIdentity,
    envelope: ActivityInput,
    pool: NodePoolDescriptor,
    mode: NodePoolMode,
) -> Result<NodePoolOutput> {
    let cluster_status = |step: &'static str, status: ClusterStatus| {
        let input = SetClusterStatusInput {
            envelope: envelope.for_workflow(wf),
            status,
            message: String::new(),
        };
        async move {
            ctx.execute_activity(&activities.set_cluster_status, &wf.step(step), input)
                .await
        }
    };

    cluster_status("set-cluster-updating", ClusterStatus::Updating).await?;
    let input = NodePoolInput {
        envelope: envelope.clone(),
        pool,
        subnets: Vec::new(),
        mode,
        register_labels: true,
        tags: BTreeMap::new(),
    };
    let output = run_node_pool(ctx, activities, wf, input, ClusterStatusPolicy::MarkWarning).await?;
    cluster_status("set-cluster-running", ClusterStatus::Running).await?;
    Ok(output)
}

/// Run the sub-workflow of one pool as a child of `parent`
pub async fn run_node_pool<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    parent: &WorkflowIdentity,
    input: NodePoolInput,
    policy: ClusterStatusPolicy,
) -> Result<NodePoolOutput> {
    let wf = parent.child(&format!("nodepool-{}", input.pool.name));
    let envelope = input.envelope.for_workflow(&wf);
    let pool_name = input.pool.name.clone();

    let mut stage = NodePoolStage::Resolving;
    let result = NodePoolRun {
        ctx,
        activities,
        wf: &wf,
        envelope: &envelope,
    }
    .run(input, &mut stage)
    .await;

    match result {
        Ok(output) => Ok(output),
        Err(error) => {
            let error = error.context(format!("node pool {pool_name} {stage}"));
            let message = error.user_message();
            warn!(node_pool = %pool_name, %stage, error = %error, "Node pool failed");

            let pool_status = ctx
                .execute_activity(
                    &activities.set_node_pool_status,
                    &wf.step("set-status-error"),
                    SetNodePoolStatusInput {
                        envelope: envelope.clone(),
                        node_pool: pool_name.clone(),
                        status: NodePoolStatus::Error,
                        message: message.clone(),
                    },
                )
                .await;
            if let Err(status_error) = pool_status {
                warn!(node_pool = %pool_name, error = %status_error, "Failed to record node pool error status");
            }

            if let Some(status) = policy.cluster_status() {
                let cluster_status = ctx
                    .execute_activity(
                        &activities.set_cluster_status,
                        &wf.step(&format!("set-cluster-{}", status.to_string().to_lowercase())),
                        SetClusterStatusInput {
                            envelope,
                            status,
                            message: format!("node pool {pool_name}: {message}"),
                        },
                    )
                    .await;
                if let Err(status_error) = cluster_status {
                    warn!(node_pool = %pool_name, error = %status_error, "Failed to record cluster status");
                }
            }
            Err(error)
        }
    }
}

struct NodePoolRun<'a, C> {
    ctx: &'a C,
    activities: &'a EksActivities,
    wf: &'a WorkflowIdentity,
    envelope: &'a ActivityInput,
}

impl<C: WorkflowContext> NodePoolRun<'_, C> {
    fn enter(&self, stage: &mut NodePoolStage, next: NodePoolStage) -> Result<()> {
        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *stage = next;
        info!(
            cluster = %self.envelope.cluster_name,
            workflow = %self.wf.workflow_id,
            stage = %next,
            "Node pool stage"
        );
        Ok(())
    }

    async fn run(&self, input: NodePoolInput, stage: &mut NodePoolStage) -> Result<NodePoolOutput> {
        let (ctx, activities, wf) = (self.ctx, self.activities, self.wf);
        let pool = input.pool;

        self.enter(stage, NodePoolStage::Resolving)?;
        if input.mode == NodePoolMode::Update {
            ctx.execute_activity(
                &activities.set_node_pool_status,
                &wf.step("set-status-updating"),
                SetNodePoolStatusInput {
                    envelope: self.envelope.clone(),
                    node_pool: pool.name.clone(),
                    status: NodePoolStatus::Updating,
                    message: String::new(),
                },
            )
            .await?;
        }
        let context = ctx
            .execute_activity(
                &activities.load_cluster_context,
                &wf.step("load-cluster-context"),
                self.envelope.clone(),
            )
            .await?;

        self.enter(stage, NodePoolStage::Sizing)?;
        let ami_size = if pool.image.is_empty() {
            0
        } else {
            ctx.execute_activity(
                &activities.get_ami_size,
                &wf.step("get-ami-size"),
                GetAmiSizeInput {
                    envelope: self.envelope.clone(),
                    image: pool.image.clone(),
                },
            )
            .await?
        };
        let volume_size = select_volume_size(
            ami_size,
            pool.volume.size_gb,
            activities.settings().node_pool.default_volume_size_gb,
        )?;

        if input.register_labels {
            self.enter(stage, NodePoolStage::Labeling)?;
            ctx.execute_activity(
                &activities.register_label_set,
                &wf.step("register-label-set"),
                RegisterLabelSetInput {
                    envelope: self.envelope.clone(),
                    node_pool: pool.name.clone(),
                    labels: pool.labels.clone(),
                },
            )
            .await?;
        }

        self.enter(stage, NodePoolStage::Provisioning)?;
        let version = NodePoolVersion::for_pool(&pool, volume_size)?;
        let candidates = mapped_subnet_ids(&pool.name, &input.subnets, &context.subnets)?;
        let subnet_ids = resolve_subnet_ids(&candidates, pool.subnet_id.as_deref())?;
        let stack_input = NodePoolStackInput {
            envelope: self.envelope.clone(),
            pool: pool.clone(),
            context,
            subnet_ids,
            volume_size,
            version: version.clone(),
            tags: input.tags,
        };
        let stack = match input.mode {
            NodePoolMode::Create => {
                ctx.execute_activity(
                    &activities.create_node_pool_stack,
                    &wf.step("create-node-pool-stack"),
                    stack_input,
                )
                .await?
            }
            NodePoolMode::Update => {
                ctx.execute_activity(
                    &activities.update_node_pool_stack,
                    &wf.step("update-node-pool-stack"),
                    stack_input,
                )
                .await?
            }
        };
        ctx.execute_activity(
            &activities.save_node_pool_stack_id,
            &wf.step("save-node-pool-stack-id"),
            SaveNodePoolStackIdInput {
                envelope: self.envelope.clone(),
                node_pool: pool.name.clone(),
                stack_id: stack.stack_id.clone(),
            },
        )
        .await?;

        self.enter(stage, NodePoolStage::Fulfilling)?;
        ctx.execute_activity(
            &activities.wait_for_fulfillment,
            &wf.step("wait-for-fulfillment"),
            WaitForFulfillmentInput {
                envelope: self.envelope.clone(),
                node_pool: pool.name.clone(),
                desired_capacity: stack.desired_capacity,
            },
        )
        .await?;

        ctx.execute_activity(
            &activities.set_node_pool_status,
            &wf.step("set-status-active"),
            SetNodePoolStatusInput {
                envelope: self.envelope.clone(),
                node_pool: pool.name.clone(),
                status: NodePoolStatus::Active,
                message: String::new(),
            },
        )
        .await?;
        self.enter(stage, NodePoolStage::Done)?;

        Ok(NodePoolOutput {
            name: pool.name,
            stack_id: stack.stack_id,
            version,
            desired_capacity: stack.desired_capacity,
            volume_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::explicit_wins(20, 80, 60, 80)]
    #[case::default_when_no_explicit(20, 0, 60, 60)]
    #[case::fallback_floor(20, 0, 0, 50)]
    #[case::large_ami_beats_fallback(120, 0, 0, 120)]
    #[case::explicit_equal_to_ami(30, 30, 0, 30)]
    fn volume_size_selection(
        #[case] ami: u32,
        #[case] explicit: u32,
        #[case] default: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(select_volume_size(ami, explicit, default).expect("size"), expected);
    }

    #[rstest]
    #[case::explicit(100, 40, 0, "requested")]
    #[case::default(100, 0, 40, "default-configured")]
    fn undersized_volume_names_its_source(
        #[case] ami: u32,
        #[case] explicit: u32,
        #[case] default: u32,
        #[case] source: &str,
    ) {
        let err = select_volume_size(ami, explicit, default).expect_err("undersized");
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.user_message().starts_with(source), "{err}");
    }

    #[test]
    fn selected_volume_never_undercuts_the_image() {
        for ami in [0, 8, 49, 50, 51, 200] {
            for explicit in [0, 10, 50, 300] {
                for default in [0, 20, 100] {
                    if let Ok(size) = select_volume_size(ami, explicit, default) {
                        assert!(size >= ami, "ami={ami} explicit={explicit} default={default}");
                    }
                }
            }
        }
    }

    #[rstest]
    #[case::appended(&["s1", "s2"], Some("s3"), &["s1", "s2", "s3"])]
    #[case::not_duplicated(&["s1", "s2"], Some("s2"), &["s1", "s2"])]
    #[case::no_explicit(&["s1"], None, &["s1"])]
    #[case::explicit_only(&[], Some("s9"), &["s9"])]
    fn subnet_resolution(
        #[case] candidates: &[&str],
        #[case] explicit: Option<&str>,
        #[case] expected: &[&str],
    ) {
        let candidates: Vec<String> = candidates.iter().map(|s| s.to_string()).collect();
        let resolved = resolve_subnet_ids(&candidates, explicit).expect("subnets");
        assert_eq!(resolved, expected);
    }

    fn cluster_subnets() -> Vec<Subnet> {
        vec![
            Subnet {
                subnet_id: "subnet-1".to_string(),
                cidr: "10.0.1.0/24".to_string(),
                availability_zone: "eu-west-1a".to_string(),
            },
            Subnet {
                subnet_id: "subnet-x".to_string(),
                cidr: "10.0.2.0/24".to_string(),
                availability_zone: "eu-west-1b".to_string(),
            },
        ]
    }

    fn new_subnet(cidr: &str) -> SubnetSpec {
        SubnetSpec::New {
            cidr: cidr.to_string(),
            availability_zone: None,
        }
    }

    #[test]
    fn unmapped_pools_use_every_cluster_subnet() {
        let ids = mapped_subnet_ids("a", &[], &cluster_subnets()).expect("ids");
        assert_eq!(ids, vec!["subnet-1", "subnet-x"]);
    }

    #[test]
    fn mapped_subnets_resolve_by_cidr_or_id() {
        let mapped = vec![
            new_subnet("10.0.2.0/24"),
            SubnetSpec::Existing {
                subnet_id: "subnet-shared".to_string(),
            },
        ];
        let ids = mapped_subnet_ids("a", &mapped, &cluster_subnets()).expect("ids");
        assert_eq!(ids, vec!["subnet-x", "subnet-shared"]);
    }

    #[test]
    fn unknown_mapped_cidr_is_an_error() {
        let err = mapped_subnet_ids("a", &[new_subnet("10.9.9.0/24")], &cluster_subnets())
            .expect_err("unknown cidr");
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("10.9.9.0/24"));
    }

    #[test]
    fn empty_subnet_list_is_an_error() {
        let err = resolve_subnet_ids(&[], None).expect_err("no subnets");
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn policy_maps_to_cluster_status() {
        assert_eq!(ClusterStatusPolicy::Leave.cluster_status(), None);
        assert_eq!(
            ClusterStatusPolicy::MarkWarning.cluster_status(),
            Some(ClusterStatus::Warning)
        );
        assert_eq!(
            ClusterStatusPolicy::MarkError.cluster_status(),
            Some(ClusterStatus::Error)
        );
    }
}
