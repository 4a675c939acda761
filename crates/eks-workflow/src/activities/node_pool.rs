//! Node pool activities
//!
//! Cluster context resolution (with reconstruction of stale records from the
//! live stacks), image sizing, label sets, the autoscaling group stack and
//! fulfillment polling.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use eks_common::model::{NodePoolDescriptor, Subnet};
use eks_common::{Error, NodePoolVersion, Result, CLUSTER_TAG_KEY};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::iam::IamStackOutput;
use super::network::VpcConfig;
use super::{activity_handle, create_stack_and_wait, ActivityInput};
use crate::cloud::{
    cluster_tags, CloudSession, StackDescription, StackName, StackOperation, StackRequest,
    StackTemplate, UpdateStackOutcome,
};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

/// Network and IAM context a node pool is created in
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterContext {
    /// VPC id
    pub vpc_id: String,
    /// Control plane security group
    pub security_group_id: String,
    /// Worker node security group
    pub node_security_group_id: String,
    /// Node instance role name
    pub node_instance_role_id: String,
    /// Node instance role ARN
    pub node_instance_role_arn: String,
    /// Cluster subnets
    pub subnets: Vec<Subnet>,
    /// SSH key pair, if any
    pub ssh_key_name: Option<String>,
    /// Kubernetes version of the control plane
    pub kubernetes_version: String,
}

impl ClusterContext {
    /// Subnet ids in cluster order
    pub fn subnet_ids(&self) -> Vec<String> {
        self.subnets.iter().map(|s| s.subnet_id.clone()).collect()
    }
}

/// Clamp a live desired capacity into new group bounds
pub fn clamp_desired_capacity(current: u32, min_size: u32, max_size: u32) -> u32 {
    current.max(min_size).min(max_size.max(min_size))
}

fn or_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

async fn required_stack(session: &CloudSession, stack_name: &str) -> Result<StackDescription> {
    session
        .stacks
        .describe_stack(stack_name)
        .await?
        .ok_or_else(|| Error::not_found("stack", stack_name))
}

async fn subnets_from_stacks(session: &CloudSession, cluster: &str) -> Result<Vec<Subnet>> {
    let prefix = StackName::subnet_prefix(cluster);
    let mut names: Vec<String> = session
        .stacks
        .list_stacks_by_tag(CLUSTER_TAG_KEY, cluster)
        .await?
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect();
    names.sort();

    let mut subnets = Vec::with_capacity(names.len());
    for name in names {
        let stack = required_stack(session, &name).await?;
        subnets.push(Subnet {
            subnet_id: stack.output("SubnetId")?.to_string(),
            cidr: stack.parameters.get("SubnetBlock").cloned().unwrap_or_default(),
            availability_zone: stack
                .outputs
                .get("AvailabilityZone")
                .or_else(|| stack.parameters.get("AvailabilityZoneName"))
                .cloned()
                .unwrap_or_default(),
        });
    }
    Ok(subnets)
}

activity_handle! {
    /// Loads a cluster's network and IAM context
    ///
    /// Records written without the node instance role, the security groups
    /// or the subnets are completed from the IAM, VPC and subnet stacks.
    LoadClusterContext
}

#[async_trait]
impl Activity for LoadClusterContext {
    const NAME: &'static str = "eks-load-cluster-context";
    type Input = ActivityInput;
    type Output = ClusterContext;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<ClusterContext> {
        let stored = self.deps.clusters.get_cluster(input.cluster_id).await?;
        let model = stored.eks()?;
        let cluster = &input.cluster_name;

        let mut context = ClusterContext {
            vpc_id: model.vpc_id.clone().unwrap_or_default(),
            security_group_id: model.security_group_id.clone().unwrap_or_default(),
            node_security_group_id: model.node_security_group_id.clone().unwrap_or_default(),
            node_instance_role_id: model.node_instance_role_id.clone().unwrap_or_default(),
            node_instance_role_arn: model.node_instance_role_arn.clone().unwrap_or_default(),
            subnets: model.subnets.clone(),
            ssh_key_name: or_empty(&model.ssh_key_name),
            kubernetes_version: model.kubernetes_version.clone(),
        };

        let stale_iam =
            context.node_instance_role_id.is_empty() || context.node_instance_role_arn.is_empty();
        let stale_vpc = context.vpc_id.is_empty()
            || context.security_group_id.is_empty()
            || context.node_security_group_id.is_empty();
        let stale_subnets = context.subnets.is_empty();
        if !(stale_iam || stale_vpc || stale_subnets) {
            return Ok(context);
        }

        warn!(
            cluster = %cluster,
            stale_iam,
            stale_vpc,
            stale_subnets,
            "Cluster record incomplete, reading stack outputs"
        );
        let session = self.deps.session(&input).await?;
        if stale_iam {
            let iam = IamStackOutput::from_outputs(
                &required_stack(&session, &StackName::iam(cluster)).await?,
            )?;
            context.node_instance_role_id = iam.node_instance_role_id;
            context.node_instance_role_arn = iam.node_instance_role_arn;
        }
        if stale_vpc {
            let vpc =
                VpcConfig::from_outputs(&required_stack(&session, &StackName::vpc(cluster)).await?)?;
            context.vpc_id = vpc.vpc_id;
            context.security_group_id = vpc.security_group_id;
            context.node_security_group_id = vpc.node_security_group_id;
        }
        if stale_subnets {
            context.subnets = subnets_from_stacks(&session, cluster).await?;
        }
        Ok(context)
    }
}

activity_handle! {
    /// Root volume size declared by an image
    GetAmiSize
}

/// Input of [`GetAmiSize`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAmiSizeInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Image id
    pub image: String,
}

#[async_trait]
impl Activity for GetAmiSize {
    const NAME: &'static str = "eks-get-ami-size";
    type Input = GetAmiSizeInput;
    type Output = u32;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<u32> {
        let session = self.deps.session(&input.envelope).await?;
        session.compute.image_root_volume_size(&input.image).await
    }
}

activity_handle! {
    /// Registers the Kubernetes label set of a node pool
    RegisterLabelSet
}

/// Input of [`RegisterLabelSet`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLabelSetInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Node pool name
    pub node_pool: String,
    /// Labels
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
impl Activity for RegisterLabelSet {
    const NAME: &'static str = "eks-register-label-set";
    type Input = RegisterLabelSetInput;
    type Output = ();

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<()> {
        let key = input.envelope.node_pool_key(&input.node_pool);
        self.deps.label_sets.register(&key, &input.labels).await
    }
}

/// Input of [`CreateNodePoolStack`] and [`UpdateNodePoolStack`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolStackInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Requested pool
    pub pool: NodePoolDescriptor,
    /// Cluster context
    pub context: ClusterContext,
    /// Resolved subnets of the pool
    pub subnet_ids: Vec<String>,
    /// Effective root volume size
    pub volume_size: u32,
    /// Launch configuration fingerprint
    pub version: NodePoolVersion,
    /// Extra stack tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Outcome of a node pool stack create or update
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolStackOutput {
    /// Stack id
    pub stack_id: String,
    /// Desired capacity applied to the group
    pub desired_capacity: u32,
}

fn node_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

impl NodePoolStackInput {
    fn stack_request(&self, desired_capacity: u32, step: &str) -> StackRequest {
        let cluster = &self.envelope.cluster_name;
        let pool = &self.pool;
        let (min_size, max_size) = pool.bounds();
        let (encrypted, kms_key) = match &pool.volume.encryption {
            Some(enc) => (enc.enabled, enc.kms_key.clone().unwrap_or_default()),
            None => (false, String::new()),
        };
        let bootstrap_arguments = if pool.labels.is_empty() {
            String::new()
        } else {
            format!("--kubelet-extra-args '--node-labels={}'", node_labels(&pool.labels))
        };

        let parameters = BTreeMap::from([
            ("ClusterName".to_string(), cluster.clone()),
            ("NodeGroupName".to_string(), pool.name.clone()),
            ("NodeAutoScalingGroupMinSize".to_string(), min_size.to_string()),
            ("NodeAutoScalingGroupMaxSize".to_string(), max_size.to_string()),
            ("NodeAutoScalingGroupDesiredCapacity".to_string(), desired_capacity.to_string()),
            ("ClusterAutoscalerEnabled".to_string(), pool.autoscaling.enabled.to_string()),
            ("NodeInstanceType".to_string(), pool.instance_type.clone()),
            ("NodeImageId".to_string(), pool.image.clone()),
            ("NodeVolumeSize".to_string(), self.volume_size.to_string()),
            (
                "NodeVolumeType".to_string(),
                pool.volume.storage_type.clone().unwrap_or_default(),
            ),
            ("NodeVolumeEncryption".to_string(), encrypted.to_string()),
            ("NodeVolumeEncryptionKeyARN".to_string(), kms_key),
            ("NodeSpotPrice".to_string(), pool.spot_price.clone()),
            (
                "KeyName".to_string(),
                self.context.ssh_key_name.clone().unwrap_or_default(),
            ),
            ("Subnets".to_string(), self.subnet_ids.join(",")),
            ("VpcId".to_string(), self.context.vpc_id.clone()),
            (
                "ClusterControlPlaneSecurityGroup".to_string(),
                self.context.security_group_id.clone(),
            ),
            (
                "NodeSecurityGroup".to_string(),
                self.context.node_security_group_id.clone(),
            ),
            ("CustomNodeSecurityGroups".to_string(), pool.security_groups.join(",")),
            (
                "NodeInstanceRoleId".to_string(),
                self.context.node_instance_role_id.clone(),
            ),
            ("NodePoolVersion".to_string(), self.version.as_str().to_string()),
            ("BootstrapArguments".to_string(), bootstrap_arguments),
        ]);

        StackRequest {
            stack_name: StackName::node_pool(cluster, &pool.name),
            template: StackTemplate::NodePool,
            parameters,
            tags: cluster_tags(cluster, &self.tags),
            request_token: self
                .envelope
                .request_token(&format!("{step}-{}", pool.name)),
        }
    }
}

activity_handle! {
    /// Creates the autoscaling group stack of a new node pool
    CreateNodePoolStack
}

#[async_trait]
impl Activity for CreateNodePoolStack {
    const NAME: &'static str = "eks-create-node-pool-stack";
    type Input = NodePoolStackInput;
    type Output = NodePoolStackOutput;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<NodePoolStackOutput> {
        let session = self.deps.session(&input.envelope).await?;
        let desired_capacity = input.pool.size;
        let request = input.stack_request(desired_capacity, Self::NAME);

        let stack = create_stack_and_wait(&self.deps, &session, ctx, &request).await?;
        info!(
            cluster = %input.envelope.cluster_name,
            node_pool = %input.pool.name,
            version = %input.version,
            "Node pool stack created"
        );
        Ok(NodePoolStackOutput {
            stack_id: stack.stack_id,
            desired_capacity,
        })
    }
}

activity_handle! {
    /// Updates the autoscaling group stack of an existing node pool
    ///
    /// The live desired capacity is kept and clamped into the new bounds.
    UpdateNodePoolStack
}

#[async_trait]
impl Activity for UpdateNodePoolStack {
    const NAME: &'static str = "eks-update-node-pool-stack";
    type Input = NodePoolStackInput;
    type Output = NodePoolStackOutput;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<NodePoolStackOutput> {
        let session = self.deps.session(&input.envelope).await?;
        let stack_name = StackName::node_pool(&input.envelope.cluster_name, &input.pool.name);
        let (min_size, max_size) = input.pool.bounds();

        let current = match session.autoscaling.describe_group(&stack_name).await? {
            Some(group) => group.desired_capacity,
            None => {
                warn!(group = %stack_name, "Autoscaling group not found, using requested size");
                input.pool.size
            }
        };
        let desired_capacity = clamp_desired_capacity(current, min_size, max_size);
        debug!(group = %stack_name, current, desired_capacity, min_size, max_size, "Clamped desired capacity");

        let request = input.stack_request(desired_capacity, Self::NAME);
        let stack = match session.stacks.update_stack(&request).await? {
            UpdateStackOutcome::NoChanges => {
                info!(stack = %stack_name, "Node pool stack unchanged");
                required_stack(&session, &stack_name).await?
            }
            UpdateStackOutcome::Accepted { .. } => self
                .deps
                .stack_waiter()
                .wait(session.stacks.as_ref(), ctx, &stack_name, StackOperation::Update)
                .await?
                .ok_or_else(|| Error::not_found("stack", &stack_name))?,
        };

        Ok(NodePoolStackOutput {
            stack_id: stack.stack_id,
            desired_capacity,
        })
    }
}

activity_handle! {
    /// Polls an autoscaling group until its healthy instances reach the
    /// desired capacity
    ///
    /// A group that does not exist yet keeps the poll going.
    WaitForFulfillment
}

/// Input of [`WaitForFulfillment`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForFulfillmentInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Node pool name
    pub node_pool: String,
    /// Capacity to wait for
    pub desired_capacity: u32,
}

#[async_trait]
impl Activity for WaitForFulfillment {
    const NAME: &'static str = "eks-wait-for-fulfillment";
    type Input = WaitForFulfillmentInput;
    type Output = u32;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<u32> {
        let session = self.deps.session(&input.envelope).await?;
        let group_name = StackName::node_pool(&input.envelope.cluster_name, &input.node_pool);
        let settings = &self.deps.settings.node_pool;
        let interval = Duration::from_secs(settings.fulfillment_poll_interval_secs);
        let attempts = (settings.fulfillment_timeout_secs / settings.fulfillment_poll_interval_secs.max(1))
            .max(1) as u32;

        for attempt in 1..=attempts {
            ctx.checkpoint()?;
            let group = session.autoscaling.describe_group(&group_name).await?;
            let healthy = group.as_ref().map_or(0, |g| g.healthy_instances);
            ctx.heartbeat(&json!({"group": group_name, "healthy": healthy, "attempt": attempt}));

            match group {
                Some(group) if group.healthy_instances >= input.desired_capacity => {
                    info!(group = %group_name, healthy, "Node pool fulfilled");
                    return Ok(healthy);
                }
                Some(group) => debug!(
                    group = %group_name,
                    healthy,
                    desired = input.desired_capacity,
                    current_desired = group.desired_capacity,
                    "Waiting for instances"
                ),
                None => debug!(group = %group_name, "Autoscaling group not found yet"),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(Error::timeout(format!("autoscaling group {group_name}"), attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::testing::{envelope, Mocks};
    use crate::cloud::{AutoscalingGroup, StackStatus};
    use eks_common::model::{ClusterIdentity, ClusterStatus, Distribution, EksClusterModel, StoredCluster};
    use mockall::Sequence;
    use rstest::rstest;

    fn stored(model: EksClusterModel) -> StoredCluster {
        StoredCluster {
            identity: ClusterIdentity {
                id: 1,
                uid: "uid-1".to_string(),
                name: "c1".to_string(),
                organization_id: 7,
                region: "eu-west-1".to_string(),
                secret_id: "secret-1".to_string(),
            },
            status: ClusterStatus::Running,
            status_message: String::new(),
            distribution: Distribution::Eks(model),
        }
    }

    fn complete_model() -> EksClusterModel {
        EksClusterModel {
            vpc_id: Some("vpc-1".to_string()),
            security_group_id: Some("sg-1".to_string()),
            node_security_group_id: Some("sg-2".to_string()),
            subnets: vec![Subnet {
                subnet_id: "subnet-1".to_string(),
                cidr: "10.0.1.0/24".to_string(),
                availability_zone: "eu-west-1a".to_string(),
            }],
            node_instance_role_id: Some("nodes".to_string()),
            node_instance_role_arn: Some("arn:role/nodes".to_string()),
            kubernetes_version: "1.32".to_string(),
            ..Default::default()
        }
    }

    fn group(desired: u32, healthy: u32) -> AutoscalingGroup {
        AutoscalingGroup {
            name: "pipeline-eks-nodepool-c1-pool".to_string(),
            desired_capacity: desired,
            min_size: 1,
            max_size: 10,
            healthy_instances: healthy,
        }
    }

    fn stack_input(pool: NodePoolDescriptor) -> NodePoolStackInput {
        NodePoolStackInput {
            envelope: envelope(),
            version: NodePoolVersion::for_pool(&pool, 50).expect("version"),
            pool,
            context: ClusterContext {
                vpc_id: "vpc-1".to_string(),
                subnets: vec![],
                ..Default::default()
            },
            subnet_ids: vec!["subnet-1".to_string()],
            volume_size: 50,
            tags: BTreeMap::new(),
        }
    }

    #[rstest]
    #[case::clamped_up(5, 6, 10, 6)]
    #[case::clamped_down(12, 1, 10, 10)]
    #[case::inside(4, 1, 10, 4)]
    #[case::fixed(3, 2, 2, 2)]
    fn desired_capacity_is_clamped(
        #[case] current: u32,
        #[case] min: u32,
        #[case] max: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(clamp_desired_capacity(current, min, max), expected);
    }

    // ==========================================================================
    // Story Tests: Cluster Context Resolution
    // ==========================================================================

    mod context_resolution {
        use super::*;

        #[tokio::test]
        async fn story_complete_record_needs_no_stack_reads() {
            let mut mocks = Mocks::default();
            mocks
                .clusters
                .expect_get_cluster()
                .returning(|_| Ok(stored(complete_model())));
            mocks.stacks.expect_describe_stack().never();

            let context = LoadClusterContext::new(mocks.into_deps())
                .execute(&ActivityContext::detached("t"), envelope())
                .await
                .expect("context");
            assert_eq!(context.subnet_ids(), vec!["subnet-1".to_string()]);
            assert_eq!(context.node_instance_role_arn, "arn:role/nodes");
        }

        #[tokio::test]
        async fn story_stale_record_is_completed_from_stacks() {
            let mut mocks = Mocks::default();
            mocks.clusters.expect_get_cluster().returning(|_| {
                Ok(stored(EksClusterModel {
                    node_instance_role_id: None,
                    node_instance_role_arn: None,
                    subnets: vec![],
                    ..complete_model()
                }))
            });
            mocks.stacks.expect_describe_stack().returning(|name| {
                let outputs = if name == "pipeline-eks-iam-c1" {
                    BTreeMap::from([
                        ("ClusterRoleArn".to_string(), "arn:role/cluster".to_string()),
                        ("NodeInstanceRoleId".to_string(), "nodes".to_string()),
                        ("NodeInstanceRoleArn".to_string(), "arn:role/nodes".to_string()),
                    ])
                } else {
                    BTreeMap::from([
                        ("SubnetId".to_string(), format!("id-{name}")),
                        ("AvailabilityZone".to_string(), "eu-west-1b".to_string()),
                    ])
                };
                Ok(Some(StackDescription {
                    stack_name: name.to_string(),
                    status: StackStatus::CreateComplete,
                    outputs,
                    parameters: BTreeMap::from([(
                        "SubnetBlock".to_string(),
                        "10.0.9.0/24".to_string(),
                    )]),
                    ..Default::default()
                }))
            });
            mocks.stacks.expect_list_stacks_by_tag().returning(|_, _| {
                Ok(vec![
                    "pipeline-eks-vpc-c1".to_string(),
                    "pipeline-eks-subnet-c1-10-0-9-0-24".to_string(),
                ])
            });

            let context = LoadClusterContext::new(mocks.into_deps())
                .execute(&ActivityContext::detached("t"), envelope())
                .await
                .expect("reconstructed");
            assert_eq!(context.node_instance_role_id, "nodes");
            assert_eq!(context.node_instance_role_arn, "arn:role/nodes");
            assert_eq!(context.subnets.len(), 1);
            assert_eq!(
                context.subnets[0].subnet_id,
                "id-pipeline-eks-subnet-c1-10-0-9-0-24"
            );
            assert_eq!(context.subnets[0].cidr, "10.0.9.0/24");
            assert_eq!(context.vpc_id, "vpc-1");
        }

        #[tokio::test]
        async fn story_non_eks_cluster_is_rejected() {
            let mut mocks = Mocks::default();
            mocks.clusters.expect_get_cluster().returning(|_| {
                let mut cluster = stored(complete_model());
                cluster.distribution = Distribution::Unsupported("gke".to_string());
                Ok(cluster)
            });
            let err = LoadClusterContext::new(mocks.into_deps())
                .execute(&ActivityContext::detached("t"), envelope())
                .await
                .expect_err("not eks");
            assert!(matches!(err, Error::Validation { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn update_keeps_live_capacity_within_new_bounds() {
        let mut mocks = Mocks::default();
        mocks
            .autoscaling
            .expect_describe_group()
            .returning(|_| Ok(Some(group(5, 5))));
        mocks
            .stacks
            .expect_update_stack()
            .withf(|r| {
                r.parameters["NodeAutoScalingGroupDesiredCapacity"] == "6"
                    && r.parameters["NodeAutoScalingGroupMinSize"] == "6"
            })
            .times(1)
            .returning(|_| {
                Ok(UpdateStackOutcome::Accepted {
                    stack_id: "arn:np".to_string(),
                })
            });
        mocks.stacks.expect_describe_stack().returning(|name| {
            Ok(Some(StackDescription {
                stack_id: "arn:np".to_string(),
                stack_name: name.to_string(),
                status: StackStatus::UpdateComplete,
                ..Default::default()
            }))
        });

        let out = UpdateNodePoolStack::new(mocks.into_deps())
            .execute(
                &ActivityContext::detached("t"),
                stack_input(NodePoolDescriptor::autoscaling("pool", 6, 6, 10, "m5.large")),
            )
            .await
            .expect("updated");
        assert_eq!(out.desired_capacity, 6);
        assert_eq!(out.stack_id, "arn:np");
    }

    #[tokio::test]
    async fn unchanged_update_reads_the_stack_id() {
        let mut mocks = Mocks::default();
        mocks
            .autoscaling
            .expect_describe_group()
            .returning(|_| Ok(Some(group(3, 3))));
        mocks
            .stacks
            .expect_update_stack()
            .returning(|_| Ok(UpdateStackOutcome::NoChanges));
        mocks.stacks.expect_describe_stack().returning(|name| {
            Ok(Some(StackDescription {
                stack_id: "arn:np".to_string(),
                stack_name: name.to_string(),
                status: StackStatus::CreateComplete,
                ..Default::default()
            }))
        });

        let out = UpdateNodePoolStack::new(mocks.into_deps())
            .execute(
                &ActivityContext::detached("t"),
                stack_input(NodePoolDescriptor::autoscaling("pool", 2, 1, 5, "m5.large")),
            )
            .await
            .expect("unchanged");
        assert_eq!(out.desired_capacity, 3);
    }

    #[test]
    fn labels_become_kubelet_arguments() {
        let mut pool = NodePoolDescriptor::fixed("pool", 2, "m5.large");
        pool.labels = BTreeMap::from([
            ("team".to_string(), "data".to_string()),
            ("tier".to_string(), "batch".to_string()),
        ]);
        let request = stack_input(pool).stack_request(2, "step");
        assert_eq!(
            request.parameters["BootstrapArguments"],
            "--kubelet-extra-args '--node-labels=team=data,tier=batch'"
        );
        assert_eq!(request.stack_name, "pipeline-eks-nodepool-c1-pool");
        assert_eq!(request.parameters["NodeAutoScalingGroupMaxSize"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn fulfillment_tolerates_a_missing_group() {
        let mut mocks = Mocks::default();
        let mut seq = Sequence::new();
        mocks
            .autoscaling
            .expect_describe_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        mocks
            .autoscaling
            .expect_describe_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(group(3, 1))));
        mocks
            .autoscaling
            .expect_describe_group()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(group(3, 3))));

        let healthy = WaitForFulfillment::new(mocks.into_deps())
            .execute(
                &ActivityContext::detached("t"),
                WaitForFulfillmentInput {
                    envelope: envelope(),
                    node_pool: "pool".to_string(),
                    desired_capacity: 3,
                },
            )
            .await
            .expect("fulfilled");
        assert_eq!(healthy, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fulfillment_times_out() {
        let mut mocks = Mocks::default();
        mocks
            .autoscaling
            .expect_describe_group()
            .times(5)
            .returning(|_| Ok(None));

        let err = WaitForFulfillment::new(mocks.into_deps())
            .execute(
                &ActivityContext::detached("t"),
                WaitForFulfillmentInput {
                    envelope: envelope(),
                    node_pool: "pool".to_string(),
                    desired_capacity: 3,
                },
            )
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::Timeout { attempts: 5, .. }));
    }
}
