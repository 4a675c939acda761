//! Network activities: VPC and subnet stacks, teardown helpers and the
//! generic idempotent stack delete

use std::collections::BTreeMap;

use async_trait::async_trait;
use eks_common::model::Subnet;
use eks_common::{Error, Result, CLUSTER_TAG_KEY};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{activity_handle, create_stack_and_wait, ActivityInput};
use crate::cloud::{
    cluster_tags, DeleteStackOutcome, StackDescription, StackName, StackOperation, StackRequest,
    StackTemplate,
};
use crate::runtime::{Activity, ActivityContext, ActivityOptions};

/// CIDR of a created VPC when the caller gives none
pub const DEFAULT_VPC_CIDR: &str = "192.168.0.0/16";

/// Outputs of the VPC stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcConfig {
    /// Stack id
    pub stack_id: String,
    /// VPC id
    pub vpc_id: String,
    /// Control plane security group
    pub security_group_id: String,
    /// Worker node security group
    pub node_security_group_id: String,
    /// Route table of the cluster subnets
    pub route_table_id: String,
}

impl VpcConfig {
    /// Read the outputs of a completed VPC stack
    pub fn from_outputs(stack: &StackDescription) -> Result<Self> {
        Ok(Self {
            stack_id: stack.stack_id.clone(),
            vpc_id: stack.output("VpcId")?.to_string(),
            security_group_id: stack.output("SecurityGroups")?.to_string(),
            node_security_group_id: stack.output("NodeSecurityGroup")?.to_string(),
            route_table_id: stack.output("RouteTableId")?.to_string(),
        })
    }

    /// Both security groups
    pub fn security_group_ids(&self) -> Vec<String> {
        vec![
            self.security_group_id.clone(),
            self.node_security_group_id.clone(),
        ]
    }
}

activity_handle! {
    /// Creates the VPC stack, or adopts an existing VPC into it
    CreateVpc
}

/// Input of [`CreateVpc`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVpcInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Existing VPC to adopt
    pub vpc_id: Option<String>,
    /// CIDR of a new VPC
    pub vpc_cidr: Option<String>,
    /// Existing route table to adopt
    pub route_table_id: Option<String>,
    /// Extra stack tags
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
impl Activity for CreateVpc {
    const NAME: &'static str = "eks-create-vpc";
    type Input = CreateVpcInput;
    type Output = VpcConfig;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<VpcConfig> {
        let session = self.deps.session(&input.envelope).await?;
        let cluster = &input.envelope.cluster_name;

        let request = StackRequest {
            stack_name: StackName::vpc(cluster),
            template: StackTemplate::Vpc,
            parameters: BTreeMap::from([
                ("ClusterName".to_string(), cluster.clone()),
                ("VpcId".to_string(), input.vpc_id.clone().unwrap_or_default()),
                (
                    "VpcBlock".to_string(),
                    input
                        .vpc_cidr
                        .clone()
                        .unwrap_or_else(|| DEFAULT_VPC_CIDR.to_string()),
                ),
                (
                    "RouteTableId".to_string(),
                    input.route_table_id.clone().unwrap_or_default(),
                ),
            ]),
            tags: cluster_tags(cluster, &input.tags),
            request_token: input.envelope.request_token(Self::NAME),
        };

        let stack = create_stack_and_wait(&self.deps, &session, ctx, &request).await?;
        VpcConfig::from_outputs(&stack)
    }
}

activity_handle! {
    /// Creates one subnet stack in the cluster VPC
    CreateSubnet
}

/// Input of [`CreateSubnet`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubnetInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// VPC id
    pub vpc_id: String,
    /// Route table to associate
    pub route_table_id: String,
    /// Subnet CIDR
    pub cidr: String,
    /// Availability zone, chosen by the cloud when absent
    pub availability_zone: Option<String>,
    /// Extra stack tags
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
impl Activity for CreateSubnet {
    const NAME: &'static str = "eks-create-subnet";
    type Input = CreateSubnetInput;
    type Output = Subnet;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<Subnet> {
        let session = self.deps.session(&input.envelope).await?;
        let cluster = &input.envelope.cluster_name;
        let stack_name = StackName::subnet(cluster, &input.cidr);

        let request = StackRequest {
            stack_name: stack_name.clone(),
            template: StackTemplate::Subnet,
            parameters: BTreeMap::from([
                ("VpcId".to_string(), input.vpc_id.clone()),
                ("RouteTableId".to_string(), input.route_table_id.clone()),
                ("SubnetBlock".to_string(), input.cidr.clone()),
                (
                    "AvailabilityZoneName".to_string(),
                    input.availability_zone.clone().unwrap_or_default(),
                ),
            ]),
            tags: cluster_tags(cluster, &input.tags),
            request_token: input
                .envelope
                .request_token(&format!("{}-{}", Self::NAME, input.cidr)),
        };

        let stack = create_stack_and_wait(&self.deps, &session, ctx, &request).await?;
        Ok(Subnet {
            subnet_id: stack.output("SubnetId")?.to_string(),
            cidr: input.cidr,
            availability_zone: stack.output("AvailabilityZone")?.to_string(),
        })
    }
}

activity_handle! {
    /// Describes a subnet the caller brought
    GetSubnet
}

/// Input of [`GetSubnet`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSubnetInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Subnet id
    pub subnet_id: String,
}

#[async_trait]
impl Activity for GetSubnet {
    const NAME: &'static str = "eks-get-subnet";
    type Input = GetSubnetInput;
    type Output = Subnet;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Subnet> {
        let session = self.deps.session(&input.envelope).await?;
        session.compute.describe_subnet(&input.subnet_id).await
    }
}

activity_handle! {
    /// Reads the VPC stack outputs; `None` when the stack is gone or never
    /// produced outputs
    GetVpcConfig
}

#[async_trait]
impl Activity for GetVpcConfig {
    const NAME: &'static str = "eks-get-vpc-config";
    type Input = ActivityInput;
    type Output = Option<VpcConfig>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Option<VpcConfig>> {
        let session = self.deps.session(&input).await?;
        let stack_name = StackName::vpc(&input.cluster_name);

        let Some(stack) = session.stacks.describe_stack(&stack_name).await? else {
            info!(stack = %stack_name, "VPC stack does not exist");
            return Ok(None);
        };
        if stack.status.is_deleting() {
            info!(stack = %stack_name, status = %stack.status, "VPC stack is being deleted");
            return Ok(None);
        }
        match VpcConfig::from_outputs(&stack) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!(stack = %stack_name, status = %stack.status, error = %e, "VPC stack has no outputs");
                Ok(None)
            }
        }
    }
}

activity_handle! {
    /// Polls until no load balancer is left in the VPC
    WaitForLoadBalancers
}

/// Input of [`WaitForLoadBalancers`] and [`DeleteOrphanNetworkInterfaces`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcScopedInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// VPC id
    pub vpc_id: String,
    /// Security groups of the cluster
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

#[async_trait]
impl Activity for WaitForLoadBalancers {
    const NAME: &'static str = "eks-wait-for-load-balancers";
    type Input = VpcScopedInput;
    type Output = u32;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<u32> {
        let session = self.deps.session(&input.envelope).await?;
        let poll = &self.deps.settings.load_balancer;

        for attempt in 1..=poll.max_attempts {
            let remaining = session
                .load_balancers
                .list_load_balancers(&input.vpc_id)
                .await?;
            ctx.heartbeat(&json!({"vpc": input.vpc_id, "remaining": remaining.len()}));
            if remaining.is_empty() {
                info!(vpc = %input.vpc_id, polls = attempt, "Load balancers released");
                return Ok(attempt);
            }
            debug!(vpc = %input.vpc_id, ?remaining, "Waiting for load balancers");
            if attempt < poll.max_attempts {
                tokio::time::sleep(poll.poll_interval()).await;
            }
        }
        Err(Error::timeout(
            format!("load balancers of {}", input.vpc_id),
            poll.max_attempts,
        ))
    }
}

activity_handle! {
    /// Deletes detached network interfaces the CNI left in the VPC
    DeleteOrphanNetworkInterfaces
}

#[async_trait]
impl Activity for DeleteOrphanNetworkInterfaces {
    const NAME: &'static str = "eks-delete-orphan-network-interfaces";
    type Input = VpcScopedInput;
    type Output = Vec<String>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Vec<String>> {
        let session = self.deps.session(&input.envelope).await?;
        let interfaces = session
            .compute
            .list_network_interfaces(&input.vpc_id, &input.security_group_ids)
            .await?;

        let mut deleted = Vec::new();
        for interface in interfaces.into_iter().filter(|i| i.status == "available") {
            session.compute.delete_network_interface(&interface.id).await?;
            info!(interface = %interface.id, description = %interface.description, "Deleted orphan network interface");
            deleted.push(interface.id);
        }
        Ok(deleted)
    }
}

activity_handle! {
    /// Finds every subnet stack of the cluster by tag, including subnets
    /// created outside the original request
    ListSubnetStacks
}

#[async_trait]
impl Activity for ListSubnetStacks {
    const NAME: &'static str = "eks-list-subnet-stacks";
    type Input = ActivityInput;
    type Output = Vec<String>;

    fn options(&self) -> ActivityOptions {
        self.deps.default_options()
    }

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Vec<String>> {
        let session = self.deps.session(&input).await?;
        let prefix = StackName::subnet_prefix(&input.cluster_name);
        let mut stacks: Vec<String> = session
            .stacks
            .list_stacks_by_tag(CLUSTER_TAG_KEY, &input.cluster_name)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        stacks.sort();
        Ok(stacks)
    }
}

activity_handle! {
    /// Deletes a stack and waits for DELETE_COMPLETE
    ///
    /// A stack that does not exist, or is already deleting or deleted, is a
    /// success without further calls.
    DeleteStack
}

/// Input of [`DeleteStack`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteStackInput {
    /// Envelope
    pub envelope: ActivityInput,
    /// Stack to delete
    pub stack_name: String,
}

/// Output of [`DeleteStack`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteStackOutput {
    /// Stack name
    pub stack_name: String,
    /// Whether this call deleted the stack
    pub deleted: bool,
}

#[async_trait]
impl Activity for DeleteStack {
    const NAME: &'static str = "eks-delete-stack";
    type Input = DeleteStackInput;
    type Output = DeleteStackOutput;

    fn options(&self) -> ActivityOptions {
        self.deps.long_running_options()
    }

    async fn execute(&self, ctx: &ActivityContext, input: Self::Input) -> Result<DeleteStackOutput> {
        let session = self.deps.session(&input.envelope).await?;
        let stack_name = input.stack_name;
        let skipped = DeleteStackOutput {
            stack_name: stack_name.clone(),
            deleted: false,
        };

        match session.stacks.describe_stack(&stack_name).await? {
            None => {
                info!(stack = %stack_name, "Stack already gone");
                return Ok(skipped);
            }
            Some(stack) if stack.status.is_deleting() => {
                info!(stack = %stack_name, status = %stack.status, "Stack already deleting");
                return Ok(skipped);
            }
            Some(_) => {}
        }

        let token = input
            .envelope
            .request_token(&format!("{}-{}", Self::NAME, stack_name));
        if session.stacks.delete_stack(&stack_name, &token).await? == DeleteStackOutcome::NotFound {
            return Ok(skipped);
        }

        self.deps
            .stack_waiter()
            .wait(session.stacks.as_ref(), ctx, &stack_name, StackOperation::Delete)
            .await?;
        info!(stack = %stack_name, "Stack deleted");
        Ok(DeleteStackOutput {
            stack_name,
            deleted: true,
        })
    }
}
