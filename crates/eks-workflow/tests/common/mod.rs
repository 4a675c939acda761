//! In-memory cloud and stores for workflow scenario tests
//!
//! Stacks settle as soon as they are created, updated or deleted. Failures
//! are injected per stack name.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eks_common::config::{PollSettings, Settings};
use eks_common::model::{
    ClusterIdentity, ClusterInfraDescriptor, ClusterStatus, Distribution, EksClusterModel,
    NodePoolDescriptor, NodePoolStatus, StoredCluster, Subnet, SubnetSpec,
};
use eks_common::{Error, Result, WorkflowIdentity};
use eks_workflow::cloud::kubernetes::ClusterBootstrapApi;
use eks_workflow::cloud::{
    AccessKey, AutoscalingApi, AutoscalingGroup, CloudSession, ComputeApi, ControlPlane,
    ControlPlaneStatus, CreateControlPlaneRequest, CreateOutcome, CreateStackOutcome,
    DeleteStackOutcome, EksApi, IamApi, LoadBalancerApi, NetworkInterface, Role, StackApi,
    StackDescription, StackRequest, StackStatus, StackTemplate, StaticSessionFactory,
    UpdateStackOutcome,
};
use eks_workflow::store::{
    ClusterStore, LabelSetStore, NodePoolKey, NodePoolRecord, NodePoolStore, SecretStore,
};
use eks_workflow::{Dependencies, EksActivities, InlineRuntime};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::storage::v1::StorageClass;

pub const CLUSTER: &str = "c1";
pub const CLUSTER_ID: u64 = 1;
pub const ORG: u64 = 7;
pub const REGION: &str = "eu-west-1";

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[derive(Default)]
struct CloudState {
    stacks: BTreeMap<String, StackDescription>,
    failing_stacks: BTreeMap<String, String>,
    failure_reasons: BTreeMap<String, String>,
    calls: Vec<String>,
    control_plane: Option<ControlPlane>,
    addons: BTreeSet<String>,
    key_pairs: BTreeSet<String>,
    existing_subnets: BTreeMap<String, Subnet>,
    image_sizes: BTreeMap<String, u32>,
    group_desired: BTreeMap<String, u32>,
    load_balancer_polls: u32,
    network_interfaces: Vec<NetworkInterface>,
}

/// Every cloud API over one shared state
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    fn with<T>(&self, f: impl FnOnce(&mut CloudState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Creating `stack_name` ends in ROLLBACK_COMPLETE with `reason`
    pub fn fail_stack(&self, stack_name: &str, reason: &str) {
        self.with(|s| s.failing_stacks.insert(stack_name.to_string(), reason.to_string()));
    }

    /// Drop a rolled back stack and its injected failure, as an operator would
    pub fn clear_failed_stack(&self, stack_name: &str) {
        self.with(|s| {
            s.failing_stacks.remove(stack_name);
            s.failure_reasons.remove(stack_name);
            s.stacks.remove(stack_name);
        });
    }

    /// A subnet the caller brings
    pub fn add_existing_subnet(&self, subnet_id: &str, cidr: &str, availability_zone: &str) {
        self.with(|s| {
            s.existing_subnets.insert(
                subnet_id.to_string(),
                Subnet {
                    subnet_id: subnet_id.to_string(),
                    cidr: cidr.to_string(),
                    availability_zone: availability_zone.to_string(),
                },
            )
        });
    }

    /// Root volume size of an image
    pub fn set_image_size(&self, image: &str, size_gb: u32) {
        self.with(|s| s.image_sizes.insert(image.to_string(), size_gb));
    }

    /// Live desired capacity of a group until its stack is next updated
    pub fn set_group_desired(&self, group: &str, desired: u32) {
        self.with(|s| s.group_desired.insert(group.to_string(), desired));
    }

    /// Load balancers stay in the VPC for this many polls
    pub fn hold_load_balancers(&self, polls: u32) {
        self.with(|s| s.load_balancer_polls = polls);
    }

    /// A network interface in the VPC
    pub fn add_network_interface(&self, id: &str, status: &str) {
        self.with(|s| {
            s.network_interfaces.push(NetworkInterface {
                id: id.to_string(),
                status: status.to_string(),
                description: "aws-K8S-i-0123".to_string(),
            })
        });
    }

    /// Put a settled stack in place, as a previous run would have left it
    pub fn seed_stack(&self, request: &StackRequest) {
        self.with(|s| {
            let stack = Self::settled(request, StackStatus::CreateComplete);
            s.stacks.insert(request.stack_name.clone(), stack);
        });
    }

    pub fn stack(&self, stack_name: &str) -> Option<StackDescription> {
        self.with(|s| s.stacks.get(stack_name).cloned())
    }

    pub fn stack_names(&self) -> Vec<String> {
        self.with(|s| s.stacks.keys().cloned().collect())
    }

    pub fn has_control_plane(&self) -> bool {
        self.with(|s| s.control_plane.is_some())
    }

    pub fn addons(&self) -> BTreeSet<String> {
        self.with(|s| s.addons.clone())
    }

    pub fn key_pairs(&self) -> BTreeSet<String> {
        self.with(|s| s.key_pairs.clone())
    }

    pub fn network_interfaces(&self) -> Vec<NetworkInterface> {
        self.with(|s| s.network_interfaces.clone())
    }

    /// Every mutating call in order, as `operation:target`
    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn calls_for(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{operation}:");
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn outputs(request: &StackRequest) -> BTreeMap<String, String> {
        let param = |key: &str| request.parameters.get(key).cloned().unwrap_or_default();
        let cluster = param("ClusterName");
        let mut outputs = BTreeMap::new();
        match request.template {
            StackTemplate::Iam => {
                outputs.insert(
                    "ClusterRoleArn".to_string(),
                    format!("arn:aws:iam::123456789012:role/{cluster}-cluster"),
                );
                outputs.insert("NodeInstanceRoleId".to_string(), format!("{cluster}-node"));
                outputs.insert(
                    "NodeInstanceRoleArn".to_string(),
                    format!("arn:aws:iam::123456789012:role/{cluster}-node"),
                );
                if param("DefaultUser") == "false" {
                    outputs.insert("ClusterUserName".to_string(), format!("{cluster}-user"));
                }
            }
            StackTemplate::Vpc => {
                let vpc_id = Some(param("VpcId"))
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| format!("vpc-{cluster}"));
                let route_table = Some(param("RouteTableId"))
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| format!("rtb-{cluster}"));
                outputs.insert("VpcId".to_string(), vpc_id);
                outputs.insert("SecurityGroups".to_string(), format!("sg-cluster-{cluster}"));
                outputs.insert("NodeSecurityGroup".to_string(), format!("sg-node-{cluster}"));
                outputs.insert("RouteTableId".to_string(), route_table);
            }
            StackTemplate::Subnet => {
                let az = Some(param("AvailabilityZoneName"))
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| format!("{REGION}a"));
                outputs.insert(
                    "SubnetId".to_string(),
                    format!("subnet-{}", sanitize(&param("SubnetBlock"))),
                );
                outputs.insert("AvailabilityZone".to_string(), az);
            }
            StackTemplate::NodePool => {}
        }
        outputs
    }

    fn settled(request: &StackRequest, status: StackStatus) -> StackDescription {
        StackDescription {
            stack_id: format!("arn:aws:cloudformation:{REGION}:123456789012:stack/{}", request.stack_name),
            stack_name: request.stack_name.clone(),
            status,
            status_reason: None,
            outputs: Self::outputs(request),
            parameters: request.parameters.clone(),
            tags: request.tags.clone(),
        }
    }

    pub fn session(self: &Arc<Self>) -> CloudSession {
        CloudSession {
            stacks: self.clone(),
            compute: self.clone(),
            load_balancers: self.clone(),
            iam: self.clone(),
            eks: self.clone(),
            autoscaling: self.clone(),
        }
    }
}

#[async_trait]
impl StackApi for FakeCloud {
    async fn create_stack(&self, request: &StackRequest) -> Result<CreateStackOutcome> {
        self.with(|s| {
            s.calls.push(format!("create_stack:{}", request.stack_name));
            if s.stacks.contains_key(&request.stack_name) {
                return Ok(CreateStackOutcome::AlreadyExists);
            }
            let status = match s.failing_stacks.get(&request.stack_name) {
                Some(reason) => {
                    s.failure_reasons
                        .insert(request.stack_name.clone(), reason.clone());
                    StackStatus::RollbackComplete
                }
                None => StackStatus::CreateComplete,
            };
            let stack = Self::settled(request, status);
            let stack_id = stack.stack_id.clone();
            s.stacks.insert(request.stack_name.clone(), stack);
            Ok(CreateStackOutcome::Accepted { stack_id })
        })
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateStackOutcome> {
        self.with(|s| {
            s.calls.push(format!("update_stack:{}", request.stack_name));
            let Some(stack) = s.stacks.get_mut(&request.stack_name) else {
                return Err(Error::not_found("stack", &request.stack_name));
            };
            if stack.parameters == request.parameters {
                return Ok(UpdateStackOutcome::NoChanges);
            }
            stack.parameters = request.parameters.clone();
            stack.status = StackStatus::UpdateComplete;
            let stack_id = stack.stack_id.clone();
            s.group_desired.remove(&request.stack_name);
            Ok(UpdateStackOutcome::Accepted { stack_id })
        })
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        Ok(self.with(|s| s.stacks.get(stack_name).cloned()))
    }

    async fn delete_stack(&self, stack_name: &str, _request_token: &str) -> Result<DeleteStackOutcome> {
        self.with(|s| {
            s.calls.push(format!("delete_stack:{stack_name}"));
            match s.stacks.remove(stack_name) {
                Some(_) => Ok(DeleteStackOutcome::Accepted),
                None => Ok(DeleteStackOutcome::NotFound),
            }
        })
    }

    async fn last_failure_reason(&self, stack_name: &str) -> Result<Option<String>> {
        Ok(self.with(|s| s.failure_reasons.get(stack_name).cloned()))
    }

    async fn list_stacks_by_tag(&self, key: &str, value: &str) -> Result<Vec<String>> {
        Ok(self.with(|s| {
            s.stacks
                .values()
                .filter(|stack| stack.tags.get(key).map(String::as_str) == Some(value))
                .map(|stack| stack.stack_name.clone())
                .collect()
        }))
    }
}

#[async_trait]
impl ComputeApi for FakeCloud {
    async fn image_root_volume_size(&self, image_id: &str) -> Result<u32> {
        Ok(self.with(|s| s.image_sizes.get(image_id).copied().unwrap_or(20)))
    }

    async fn describe_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        self.with(|s| s.existing_subnets.get(subnet_id).cloned())
            .ok_or_else(|| Error::not_found("subnet", subnet_id))
    }

    async fn import_key_pair(&self, key_name: &str, _public_key: &str) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("import_key_pair:{key_name}"));
            s.key_pairs.insert(key_name.to_string());
        });
        Ok(())
    }

    async fn delete_key_pair(&self, key_name: &str) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("delete_key_pair:{key_name}"));
            s.key_pairs.remove(key_name);
        });
        Ok(())
    }

    async fn list_network_interfaces(
        &self,
        _vpc_id: &str,
        _security_group_ids: &[String],
    ) -> Result<Vec<NetworkInterface>> {
        Ok(self.with(|s| s.network_interfaces.clone()))
    }

    async fn delete_network_interface(&self, interface_id: &str) -> Result<()> {
        self.with(|s| {
            s.calls.push(format!("delete_network_interface:{interface_id}"));
            s.network_interfaces.retain(|i| i.id != interface_id);
        });
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn list_load_balancers(&self, _vpc_id: &str) -> Result<Vec<String>> {
        Ok(self.with(|s| {
            if s.load_balancer_polls == 0 {
                Vec::new()
            } else {
                s.load_balancer_polls -= 1;
                vec!["k8s-elb-1".to_string()]
            }
        }))
    }
}

#[async_trait]
impl IamApi for FakeCloud {
    async fn get_role(&self, role_name: &str) -> Result<Option<Role>> {
        Ok(Some(Role {
            name: role_name.to_string(),
            arn: format!("arn:aws:iam::123456789012:role/{role_name}"),
        }))
    }

    async fn create_access_key(&self, user_name: &str) -> Result<AccessKey> {
        self.with(|s| s.calls.push(format!("create_access_key:{user_name}")));
        Ok(AccessKey {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
        })
    }
}

#[async_trait]
impl EksApi for FakeCloud {
    async fn create_cluster(&self, request: &CreateControlPlaneRequest) -> Result<CreateOutcome> {
        self.with(|s| {
            s.calls.push(format!("create_cluster:{}", request.name));
            if s.control_plane.is_some() {
                return Ok(CreateOutcome::AlreadyExists);
            }
            s.control_plane = Some(ControlPlane {
                name: request.name.clone(),
                arn: format!("arn:aws:eks:{REGION}:123456789012:cluster/{}", request.name),
                status: ControlPlaneStatus::Active,
                endpoint: Some(format!("https://{}.eks.example.com", request.name)),
                certificate_authority: Some("Y2VydGlmaWNhdGU=".to_string()),
                status_reason: None,
            });
            Ok(CreateOutcome::Created)
        })
    }

    async fn describe_cluster(&self, _name: &str) -> Result<Option<ControlPlane>> {
        Ok(self.with(|s| s.control_plane.clone()))
    }

    async fn delete_cluster(&self, name: &str) -> Result<bool> {
        Ok(self.with(|s| {
            s.calls.push(format!("delete_cluster:{name}"));
            s.control_plane.take().is_some()
        }))
    }

    async fn create_addon(
        &self,
        _cluster: &str,
        addon: &str,
        _version: Option<String>,
        _request_token: &str,
    ) -> Result<CreateOutcome> {
        Ok(self.with(|s| {
            if s.addons.insert(addon.to_string()) {
                CreateOutcome::Created
            } else {
                CreateOutcome::AlreadyExists
            }
        }))
    }
}

#[async_trait]
impl AutoscalingApi for FakeCloud {
    async fn describe_group(&self, name: &str) -> Result<Option<AutoscalingGroup>> {
        Ok(self.with(|s| {
            let stack = s.stacks.get(name)?;
            let param = |key: &str| {
                stack
                    .parameters
                    .get(key)
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or_default()
            };
            let desired = s
                .group_desired
                .get(name)
                .copied()
                .unwrap_or_else(|| param("NodeAutoScalingGroupDesiredCapacity"));
            Some(AutoscalingGroup {
                name: name.to_string(),
                desired_capacity: desired,
                min_size: param("NodeAutoScalingGroupMinSize"),
                max_size: param("NodeAutoScalingGroupMaxSize"),
                healthy_instances: desired,
            })
        }))
    }
}

#[derive(Default)]
struct StoreState {
    clusters: BTreeMap<u64, StoredCluster>,
    status_history: Vec<(ClusterStatus, String)>,
    node_pools: BTreeMap<NodePoolKey, NodePoolRecord>,
    node_pool_history: Vec<(String, NodePoolStatus)>,
    reject_node_pool_status: bool,
    secrets: BTreeMap<String, (String, BTreeMap<String, String>)>,
    label_sets: BTreeMap<String, BTreeMap<String, String>>,
    applied: Vec<String>,
}

/// Every persistence collaborator over one shared state
#[derive(Default)]
pub struct FakeStores {
    state: Mutex<StoreState>,
}

impl FakeStores {
    fn with<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn seed_cluster(&self, identity: &ClusterIdentity) {
        self.with(|s| {
            s.clusters.insert(
                identity.id,
                StoredCluster {
                    identity: identity.clone(),
                    status: ClusterStatus::Creating,
                    status_message: String::new(),
                    distribution: Distribution::Eks(EksClusterModel::default()),
                },
            )
        });
    }

    pub fn cluster(&self) -> StoredCluster {
        self.with(|s| s.clusters.get(&CLUSTER_ID).cloned()).expect("cluster seeded")
    }

    pub fn model(&self) -> EksClusterModel {
        match self.cluster().distribution {
            Distribution::Eks(model) => model,
            Distribution::Unsupported(name) => panic!("unexpected distribution {name}"),
        }
    }

    pub fn update_model(&self, f: impl FnOnce(&mut EksClusterModel)) {
        self.with(|s| {
            if let Some(StoredCluster {
                distribution: Distribution::Eks(model),
                ..
            }) = s.clusters.get_mut(&CLUSTER_ID)
            {
                f(model);
            }
        });
    }

    pub fn status_history(&self) -> Vec<ClusterStatus> {
        self.with(|s| s.status_history.iter().map(|(status, _)| *status).collect())
    }

    /// Statuses written to `pool`, oldest first
    pub fn node_pool_history(&self, pool: &str) -> Vec<NodePoolStatus> {
        self.with(|s| {
            s.node_pool_history
                .iter()
                .filter(|(name, _)| name == pool)
                .map(|(_, status)| *status)
                .collect()
        })
    }

    /// Every node pool status write fails from now on
    pub fn reject_node_pool_status(&self) {
        self.with(|s| s.reject_node_pool_status = true);
    }

    pub fn node_pool(&self, name: &str) -> Option<NodePoolRecord> {
        self.with(|s| {
            s.node_pools
                .iter()
                .find(|(k, _)| k.node_pool_name == name)
                .map(|(_, r)| r.clone())
        })
    }

    pub fn node_pool_names(&self) -> Vec<String> {
        self.with(|s| s.node_pools.keys().map(|k| k.node_pool_name.clone()).collect())
    }

    pub fn seed_node_pool(&self, pool: NodePoolDescriptor, status: NodePoolStatus) {
        let key = NodePoolKey {
            organization_id: ORG,
            cluster_id: CLUSTER_ID,
            cluster_name: CLUSTER.to_string(),
            node_pool_name: pool.name.clone(),
        };
        self.with(|s| {
            s.node_pools.insert(
                key,
                NodePoolRecord {
                    name: pool.name.clone(),
                    status,
                    status_message: String::new(),
                    stack_id: None,
                    descriptor: pool,
                },
            )
        });
    }

    pub fn label_set(&self, pool: &str) -> Option<BTreeMap<String, String>> {
        self.with(|s| s.label_sets.get(pool).cloned())
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.with(|s| s.secrets.values().map(|(name, _)| name.clone()).collect())
    }

    pub fn applied(&self) -> Vec<String> {
        self.with(|s| s.applied.clone())
    }
}

#[async_trait]
impl ClusterStore for FakeStores {
    async fn get_cluster(&self, cluster_id: u64) -> Result<StoredCluster> {
        self.with(|s| s.clusters.get(&cluster_id).cloned())
            .ok_or_else(|| Error::not_found("cluster", cluster_id.to_string()))
    }

    async fn set_status(&self, cluster_id: u64, status: ClusterStatus, message: &str) -> Result<()> {
        self.with(|s| {
            s.status_history.push((status, message.to_string()));
            let cluster = s
                .clusters
                .get_mut(&cluster_id)
                .ok_or_else(|| Error::not_found("cluster", cluster_id.to_string()))?;
            cluster.status = status;
            cluster.status_message = message.to_string();
            Ok(())
        })
    }

    async fn persist(&self, cluster: &StoredCluster) -> Result<()> {
        self.with(|s| s.clusters.insert(cluster.identity.id, cluster.clone()));
        Ok(())
    }
}

#[async_trait]
impl NodePoolStore for FakeStores {
    async fn create_node_pool(&self, key: &NodePoolKey, record: &NodePoolRecord) -> Result<()> {
        self.with(|s| {
            if s.node_pools.contains_key(key) {
                return Err(Error::store("node pools", format!("{} exists", key.node_pool_name)));
            }
            s.node_pools.insert(key.clone(), record.clone());
            Ok(())
        })
    }

    async fn list_node_pools(
        &self,
        organization_id: u64,
        cluster_id: u64,
        _cluster_name: &str,
    ) -> Result<Vec<NodePoolRecord>> {
        Ok(self.with(|s| {
            s.node_pools
                .iter()
                .filter(|(k, _)| k.organization_id == organization_id && k.cluster_id == cluster_id)
                .map(|(_, r)| r.clone())
                .collect()
        }))
    }

    async fn update_node_pool_status(
        &self,
        key: &NodePoolKey,
        status: NodePoolStatus,
        message: &str,
    ) -> Result<()> {
        self.with(|s| {
            if s.reject_node_pool_status {
                return Err(Error::store("node pools", "connection refused"));
            }
            let record = s
                .node_pools
                .get_mut(key)
                .ok_or_else(|| Error::not_found("node pool", &key.node_pool_name))?;
            record.status = status;
            record.status_message = message.to_string();
            s.node_pool_history.push((key.node_pool_name.clone(), status));
            Ok(())
        })
    }

    async fn update_node_pool_stack_id(&self, key: &NodePoolKey, stack_id: &str) -> Result<()> {
        self.with(|s| {
            let record = s
                .node_pools
                .get_mut(key)
                .ok_or_else(|| Error::not_found("node pool", &key.node_pool_name))?;
            record.stack_id = Some(stack_id.to_string());
            Ok(())
        })
    }

    async fn delete_node_pool(&self, key: &NodePoolKey) -> Result<()> {
        self.with(|s| s.node_pools.remove(key));
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FakeStores {
    async fn find(&self, _organization_id: u64, name: &str) -> Result<Option<String>> {
        Ok(self.with(|s| {
            s.secrets
                .iter()
                .find(|(_, (n, _))| n == name)
                .map(|(id, _)| id.clone())
        }))
    }

    async fn create(
        &self,
        _organization_id: u64,
        name: &str,
        payload: &BTreeMap<String, String>,
    ) -> Result<String> {
        Ok(self.with(|s| {
            let id = format!("secret-{}", s.secrets.len() + 1);
            s.secrets.insert(id.clone(), (name.to_string(), payload.clone()));
            id
        }))
    }

    async fn get(&self, _organization_id: u64, secret_id: &str) -> Result<BTreeMap<String, String>> {
        self.with(|s| s.secrets.get(secret_id).map(|(_, p)| p.clone()))
            .ok_or_else(|| Error::not_found("secret", secret_id))
    }

    async fn update(
        &self,
        _organization_id: u64,
        secret_id: &str,
        payload: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.with(|s| {
            let entry = s
                .secrets
                .get_mut(secret_id)
                .ok_or_else(|| Error::not_found("secret", secret_id))?;
            entry.1 = payload.clone();
            Ok(())
        })
    }
}

#[async_trait]
impl LabelSetStore for FakeStores {
    async fn register(&self, key: &NodePoolKey, labels: &BTreeMap<String, String>) -> Result<()> {
        self.with(|s| s.label_sets.insert(key.node_pool_name.clone(), labels.clone()));
        Ok(())
    }
}

#[async_trait]
impl ClusterBootstrapApi for FakeStores {
    async fn apply_config_map(&self, _kubeconfig: &str, config_map: &ConfigMap) -> Result<()> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.with(|s| s.applied.push(format!("configmap/{name}")));
        Ok(())
    }

    async fn apply_storage_class(&self, _kubeconfig: &str, storage_class: &StorageClass) -> Result<()> {
        let name = storage_class.metadata.name.clone().unwrap_or_default();
        self.with(|s| s.applied.push(format!("storageclass/{name}")));
        Ok(())
    }
}

/// Short polls so waits settle within a few paused-clock seconds
pub fn settings() -> Settings {
    let poll = PollSettings {
        poll_interval_secs: 1,
        max_attempts: 10,
    };
    let mut settings = Settings {
        stack_waiter: poll.clone(),
        load_balancer: poll,
        ..Settings::default()
    };
    settings.node_pool.fulfillment_poll_interval_secs = 1;
    settings.node_pool.fulfillment_timeout_secs = 10;
    settings
}

pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub stores: Arc<FakeStores>,
    pub activities: EksActivities,
    pub runtime: InlineRuntime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let cloud = Arc::new(FakeCloud::default());
        let stores = Arc::new(FakeStores::default());
        stores.seed_cluster(&identity());
        let deps = Dependencies {
            sessions: Arc::new(StaticSessionFactory(cloud.session())),
            clusters: stores.clone(),
            node_pools: stores.clone(),
            secrets: stores.clone(),
            label_sets: stores.clone(),
            bootstrap: stores.clone(),
            settings: Arc::new(settings),
        };
        Self {
            cloud,
            stores,
            activities: EksActivities::new(deps),
            runtime: InlineRuntime::new(),
        }
    }
}

pub fn identity() -> ClusterIdentity {
    ClusterIdentity {
        id: CLUSTER_ID,
        uid: "uid-1".to_string(),
        name: CLUSTER.to_string(),
        organization_id: ORG,
        region: REGION.to_string(),
        secret_id: "aws-credentials".to_string(),
    }
}

pub fn workflow(name: &str) -> WorkflowIdentity {
    WorkflowIdentity::new(format!("{name}-{CLUSTER}"), "run-1")
}

pub fn new_subnet(cidr: &str) -> SubnetSpec {
    SubnetSpec::New {
        cidr: cidr.to_string(),
        availability_zone: None,
    }
}

/// Two new subnets, one existing subnet and the given pools
pub fn descriptor(node_pools: Vec<NodePoolDescriptor>) -> ClusterInfraDescriptor {
    ClusterInfraDescriptor {
        cluster: identity(),
        network: Default::default(),
        iam: Default::default(),
        kubernetes_version: "1.32".to_string(),
        encryption: None,
        logging: Default::default(),
        endpoint_access: Default::default(),
        ssh_key: None,
        subnets: vec![
            new_subnet("10.0.1.0/24"),
            new_subnet("10.0.2.0/24"),
            SubnetSpec::Existing {
                subnet_id: "subnet-existing".to_string(),
            },
        ],
        node_pools,
        node_pool_subnets: BTreeMap::new(),
        tags: BTreeMap::new(),
    }
}
