//! Standalone node pool create and update on a running cluster

mod common;

use common::{descriptor, identity, workflow, Harness, CLUSTER};
use eks_common::model::{ClusterStatus, NodePoolDescriptor, NodePoolStatus};
use eks_common::ErrorKind;
use eks_workflow::cloud::StackName;
use eks_workflow::runtime::InlineRuntime;
use eks_workflow::{create_infrastructure, create_node_pool, update_node_pool, ActivityInput};

async fn running_cluster(pools: Vec<NodePoolDescriptor>) -> Harness {
    let h = Harness::new();
    h.cloud
        .add_existing_subnet("subnet-existing", "10.0.9.0/24", "eu-west-1c");
    create_infrastructure(&h.runtime, &h.activities, &workflow("create"), descriptor(pools))
        .await
        .expect("cluster created");
    h
}

fn envelope(name: &str) -> ActivityInput {
    ActivityInput::new(&identity(), &workflow(name))
}

mod create {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn image_root_volume_raises_the_fallback_size() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;
        h.cloud.set_image_size("ami-large-root", 80);
        let mut pool = NodePoolDescriptor::fixed("gpu", 2, "g5.xlarge");
        pool.image = "ami-large-root".to_string();

        let out = create_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("add-gpu"),
            envelope("add-gpu"),
            pool,
        )
        .await
        .expect("pool created");

        assert_eq!(out.volume_size, 80);
        assert_eq!(out.desired_capacity, 2);
        let stack = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "gpu"))
            .expect("stack");
        assert_eq!(stack.parameters["NodeVolumeSize"], "80");
        assert_eq!(stack.parameters["NodePoolVersion"], out.version.as_str());

        let record = h.stores.node_pool("gpu").expect("record");
        assert_eq!(record.status, NodePoolStatus::Active);
        assert_eq!(record.stack_id.as_deref(), Some(out.stack_id.as_str()));
        assert_eq!(h.stores.cluster().status, ClusterStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn undersized_volume_marks_pool_error_and_cluster_warning() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;
        h.cloud.set_image_size("ami-large-root", 80);
        let mut pool = NodePoolDescriptor::fixed("gpu", 1, "g5.xlarge");
        pool.image = "ami-large-root".to_string();
        pool.volume.size_gb = 30;

        let err = create_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("add-gpu"),
            envelope("add-gpu"),
            pool,
        )
        .await
        .expect_err("volume too small");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("node pool gpu sizing"));

        let record = h.stores.node_pool("gpu").expect("record");
        assert_eq!(record.status, NodePoolStatus::Error);
        assert!(record.status_message.starts_with("requested volume size (30 GiB)"));

        let cluster = h.stores.cluster();
        assert_eq!(cluster.status, ClusterStatus::Warning);
        assert!(cluster.status_message.starts_with("node pool gpu: "));
        assert!(h.cloud.stack(&StackName::node_pool(CLUSTER, "gpu")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_pool_is_rejected_before_any_write() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;
        let stacks_before = h.cloud.calls_for("create_stack").len();
        let statuses_before = h.stores.status_history().len();

        let err = create_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("add-z"),
            envelope("add-z"),
            NodePoolDescriptor::fixed("z", 0, ""),
        )
        .await
        .expect_err("invalid pool");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.cloud.calls_for("create_stack").len(), stacks_before);
        assert!(h.stores.node_pool("z").is_none());
        assert_eq!(h.stores.status_history().len(), statuses_before);
        assert_eq!(h.stores.cluster().status, ClusterStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_write_keeps_the_pool_error() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;
        h.cloud.set_image_size("ami-large-root", 80);
        h.stores.reject_node_pool_status();
        let mut pool = NodePoolDescriptor::fixed("gpu", 1, "g5.xlarge");
        pool.image = "ami-large-root".to_string();
        pool.volume.size_gb = 30;

        let err = create_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("add-gpu"),
            envelope("add-gpu"),
            pool,
        )
        .await
        .expect_err("volume too small");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("node pool gpu sizing"));
        assert_eq!(h.stores.cluster().status, ClusterStatus::Warning);
    }
}

mod update {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn invalid_bounds_are_rejected_before_any_write() {
        let h = running_cluster(vec![NodePoolDescriptor::autoscaling("a", 2, 1, 8, "m5.large")]).await;
        let before = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "a"))
            .expect("stack");

        let err = update_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("update-a"),
            envelope("update-a"),
            NodePoolDescriptor::autoscaling("a", 5, 6, 4, ""),
        )
        .await
        .expect_err("invalid bounds");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(h.cloud.calls_for("update_stack").is_empty());
        let after = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "a"))
            .expect("stack");
        assert_eq!(after, before);
        assert_eq!(h.stores.node_pool("a").expect("record").status, NodePoolStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_and_cluster_are_updating_until_the_stack_settles() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;

        update_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("update-a"),
            envelope("update-a"),
            NodePoolDescriptor::fixed("a", 3, "m5.large"),
        )
        .await
        .expect("pool updated");

        let pool_history = h.stores.node_pool_history("a");
        assert_eq!(
            pool_history[pool_history.len() - 2..],
            [NodePoolStatus::Updating, NodePoolStatus::Active]
        );
        let cluster_history = h.stores.status_history();
        assert_eq!(
            cluster_history[cluster_history.len() - 2..],
            [ClusterStatus::Updating, ClusterStatus::Running]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn live_capacity_is_clamped_into_new_bounds() {
        let h = running_cluster(vec![NodePoolDescriptor::autoscaling("a", 2, 1, 8, "m5.large")]).await;
        let group = StackName::node_pool(CLUSTER, "a");
        h.cloud.set_group_desired(&group, 5);

        let out = update_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("update-a"),
            envelope("update-a"),
            NodePoolDescriptor::autoscaling("a", 6, 6, 10, "m5.large"),
        )
        .await
        .expect("pool updated");

        assert_eq!(out.desired_capacity, 6);
        let stack = h.cloud.stack(&group).expect("stack");
        assert_eq!(stack.parameters["NodeAutoScalingGroupDesiredCapacity"], "6");
        assert_eq!(stack.parameters["NodeAutoScalingGroupMinSize"], "6");
        assert_eq!(stack.parameters["NodeAutoScalingGroupMaxSize"], "10");
        assert_eq!(h.stores.node_pool("a").expect("record").status, NodePoolStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_pool_keeps_its_stack_and_version() {
        let pool = NodePoolDescriptor::fixed("a", 1, "m5.large");
        let h = running_cluster(vec![pool.clone()]).await;
        let before = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "a"))
            .expect("stack");

        let out = update_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("update-a"),
            envelope("update-a"),
            pool,
        )
        .await
        .expect("pool updated");

        let after = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "a"))
            .expect("stack");
        assert_eq!(after, before);
        assert_eq!(out.stack_id, before.stack_id);
        assert_eq!(out.version.as_str(), before.parameters["NodePoolVersion"]);
        assert_eq!(h.cloud.calls_for("update_stack").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cluster_record_is_completed_from_stacks() {
        let h = running_cluster(vec![NodePoolDescriptor::fixed("a", 1, "m5.large")]).await;
        h.stores.update_model(|model| {
            model.node_instance_role_id = None;
            model.node_instance_role_arn = None;
            model.subnets.clear();
        });

        update_node_pool(
            &InlineRuntime::new(),
            &h.activities,
            &workflow("update-a"),
            envelope("update-a"),
            NodePoolDescriptor::fixed("a", 2, "m5.large"),
        )
        .await
        .expect("pool updated");

        let stack = h
            .cloud
            .stack(&StackName::node_pool(CLUSTER, "a"))
            .expect("stack");
        assert_eq!(stack.parameters["NodeInstanceRoleId"], "c1-node");
        // subnets come back from the subnet stacks only; the caller's own
        // subnet has no stack
        assert_eq!(
            stack.parameters["Subnets"],
            "subnet-10-0-1-0-24,subnet-10-0-2-0-24"
        );
    }
}
