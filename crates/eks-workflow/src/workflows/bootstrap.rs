//! Bootstrap workflow: EKS add-ons, then `aws-auth` and the default
//! StorageClass

use eks_common::{Result, WorkflowIdentity};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::join::join_branches;
use crate::activities::bootstrap::{BootstrapKubernetesInput, CreateAddonInput};
use crate::activities::{ActivityInput, EksActivities};
use crate::runtime::WorkflowContext;

/// Input of [`bootstrap_cluster`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapInput {
    /// Envelope of the parent workflow
    pub envelope: ActivityInput,
    /// API server endpoint
    pub endpoint: String,
    /// Base64 CA bundle
    pub certificate_authority: String,
    /// Node instance role mapped into `aws-auth`
    pub node_instance_role_arn: String,
}

/// Install the configured add-ons in parallel, then apply the in-cluster
/// bootstrap resources. Returns the kubeconfig.
pub async fn bootstrap_cluster<C: WorkflowContext>(
    ctx: &C,
    activities: &EksActivities,
    parent: &WorkflowIdentity,
    input: BootstrapInput,
) -> Result<String> {
    let wf = parent.child("bootstrap");
    let envelope = input.envelope.for_workflow(&wf);
    let cluster = envelope.cluster_name.clone();
    info!(cluster = %cluster, workflow = %wf.workflow_id, "Bootstrapping cluster");

    let addons = activities
        .settings()
        .bootstrap
        .addons
        .iter()
        .map(|addon| {
            let step = wf.step(&format!("addon-{}", addon.name));
            let input = CreateAddonInput {
                envelope: envelope.clone(),
                addon: addon.name.clone(),
                version: addon.version.clone(),
            };
            (addon.name.clone(), async move {
                ctx.execute_activity(&activities.create_addon, &step, input).await
            })
        })
        .collect();
    join_branches("addons", addons).await?;

    let kubeconfig = ctx
        .execute_activity(
            &activities.bootstrap_kubernetes,
            &wf.step("bootstrap-kubernetes"),
            BootstrapKubernetesInput {
                envelope,
                endpoint: input.endpoint,
                certificate_authority: input.certificate_authority,
                node_instance_role_arn: input.node_instance_role_arn,
            },
        )
        .await?;
    info!(cluster = %cluster, "Cluster bootstrapped");
    Ok(kubeconfig)
}
