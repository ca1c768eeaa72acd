//! Read-only checks against a real AWS account
//!
//! Run with `cargo test -- --ignored` and credentials for a throwaway
//! account. Nothing here creates resources.

use ecs_deploy::aws::{AwsContext, FromAwsContext, ecr, ecs, elb, get_current_account_id};
use ecs_deploy::reconcile::{ResourceAdapter, ResourceDescriptor, ResourceState};
use ecs_deploy_common::ResourceKind;
use ecs_deploy_common::defaults::DEFAULT_REGION;

const MISSING: &str = "ecs-deploy-it-missing";

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn caller_identity_is_a_12_digit_account() {
    let ctx = AwsContext::new(DEFAULT_REGION).await;
    let account = get_current_account_id(&ctx).await.unwrap();
    assert_eq!(account.len(), 12);
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn missing_resources_are_absent() {
    let ctx = AwsContext::new(DEFAULT_REGION).await;

    let registry = ResourceDescriptor::bare(ResourceKind::Registry, MISSING);
    let state = ecr::RegistryAdapter::from_context(&ctx)
        .find(&registry)
        .await
        .unwrap();
    assert_eq!(state, ResourceState::Absent);

    let cluster = ResourceDescriptor::bare(ResourceKind::Cluster, MISSING);
    let state = ecs::ClusterAdapter::from_context(&ctx)
        .find(&cluster)
        .await
        .unwrap();
    assert_eq!(state, ResourceState::Absent);

    let lb = ResourceDescriptor::bare(ResourceKind::LoadBalancer, MISSING);
    let state = elb::LoadBalancerAdapter::from_context(&ctx)
        .find(&lb)
        .await
        .unwrap();
    assert_eq!(state, ResourceState::Absent);
}
