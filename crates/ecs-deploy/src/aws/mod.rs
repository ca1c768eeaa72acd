//! AWS provider adapters
//!
//! - ECR: repositories and images
//! - ECS: clusters, task definitions, services
//! - ELBv2: load balancer, target group, listener
//! - API Gateway: REST API in front of the load balancer
//! - STS: account guard

pub mod account;
pub mod apigateway;
pub mod context;
pub mod ecr;
pub mod ecs;
pub mod elb;
pub mod error;

pub use account::{AccountId, get_current_account_id, verify_account};
pub use context::{AwsContext, FromAwsContext};
pub use error::{SdkResultExt, classify_aws_error, classify_sdk_error, suggestion};

use crate::docker::DockerCli;
use crate::reconcile::AdapterSet;

/// An adapter for every resource kind, all sharing `ctx`
pub fn aws_adapters(ctx: &AwsContext, docker: DockerCli) -> AdapterSet {
    AdapterSet::new()
        .with(ecr::RegistryAdapter::from_context(ctx))
        .with(ecr::ImageAdapter::new(ctx, docker))
        .with(ecs::ClusterAdapter::from_context(ctx))
        .with(ecs::TaskDefinitionAdapter::from_context(ctx))
        .with(ecs::ServiceAdapter::from_context(ctx))
        .with(elb::LoadBalancerAdapter::from_context(ctx))
        .with(elb::TargetGroupAdapter::from_context(ctx))
        .with(elb::ListenerAdapter::from_context(ctx))
        .with(apigateway::GatewayAdapter::from_context(ctx))
}
