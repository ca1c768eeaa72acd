//! Translates a [`DeployConfig`] into the descriptors of the full stack
//!
//! ```text
//! registry <- image <- task-definition <--+
//! cluster <-------------------------------+-- service
//! load-balancer <- listener <-------------+
//! target-group  <-/                        \
//! load-balancer <- gateway                  (tasks register with the TG)
//! ```

use crate::config::DeployConfig;
use crate::reconcile::descriptor::{
    GatewayParams, ImageParams, ListenerParams, LoadBalancerParams, RegistryParams,
    ServiceParams, TargetGroupParams, TaskDefinitionParams,
};
use crate::reconcile::{ConfigurationError, Plan, ResourceDescriptor, ResourceParams};
use ecs_deploy_common::ResourceKind;

/// Descriptors in declaration order; kinds listed in `reconcile.optional`
/// are marked optional
pub fn descriptors(config: &DeployConfig) -> Vec<ResourceDescriptor> {
    let registry = ResourceDescriptor::new(
        config.registry_name(),
        ResourceParams::Registry(RegistryParams {
            force_delete: config.registry.force_delete,
        }),
    );

    let image = ResourceDescriptor::new(
        config.image.tag.clone(),
        ResourceParams::Image(ImageParams {
            repository: config.registry_name(),
            context: config.image.context.clone(),
            dockerfile: config.image.dockerfile.clone(),
            platform: config.image.platform.clone(),
        }),
    );

    let cluster = ResourceDescriptor::bare(ResourceKind::Cluster, config.cluster_name());

    let task_definition = ResourceDescriptor::new(
        config.task_family(),
        ResourceParams::TaskDefinition(TaskDefinitionParams {
            image: config.image.tag.clone(),
            container_name: config.container_name(),
            container_port: config.task.container_port,
            cpu: config.task.cpu.clone(),
            memory: config.task.memory.clone(),
            execution_role_arn: config.task.execution_role_arn.clone(),
            environment: config.task.environment.clone(),
        }),
    );

    let load_balancer = ResourceDescriptor::new(
        config.load_balancer_name(),
        ResourceParams::LoadBalancer(LoadBalancerParams {
            subnets: config.network.subnets.clone(),
            security_groups: config.network.security_groups.clone(),
        }),
    );

    let target_group = ResourceDescriptor::new(
        config.target_group_name(),
        ResourceParams::TargetGroup(TargetGroupParams {
            port: config.task.container_port,
            vpc_id: config.network.vpc_id.clone(),
            health_check_path: config.load_balancer.health_check_path.clone(),
        }),
    );

    let listener = ResourceDescriptor::new(
        config.listener_name(),
        ResourceParams::Listener(ListenerParams {
            load_balancer: config.load_balancer_name(),
            target_group: config.target_group_name(),
            port: config.load_balancer.listener_port,
        }),
    );

    let service = ResourceDescriptor::new(
        config.service_name(),
        ResourceParams::Service(ServiceParams {
            cluster: config.cluster_name(),
            task_definition: config.task_family(),
            desired_count: config.service.desired_count,
            subnets: config.network.subnets.clone(),
            security_groups: config.network.security_groups.clone(),
            assign_public_ip: config.service.assign_public_ip,
            target_group: Some(config.target_group_name()),
            listener: Some(config.listener_name()),
            container_name: config.container_name(),
            container_port: config.task.container_port,
        }),
    );

    let mut descriptors = vec![
        registry,
        image,
        cluster,
        task_definition,
        load_balancer,
        target_group,
        listener,
        service,
    ];

    if config.gateway.enabled {
        descriptors.push(ResourceDescriptor::new(
            config.gateway_name(),
            ResourceParams::Gateway(GatewayParams {
                load_balancer: config.load_balancer_name(),
                path: config.gateway.path.clone(),
                stage_name: config.gateway.stage.clone(),
            }),
        ));
    }

    descriptors
        .into_iter()
        .map(|d| {
            if config.reconcile.optional.contains(&d.kind()) {
                d.optional()
            } else {
                d
            }
        })
        .collect()
}

pub fn plan(config: &DeployConfig) -> Result<Plan, ConfigurationError> {
    Plan::build(descriptors(config))
}
