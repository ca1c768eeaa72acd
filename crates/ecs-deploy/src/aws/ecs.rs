//! ECS clusters, Fargate task definitions and services

use super::context::{AwsContext, FromAwsContext};
use super::error::{SdkResultExt, ignore_not_found};
use crate::reconcile::descriptor::{ServiceParams, TaskDefinitionParams, attr};
use crate::reconcile::{
    Dependencies, Handle, ProviderError, ResourceAdapter, ResourceDescriptor, ResourceParams,
    ResourceState,
};
use async_trait::async_trait;
use aws_sdk_ecs::Client;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, KeyValuePair,
    LaunchType, LoadBalancer, NetworkConfiguration, NetworkMode, PortMapping, SortOrder,
    TaskDefinitionStatus, TransportProtocol,
};
use ecs_deploy_common::ResourceKind;
use tracing::{debug, info};

const STATUS_ACTIVE: &str = "ACTIVE";

pub struct ClusterAdapter {
    client: Client,
}

impl FromAwsContext for ClusterAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecs_client(),
        }
    }
}

#[async_trait]
impl ResourceAdapter for ClusterAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    /// Deleted clusters stay visible as INACTIVE for a while; only an
    /// ACTIVE cluster counts as present
    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let output = self
            .client
            .describe_clusters()
            .clusters(descriptor.name())
            .send()
            .await
            .classify()?;

        let cluster = output.clusters().iter().find(|c| {
            c.cluster_name() == Some(descriptor.name()) && c.status() == Some(STATUS_ACTIVE)
        });
        match cluster.and_then(|c| c.cluster_arn()) {
            Some(arn) => Ok(ResourceState::Present(Handle::new(arn))),
            None => Ok(ResourceState::Absent),
        }
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        _deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let output = self
            .client
            .create_cluster()
            .cluster_name(descriptor.name())
            .send()
            .await
            .classify()?;
        let arn = output
            .cluster()
            .and_then(|c| c.cluster_arn())
            .ok_or_else(|| ProviderError::malformed("CreateCluster returned no ARN"))?;
        info!(cluster = %descriptor.name(), arn = %arn, "ECS cluster created");
        Ok(Handle::new(arn))
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        _handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_cluster()
            .cluster(descriptor.name())
            .send()
            .await
            .classify()?;
        Ok(())
    }
}

pub struct TaskDefinitionAdapter {
    client: Client,
}

impl FromAwsContext for TaskDefinitionAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecs_client(),
        }
    }
}

/// Family of a task definition ARN
/// (`arn:aws:ecs:<region>:<account>:task-definition/<family>:<revision>`)
fn task_definition_family(arn: &str) -> Option<&str> {
    let (_, rest) = arn.rsplit_once("task-definition/")?;
    let (family, revision) = rest.rsplit_once(':')?;
    revision.parse::<u32>().ok()?;
    Some(family)
}

impl TaskDefinitionAdapter {
    fn params(descriptor: &ResourceDescriptor) -> Result<&TaskDefinitionParams, ProviderError> {
        match &descriptor.params {
            ResourceParams::TaskDefinition(p) => Ok(p),
            other => Err(ProviderError::malformed(format!(
                "task definition adapter given {} parameters",
                other.kind()
            ))),
        }
    }

    /// ARNs of every ACTIVE revision of `family`, newest first
    async fn active_revisions(&self, family: &str) -> Result<Vec<String>, ProviderError> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_task_definitions()
                .family_prefix(family)
                .status(TaskDefinitionStatus::Active)
                .sort(SortOrder::Desc)
                .set_next_token(next_token.take())
                .send()
                .await
                .classify()?;

            // family_prefix also matches longer family names
            arns.extend(
                output
                    .task_definition_arns()
                    .iter()
                    .filter(|arn| task_definition_family(arn) == Some(family))
                    .cloned(),
            );

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(arns)
    }
}

#[async_trait]
impl ResourceAdapter for TaskDefinitionAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TaskDefinition
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let revisions = self.active_revisions(descriptor.name()).await?;
        debug!(family = %descriptor.name(), revisions = revisions.len(), "Active task definition revisions");
        match revisions.into_iter().next() {
            Some(arn) => Ok(ResourceState::Present(Handle::new(arn))),
            None => Ok(ResourceState::Absent),
        }
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let params = Self::params(descriptor)?;
        let image = deps.attribute(ResourceKind::Image, &params.image, attr::URI)?;

        let mut container = ContainerDefinition::builder()
            .name(&params.container_name)
            .image(image)
            .essential(true)
            .port_mappings(
                PortMapping::builder()
                    .container_port(i32::from(params.container_port))
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            );
        for (name, value) in &params.environment {
            container = container.environment(KeyValuePair::builder().name(name).value(value).build());
        }

        let mut request = self
            .client
            .register_task_definition()
            .family(descriptor.name())
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .cpu(&params.cpu)
            .memory(&params.memory)
            .container_definitions(container.build());
        if !params.execution_role_arn.is_empty() {
            request = request.execution_role_arn(&params.execution_role_arn);
        }

        let output = request.send().await.classify()?;
        let arn = output
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .ok_or_else(|| ProviderError::malformed("RegisterTaskDefinition returned no ARN"))?;
        info!(family = %descriptor.name(), arn = %arn, image = %image, "Task definition registered");
        Ok(Handle::new(arn))
    }

    /// Deregister every ACTIVE revision of the family
    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        _handle: &Handle,
    ) -> Result<(), ProviderError> {
        let revisions = self.active_revisions(descriptor.name()).await?;
        if revisions.is_empty() {
            return Err(ProviderError::not_found(descriptor.name()));
        }
        for arn in &revisions {
            self.client
                .deregister_task_definition()
                .task_definition(arn)
                .send()
                .await
                .classify()?;
            debug!(arn = %arn, "Task definition revision deregistered");
        }
        Ok(())
    }
}

pub struct ServiceAdapter {
    client: Client,
}

impl FromAwsContext for ServiceAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecs_client(),
        }
    }
}

impl ServiceAdapter {
    fn params(descriptor: &ResourceDescriptor) -> Result<&ServiceParams, ProviderError> {
        match &descriptor.params {
            ResourceParams::Service(p) => Ok(p),
            other => Err(ProviderError::malformed(format!(
                "service adapter given {} parameters",
                other.kind()
            ))),
        }
    }

    fn cluster_of(handle: &Handle) -> Result<&str, ProviderError> {
        handle
            .attribute(attr::CLUSTER)
            .ok_or_else(|| ProviderError::malformed("service handle without cluster"))
    }
}

#[async_trait]
impl ResourceAdapter for ServiceAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let params = Self::params(descriptor)?;
        let output = ignore_not_found(
            self.client
                .describe_services()
                .cluster(&params.cluster)
                .services(descriptor.name())
                .send()
                .await
                .classify(),
        )?;
        let Some(output) = output else {
            return Ok(ResourceState::Absent);
        };

        // DRAINING and INACTIVE services are on their way out
        let service = output.services().iter().find(|s| {
            s.service_name() == Some(descriptor.name()) && s.status() == Some(STATUS_ACTIVE)
        });
        match service.and_then(|s| s.service_arn()) {
            Some(arn) => Ok(ResourceState::Present(
                Handle::new(arn).with_attribute(attr::CLUSTER, &params.cluster),
            )),
            None => Ok(ResourceState::Absent),
        }
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let params = Self::params(descriptor)?;
        let cluster = &deps.get(ResourceKind::Cluster, &params.cluster)?.id;
        let task_definition = &deps
            .get(ResourceKind::TaskDefinition, &params.task_definition)?
            .id;
        let desired = i32::try_from(params.desired_count)
            .map_err(|_| ProviderError::malformed("desired count out of range"))?;

        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(params.subnets.clone()))
            .set_security_groups(Some(params.security_groups.clone()))
            .assign_public_ip(if params.assign_public_ip {
                AssignPublicIp::Enabled
            } else {
                AssignPublicIp::Disabled
            })
            .build()
            .map_err(|e| ProviderError::malformed(format!("invalid network configuration: {e}")))?;

        let mut request = self
            .client
            .create_service()
            .cluster(cluster)
            .service_name(descriptor.name())
            .task_definition(task_definition)
            .desired_count(desired)
            .launch_type(LaunchType::Fargate)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc)
                    .build(),
            );
        if let Some(target_group) = &params.target_group {
            let target_group_arn = &deps.get(ResourceKind::TargetGroup, target_group)?.id;
            request = request.load_balancers(
                LoadBalancer::builder()
                    .target_group_arn(target_group_arn)
                    .container_name(&params.container_name)
                    .container_port(i32::from(params.container_port))
                    .build(),
            );
        }

        let output = request.send().await.classify()?;
        let arn = output
            .service()
            .and_then(|s| s.service_arn())
            .ok_or_else(|| ProviderError::malformed("CreateService returned no ARN"))?;
        info!(service = %descriptor.name(), arn = %arn, desired_count = desired, "ECS service created");
        Ok(Handle::new(arn).with_attribute(attr::CLUSTER, &params.cluster))
    }

    async fn delete(
        &self,
        _descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_service()
            .cluster(Self::cluster_of(handle)?)
            .service(&handle.id)
            .send()
            .await
            .classify()?;
        Ok(())
    }

    /// Running plus pending tasks; a service that is already gone has none
    async fn active_count(&self, handle: &Handle) -> Result<Option<u32>, ProviderError> {
        let output = ignore_not_found(
            self.client
                .describe_services()
                .cluster(Self::cluster_of(handle)?)
                .services(&handle.id)
                .send()
                .await
                .classify(),
        )?;

        let service = output
            .as_ref()
            .and_then(|o| o.services().iter().find(|s| s.service_arn() == Some(handle.id.as_str())));
        let count = match service {
            Some(s) => (s.running_count().max(0) + s.pending_count().max(0)) as u32,
            None => 0,
        };
        Ok(Some(count))
    }

    async fn scale(&self, handle: &Handle, desired: u32) -> Result<(), ProviderError> {
        let desired = i32::try_from(desired)
            .map_err(|_| ProviderError::malformed("desired count out of range"))?;
        self.client
            .update_service()
            .cluster(Self::cluster_of(handle)?)
            .service(&handle.id)
            .desired_count(desired)
            .send()
            .await
            .classify()?;
        info!(service = %handle.id, desired, "Service scaled");
        Ok(())
    }
}
