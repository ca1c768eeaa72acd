//! Application load balancer, target group and listener

use super::context::{AwsContext, FromAwsContext};
use super::error::{SdkResultExt, ignore_not_found};
use crate::reconcile::descriptor::{ListenerParams, attr};
use crate::reconcile::{
    Dependencies, Handle, ProviderError, ResourceAdapter, ResourceDescriptor, ResourceParams,
    ResourceState,
};
use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::Client;
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, IpAddressType, LoadBalancer, LoadBalancerSchemeEnum,
    LoadBalancerTypeEnum, ProtocolEnum, TargetGroup, TargetTypeEnum,
};
use ecs_deploy_common::ResourceKind;
use tracing::info;

fn load_balancer_handle(lb: &LoadBalancer) -> Result<Handle, ProviderError> {
    let arn = lb
        .load_balancer_arn()
        .ok_or_else(|| ProviderError::malformed("load balancer without ARN"))?;
    let dns = lb
        .dns_name()
        .ok_or_else(|| ProviderError::malformed("load balancer without DNS name"))?;
    Ok(Handle::new(arn).with_attribute(attr::DNS_NAME, dns))
}

fn target_group_handle(tg: &TargetGroup) -> Result<Handle, ProviderError> {
    tg.target_group_arn()
        .map(Handle::new)
        .ok_or_else(|| ProviderError::malformed("target group without ARN"))
}

/// Look a load balancer up by exact name
async fn find_load_balancer(client: &Client, name: &str) -> Result<Option<Handle>, ProviderError> {
    let output = ignore_not_found(
        client
            .describe_load_balancers()
            .names(name)
            .send()
            .await
            .classify(),
    )?;
    let Some(output) = output else {
        return Ok(None);
    };
    output
        .load_balancers()
        .iter()
        .find(|lb| lb.load_balancer_name() == Some(name))
        .map(load_balancer_handle)
        .transpose()
}

pub struct LoadBalancerAdapter {
    client: Client,
}

impl FromAwsContext for LoadBalancerAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }
}

#[async_trait]
impl ResourceAdapter for LoadBalancerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        Ok(match find_load_balancer(&self.client, descriptor.name()).await? {
            Some(handle) => ResourceState::Present(handle),
            None => ResourceState::Absent,
        })
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        _deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let ResourceParams::LoadBalancer(params) = &descriptor.params else {
            return Err(ProviderError::malformed("load balancer adapter given wrong parameters"));
        };

        let output = self
            .client
            .create_load_balancer()
            .name(descriptor.name())
            .set_subnets(Some(params.subnets.clone()))
            .set_security_groups(Some(params.security_groups.clone()))
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .r#type(LoadBalancerTypeEnum::Application)
            .ip_address_type(IpAddressType::Ipv4)
            .send()
            .await
            .classify()?;

        let lb = output
            .load_balancers()
            .first()
            .ok_or_else(|| ProviderError::malformed("CreateLoadBalancer returned nothing"))?;
        let handle = load_balancer_handle(lb)?;
        info!(
            load_balancer = %descriptor.name(),
            dns_name = ?handle.attribute(attr::DNS_NAME),
            "Load balancer created"
        );
        Ok(handle)
    }

    async fn delete(
        &self,
        _descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_load_balancer()
            .load_balancer_arn(&handle.id)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}

pub struct TargetGroupAdapter {
    client: Client,
}

impl FromAwsContext for TargetGroupAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }
}

#[async_trait]
impl ResourceAdapter for TargetGroupAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TargetGroup
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let output = ignore_not_found(
            self.client
                .describe_target_groups()
                .names(descriptor.name())
                .send()
                .await
                .classify(),
        )?;
        let Some(output) = output else {
            return Ok(ResourceState::Absent);
        };
        match output
            .target_groups()
            .iter()
            .find(|tg| tg.target_group_name() == Some(descriptor.name()))
        {
            Some(tg) => Ok(ResourceState::Present(target_group_handle(tg)?)),
            None => Ok(ResourceState::Absent),
        }
    }

    /// Fargate tasks register by IP, so the target type is `ip`
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        _deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let ResourceParams::TargetGroup(params) = &descriptor.params else {
            return Err(ProviderError::malformed("target group adapter given wrong parameters"));
        };

        let output = self
            .client
            .create_target_group()
            .name(descriptor.name())
            .protocol(ProtocolEnum::Http)
            .port(i32::from(params.port))
            .vpc_id(&params.vpc_id)
            .target_type(TargetTypeEnum::Ip)
            .health_check_protocol(ProtocolEnum::Http)
            .health_check_path(&params.health_check_path)
            .send()
            .await
            .classify()?;

        let tg = output
            .target_groups()
            .first()
            .ok_or_else(|| ProviderError::malformed("CreateTargetGroup returned nothing"))?;
        let handle = target_group_handle(tg)?;
        info!(target_group = %descriptor.name(), arn = %handle.id, "Target group created");
        Ok(handle)
    }

    async fn delete(
        &self,
        _descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_target_group()
            .target_group_arn(&handle.id)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}

pub struct ListenerAdapter {
    client: Client,
}

impl FromAwsContext for ListenerAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }
}

impl ListenerAdapter {
    fn params(descriptor: &ResourceDescriptor) -> Result<&ListenerParams, ProviderError> {
        match &descriptor.params {
            ResourceParams::Listener(p) => Ok(p),
            other => Err(ProviderError::malformed(format!(
                "listener adapter given {} parameters",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl ResourceAdapter for ListenerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Listener
    }

    /// Listeners are matched by port on the named load balancer
    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let params = Self::params(descriptor)?;
        let Some(lb) = find_load_balancer(&self.client, &params.load_balancer).await? else {
            return Ok(ResourceState::Absent);
        };

        let output = ignore_not_found(
            self.client
                .describe_listeners()
                .load_balancer_arn(&lb.id)
                .send()
                .await
                .classify(),
        )?;
        let Some(output) = output else {
            return Ok(ResourceState::Absent);
        };

        let port = i32::from(params.port);
        match output
            .listeners()
            .iter()
            .find(|l| l.port() == Some(port))
            .and_then(|l| l.listener_arn())
        {
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
        let lb_arn = &deps.get(ResourceKind::LoadBalancer, &params.load_balancer)?.id;
        let tg_arn = &deps.get(ResourceKind::TargetGroup, &params.target_group)?.id;

        let forward = Action::builder()
            .r#type(ActionTypeEnum::Forward)
            .target_group_arn(tg_arn)
            .build();

        let output = self
            .client
            .create_listener()
            .load_balancer_arn(lb_arn)
            .protocol(ProtocolEnum::Http)
            .port(i32::from(params.port))
            .default_actions(forward)
            .send()
            .await
            .classify()?;

        let arn = output
            .listeners()
            .first()
            .and_then(|l| l.listener_arn())
            .ok_or_else(|| ProviderError::malformed("CreateListener returned nothing"))?;
        info!(port = params.port, arn = %arn, "Listener created");
        Ok(Handle::new(arn))
    }

    async fn delete(
        &self,
        _descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_listener()
            .listener_arn(&handle.id)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}
