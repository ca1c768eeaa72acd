//! API Gateway REST API proxying a path to the load balancer

use super::context::{AwsContext, FromAwsContext};
use super::error::SdkResultExt;
use crate::reconcile::descriptor::{GatewayParams, attr};
use crate::reconcile::{
    Dependencies, Handle, ProviderError, ResourceAdapter, ResourceDescriptor, ResourceParams,
    ResourceState,
};
use async_trait::async_trait;
use aws_sdk_apigateway::Client;
use aws_sdk_apigateway::types::IntegrationType;
use ecs_deploy_common::ResourceKind;
use tracing::{debug, info, warn};

/// Page size for GetRestApis
const PAGE_LIMIT: i32 = 500;

pub struct GatewayAdapter {
    client: Client,
    region: String,
}

impl FromAwsContext for GatewayAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.apigateway_client(),
            region: ctx.region().to_string(),
        }
    }
}

/// Non-empty path segments of `/a/b`
fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// HTTP_PROXY target for a load balancer; the listener speaks plain HTTP
fn integration_uri(dns_name: &str, path: &str) -> String {
    format!("http://{dns_name}/{}", path_segments(path).join("/"))
}

fn invoke_url(api_id: &str, region: &str, stage: &str, path: &str) -> String {
    format!(
        "https://{api_id}.execute-api.{region}.amazonaws.com/{stage}/{}",
        path_segments(path).join("/")
    )
}

impl GatewayAdapter {
    fn params(descriptor: &ResourceDescriptor) -> Result<&GatewayParams, ProviderError> {
        match &descriptor.params {
            ResourceParams::Gateway(p) => Ok(p),
            other => Err(ProviderError::malformed(format!(
                "gateway adapter given {} parameters",
                other.kind()
            ))),
        }
    }

    fn handle(&self, api_id: &str, params: &GatewayParams) -> Handle {
        Handle::new(api_id).with_attribute(
            attr::INVOKE_URL,
            invoke_url(api_id, &self.region, &params.stage_name, &params.path),
        )
    }

    /// Resources, method, integration and deployment for a fresh API
    async fn configure(
        &self,
        api_id: &str,
        params: &GatewayParams,
        dns_name: &str,
    ) -> Result<(), ProviderError> {
        let resources = self
            .client
            .get_resources()
            .rest_api_id(api_id)
            .send()
            .await
            .classify()?;
        let mut parent_id = resources
            .items()
            .iter()
            .find(|r| r.path() == Some("/"))
            .and_then(|r| r.id())
            .ok_or_else(|| ProviderError::malformed("REST API has no root resource"))?
            .to_string();

        for segment in path_segments(&params.path) {
            let resource = self
                .client
                .create_resource()
                .rest_api_id(api_id)
                .parent_id(&parent_id)
                .path_part(segment)
                .send()
                .await
                .classify()?;
            parent_id = resource
                .id()
                .ok_or_else(|| ProviderError::malformed("CreateResource returned no id"))?
                .to_string();
            debug!(api_id = %api_id, segment = %segment, resource_id = %parent_id, "Resource created");
        }

        self.client
            .put_method()
            .rest_api_id(api_id)
            .resource_id(&parent_id)
            .http_method("GET")
            .authorization_type("NONE")
            .send()
            .await
            .classify()?;

        let endpoint = integration_uri(dns_name, &params.path);
        info!(api_id = %api_id, endpoint = %endpoint, "Creating HTTP proxy integration");
        self.client
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(&parent_id)
            .http_method("GET")
            .r#type(IntegrationType::HttpProxy)
            .integration_http_method("GET")
            .uri(endpoint)
            .send()
            .await
            .classify()?;

        self.client
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(&params.stage_name)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for GatewayAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Gateway
    }

    /// REST API names are not unique; the first exact match wins
    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let params = Self::params(descriptor)?;
        let mut position: Option<String> = None;
        let mut matches: Vec<String> = Vec::new();

        loop {
            let page = self
                .client
                .get_rest_apis()
                .limit(PAGE_LIMIT)
                .set_position(position.take())
                .send()
                .await
                .classify()?;

            matches.extend(
                page.items()
                    .iter()
                    .filter(|api| api.name() == Some(descriptor.name()))
                    .filter_map(|api| api.id().map(str::to_string)),
            );

            match page.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_string()),
                _ => break,
            }
        }

        if matches.len() > 1 {
            warn!(
                gateway = %descriptor.name(),
                count = matches.len(),
                "Several REST APIs share this name, using the first"
            );
        }
        Ok(match matches.into_iter().next() {
            Some(id) => ResourceState::Present(self.handle(&id, params)),
            None => ResourceState::Absent,
        })
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let params = Self::params(descriptor)?;
        let dns_name = deps.attribute(ResourceKind::LoadBalancer, &params.load_balancer, attr::DNS_NAME)?;

        let api = self
            .client
            .create_rest_api()
            .name(descriptor.name())
            .send()
            .await
            .classify()?;
        let api_id = api
            .id()
            .ok_or_else(|| ProviderError::malformed("CreateRestApi returned no id"))?
            .to_string();
        info!(gateway = %descriptor.name(), api_id = %api_id, "REST API created");

        // A half-configured API would be found (and kept) by the next apply
        if let Err(e) = self.configure(&api_id, params, dns_name).await {
            warn!(api_id = %api_id, error = %e, "Gateway setup failed, removing REST API");
            if let Err(cleanup) = self
                .client
                .delete_rest_api()
                .rest_api_id(&api_id)
                .send()
                .await
                .classify()
            {
                warn!(api_id = %api_id, error = %cleanup, "Failed to remove half-configured REST API");
            }
            return Err(e);
        }

        let handle = self.handle(&api_id, params);
        info!(
            gateway = %descriptor.name(),
            url = ?handle.attribute(attr::INVOKE_URL),
            "Gateway deployed"
        );
        Ok(handle)
    }

    async fn delete(
        &self,
        _descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_rest_api()
            .rest_api_id(&handle.id)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}
