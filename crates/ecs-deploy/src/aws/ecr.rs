//! ECR repositories and the images pushed to them

use super::context::{AwsContext, FromAwsContext};
use super::error::{SdkResultExt, ignore_not_found};
use crate::command::CommandError;
use crate::docker::DockerCli;
use crate::reconcile::descriptor::{ImageParams, attr};
use crate::reconcile::{
    Dependencies, Handle, ProviderError, ResourceAdapter, ResourceDescriptor, ResourceParams,
    ResourceState,
};
use async_trait::async_trait;
use aws_sdk_ecr::Client;
use aws_sdk_ecr::types::{ImageFailureCode, ImageIdentifier};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ecs_deploy_common::ResourceKind;
use tracing::{debug, info, warn};

pub struct RegistryAdapter {
    client: Client,
}

impl FromAwsContext for RegistryAdapter {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecr_client(),
        }
    }
}

fn registry_handle(repo: &aws_sdk_ecr::types::Repository) -> Result<Handle, ProviderError> {
    let arn = repo
        .repository_arn()
        .ok_or_else(|| ProviderError::malformed("repository without ARN"))?;
    let uri = repo
        .repository_uri()
        .ok_or_else(|| ProviderError::malformed("repository without URI"))?;
    Ok(Handle::new(arn).with_attribute(attr::URI, uri))
}

#[async_trait]
impl ResourceAdapter for RegistryAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Registry
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let output = ignore_not_found(
            self.client
                .describe_repositories()
                .repository_names(descriptor.name())
                .send()
                .await
                .classify(),
        )?;

        let Some(output) = output else {
            return Ok(ResourceState::Absent);
        };
        match output
            .repositories()
            .iter()
            .find(|r| r.repository_name() == Some(descriptor.name()))
        {
            Some(repo) => Ok(ResourceState::Present(registry_handle(repo)?)),
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
            .create_repository()
            .repository_name(descriptor.name())
            .send()
            .await
            .classify()?;

        let repo = output
            .repository()
            .ok_or_else(|| ProviderError::malformed("CreateRepository returned no repository"))?;
        let handle = registry_handle(repo)?;
        info!(repository = %descriptor.name(), uri = ?handle.attribute(attr::URI), "ECR repository created");
        Ok(handle)
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        _handle: &Handle,
    ) -> Result<(), ProviderError> {
        let force = match &descriptor.params {
            ResourceParams::Registry(p) => p.force_delete,
            _ => false,
        };
        self.client
            .delete_repository()
            .repository_name(descriptor.name())
            .force(force)
            .send()
            .await
            .classify()?;
        Ok(())
    }
}

/// A tagged image in an ECR repository, built and pushed with docker
pub struct ImageAdapter {
    client: Client,
    region: String,
    docker: DockerCli,
}

impl ImageAdapter {
    pub fn new(ctx: &AwsContext, docker: DockerCli) -> Self {
        Self {
            client: ctx.ecr_client(),
            region: ctx.region().to_string(),
            docker,
        }
    }

    fn params(descriptor: &ResourceDescriptor) -> Result<&ImageParams, ProviderError> {
        match &descriptor.params {
            ResourceParams::Image(p) => Ok(p),
            other => Err(ProviderError::malformed(format!(
                "image adapter given {} parameters",
                other.kind()
            ))),
        }
    }

    fn tag_id(tag: &str) -> ImageIdentifier {
        ImageIdentifier::builder().image_tag(tag).build()
    }

    /// Registry host and `(username, password)` for docker login
    async fn registry_login(&self) -> Result<(String, String, String), ProviderError> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .classify()?;
        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| ProviderError::malformed("no ECR authorization data"))?;
        let token = data
            .authorization_token()
            .ok_or_else(|| ProviderError::malformed("no ECR authorization token"))?;
        let endpoint = data
            .proxy_endpoint()
            .ok_or_else(|| ProviderError::malformed("no ECR proxy endpoint"))?;

        let (username, password) = decode_auth_token(token)?;
        Ok((registry_host(endpoint).to_string(), username, password))
    }
}

/// Split a base64 `user:password` ECR token
fn decode_auth_token(token: &str) -> Result<(String, String), ProviderError> {
    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|e| ProviderError::malformed(format!("ECR token is not base64: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ProviderError::malformed("ECR token is not UTF-8"))?;
    match decoded.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok((user.to_string(), password.to_string())),
        _ => Err(ProviderError::malformed("ECR token is not user:password")),
    }
}

fn registry_host(endpoint: &str) -> &str {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

fn command_error(e: CommandError) -> ProviderError {
    ProviderError::Command {
        command: e.command().to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ResourceAdapter for ImageAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        let params = Self::params(descriptor)?;
        let tag = descriptor.name();

        let output = ignore_not_found(
            self.client
                .describe_images()
                .repository_name(&params.repository)
                .image_ids(Self::tag_id(tag))
                .send()
                .await
                .classify(),
        )?;
        let Some(output) = output else {
            return Ok(ResourceState::Absent);
        };

        let detail = output
            .image_details()
            .iter()
            .find(|d| d.image_tags().iter().any(|t| t == tag));
        let Some(detail) = detail else {
            return Ok(ResourceState::Absent);
        };

        let registry_id = detail
            .registry_id()
            .ok_or_else(|| ProviderError::malformed("image without registry id"))?;
        let reference = format!(
            "{registry_id}.dkr.ecr.{}.amazonaws.com/{}:{tag}",
            self.region, params.repository
        );
        let mut handle = Handle::new(&reference).with_attribute(attr::URI, &reference);
        if let Some(digest) = detail.image_digest() {
            handle = handle.with_attribute("digest", digest);
        }
        debug!(image = %reference, "Image found");
        Ok(ResourceState::Present(handle))
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        let params = Self::params(descriptor)?;
        let tag = descriptor.name();
        let repo_uri = deps.attribute(ResourceKind::Registry, &params.repository, attr::URI)?;
        let remote = format!("{repo_uri}:{tag}");
        let local = format!("{}:{tag}", params.repository);

        let (registry, username, password) = self.registry_login().await?;
        self.docker
            .login(&registry, &username, &password)
            .await
            .map_err(command_error)?;
        self.docker
            .build(
                &params.context,
                params.dockerfile.as_deref(),
                &params.platform,
                &local,
            )
            .await
            .map_err(command_error)?;
        self.docker.tag(&local, &remote).await.map_err(command_error)?;
        self.docker.push(&remote).await.map_err(command_error)?;

        info!(image = %remote, "Image pushed");
        Ok(Handle::new(&remote).with_attribute(attr::URI, &remote))
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        _handle: &Handle,
    ) -> Result<(), ProviderError> {
        let params = Self::params(descriptor)?;
        let output = self
            .client
            .batch_delete_image()
            .repository_name(&params.repository)
            .image_ids(Self::tag_id(descriptor.name()))
            .send()
            .await
            .classify()?;

        if let Some(failure) = output.failures().first() {
            let reason = failure.failure_reason().unwrap_or("unknown reason").to_string();
            if failure.failure_code() == Some(&ImageFailureCode::ImageNotFound) {
                return Err(ProviderError::not_found(reason));
            }
            warn!(image = %descriptor.name(), reason = %reason, "Image delete failed");
            return Err(ProviderError::Sdk {
                code: failure.failure_code().map(|c| c.as_str().to_string()),
                message: reason,
            });
        }
        Ok(())
    }
}
