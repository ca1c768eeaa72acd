//! Provider adapter interface
//!
//! One adapter per [`ResourceKind`]. Adapters talk to the control plane and
//! translate its responses; they never retry, wait or decide policy. That
//! is the reconciler's job.

use super::descriptor::{Handle, ResourceDescriptor, ResourceId, ResourceState};
use super::error::{ConfigurationError, ProviderError};
use async_trait::async_trait;
use ecs_deploy_common::ResourceKind;
use std::collections::{BTreeMap, HashMap};

/// Find/create/delete operations for one resource kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Look the resource up by exact name. Zero matches is `Absent`; if the
    /// provider returns several, the first exact match wins.
    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError>;

    /// Create the resource. Only called after `find` returned `Absent`.
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError>;

    /// Delete the resource. A resource that is already gone is reported as
    /// [`ProviderError::NotFound`].
    async fn delete(&self, descriptor: &ResourceDescriptor, handle: &Handle)
    -> Result<(), ProviderError>;

    /// Number of running workload units, or `None` for kinds with nothing
    /// to drain
    async fn active_count(&self, _handle: &Handle) -> Result<Option<u32>, ProviderError> {
        Ok(None)
    }

    /// Set the desired workload count
    async fn scale(&self, _handle: &Handle, _desired: u32) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Handles of a descriptor's dependencies, resolved from earlier outcomes
/// of the same run
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    handles: BTreeMap<ResourceId, Handle>,
}

impl Dependencies {
    /// Collect the handles `descriptor` depends on
    pub fn resolve(
        descriptor: &ResourceDescriptor,
        available: &HashMap<ResourceId, Handle>,
    ) -> Result<Self, ConfigurationError> {
        let mut handles = BTreeMap::new();
        for dep in &descriptor.depends_on {
            let handle =
                available
                    .get(dep)
                    .ok_or_else(|| ConfigurationError::MissingDependency {
                        dependent: descriptor.id.clone(),
                        dependency: dep.clone(),
                    })?;
            handles.insert(dep.clone(), handle.clone());
        }
        Ok(Self { handles })
    }

    pub fn insert(&mut self, id: ResourceId, handle: Handle) {
        self.handles.insert(id, handle);
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Result<&Handle, ProviderError> {
        let id = ResourceId::new(kind, name);
        self.handles
            .get(&id)
            .ok_or(ProviderError::MissingDependency(id))
    }

    /// A string attribute of a dependency's handle
    pub fn attribute(
        &self,
        kind: ResourceKind,
        name: &str,
        key: &str,
    ) -> Result<&str, ProviderError> {
        let handle = self.get(kind, name)?;
        handle.attribute(key).ok_or_else(|| {
            ProviderError::malformed(format!("{kind}/{name} handle has no `{key}` attribute"))
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// The adapters available to a run, keyed by kind
#[derive(Default)]
pub struct AdapterSet {
    adapters: HashMap<ResourceKind, Box<dyn ResourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its kind
    pub fn register(&mut self, adapter: impl ResourceAdapter + 'static) -> &mut Self {
        self.adapters.insert(adapter.kind(), Box::new(adapter));
        self
    }

    pub fn with(mut self, adapter: impl ResourceAdapter + 'static) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&dyn ResourceAdapter, ConfigurationError> {
        self.adapters
            .get(&kind)
            .map(|a| a.as_ref())
            .ok_or(ConfigurationError::MissingAdapter(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_collects_dependency_handles() {
        let image = ResourceDescriptor::bare(ResourceKind::Image, "latest");
        let taskdef = ResourceDescriptor::bare(ResourceKind::TaskDefinition, "web").depends_on(&image);

        let mut available = HashMap::new();
        available.insert(
            image.id.clone(),
            Handle::new("repo:latest").with_attribute("uri", "repo:latest"),
        );

        let deps = Dependencies::resolve(&taskdef, &available).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(
            deps.attribute(ResourceKind::Image, "latest", "uri").unwrap(),
            "repo:latest"
        );
    }

    #[test]
    fn test_resolve_reports_missing_handle() {
        let image = ResourceDescriptor::bare(ResourceKind::Image, "latest");
        let taskdef = ResourceDescriptor::bare(ResourceKind::TaskDefinition, "web").depends_on(&image);

        let err = Dependencies::resolve(&taskdef, &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingDependency {
                dependent: taskdef.id.clone(),
                dependency: image.id.clone(),
            }
        );
    }

    #[test]
    fn test_missing_attribute_is_malformed() {
        let mut deps = Dependencies::default();
        deps.insert(
            ResourceId::new(ResourceKind::LoadBalancer, "lb"),
            Handle::new("arn:lb"),
        );
        let err = deps
            .attribute(ResourceKind::LoadBalancer, "lb", "dns_name")
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn test_adapter_set_lookup() {
        let mut mock = MockResourceAdapter::new();
        mock.expect_kind().return_const(ResourceKind::Cluster);

        let set = AdapterSet::new().with(mock);
        assert!(set.get(ResourceKind::Cluster).is_ok());
        assert!(matches!(
            set.get(ResourceKind::Gateway),
            Err(ConfigurationError::MissingAdapter(ResourceKind::Gateway))
        ));
    }
}
