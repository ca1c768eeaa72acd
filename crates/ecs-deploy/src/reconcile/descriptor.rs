//! Declarative resource descriptors and provider handles

use ecs_deploy_common::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Identity of a managed resource: `(kind, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Provider-assigned identifier plus the derived attributes dependents need
/// (a registry's URI, a load balancer's DNS name, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Handle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Handle attribute keys shared between adapters
pub mod attr {
    /// Registry URI (`<account>.dkr.ecr.<region>.amazonaws.com/<repo>`)
    pub const URI: &str = "uri";
    /// Load balancer DNS name
    pub const DNS_NAME: &str = "dns_name";
    /// Cluster a service runs in
    pub const CLUSTER: &str = "cluster";
    /// Public URL of a deployed gateway stage
    pub const INVOKE_URL: &str = "invoke_url";
}

/// Remote state of a resource as observed by `find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Absent,
    Present(Handle),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryParams {
    /// Delete the repository even if it still contains images
    pub force_delete: bool,
}

/// A container image; the descriptor name is the image tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageParams {
    /// Name of the registry descriptor the image is pushed to
    pub repository: String,
    /// Local build context directory
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterParams {}

/// A Fargate task definition; the descriptor name is the family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDefinitionParams {
    /// Name (tag) of the image descriptor the container runs
    pub image: String,
    pub container_name: String,
    pub container_port: u16,
    pub cpu: String,
    pub memory: String,
    pub execution_role_arn: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceParams {
    pub cluster: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
    /// Target group to register tasks with, plus the listener that must
    /// exist before ECS accepts the attachment
    pub target_group: Option<String>,
    pub listener: Option<String>,
    pub container_name: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerParams {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetGroupParams {
    pub port: u16,
    pub vpc_id: String,
    pub health_check_path: String,
}

/// A listener has no name of its own at the provider; it is identified by
/// its load balancer and port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerParams {
    pub load_balancer: String,
    pub target_group: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayParams {
    /// Load balancer whose DNS name the integration proxies to
    pub load_balancer: String,
    pub path: String,
    pub stage_name: String,
}

/// Typed creation parameters, one variant per resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceParams {
    Registry(RegistryParams),
    Image(ImageParams),
    Cluster(ClusterParams),
    TaskDefinition(TaskDefinitionParams),
    Service(ServiceParams),
    LoadBalancer(LoadBalancerParams),
    TargetGroup(TargetGroupParams),
    Listener(ListenerParams),
    Gateway(GatewayParams),
}

impl ResourceParams {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceParams::Registry(_) => ResourceKind::Registry,
            ResourceParams::Image(_) => ResourceKind::Image,
            ResourceParams::Cluster(_) => ResourceKind::Cluster,
            ResourceParams::TaskDefinition(_) => ResourceKind::TaskDefinition,
            ResourceParams::Service(_) => ResourceKind::Service,
            ResourceParams::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceParams::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceParams::Listener(_) => ResourceKind::Listener,
            ResourceParams::Gateway(_) => ResourceKind::Gateway,
        }
    }

    /// Empty parameters for a kind
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Registry => ResourceParams::Registry(Default::default()),
            ResourceKind::Image => ResourceParams::Image(Default::default()),
            ResourceKind::Cluster => ResourceParams::Cluster(Default::default()),
            ResourceKind::TaskDefinition => ResourceParams::TaskDefinition(Default::default()),
            ResourceKind::Service => ResourceParams::Service(Default::default()),
            ResourceKind::LoadBalancer => ResourceParams::LoadBalancer(Default::default()),
            ResourceKind::TargetGroup => ResourceParams::TargetGroup(Default::default()),
            ResourceKind::Listener => ResourceParams::Listener(Default::default()),
            ResourceKind::Gateway => ResourceParams::Gateway(Default::default()),
        }
    }

    /// Other resources these parameters name. Empty names are not references.
    pub fn references(&self) -> Vec<ResourceId> {
        let refs: Vec<(ResourceKind, &str)> = match self {
            ResourceParams::Registry(_) | ResourceParams::Cluster(_) => vec![],
            ResourceParams::LoadBalancer(_) | ResourceParams::TargetGroup(_) => vec![],
            ResourceParams::Image(p) => vec![(ResourceKind::Registry, p.repository.as_str())],
            ResourceParams::TaskDefinition(p) => vec![(ResourceKind::Image, p.image.as_str())],
            ResourceParams::Service(p) => {
                let mut refs = vec![
                    (ResourceKind::Cluster, p.cluster.as_str()),
                    (ResourceKind::TaskDefinition, p.task_definition.as_str()),
                ];
                if let Some(tg) = &p.target_group {
                    refs.push((ResourceKind::TargetGroup, tg.as_str()));
                }
                if let Some(listener) = &p.listener {
                    refs.push((ResourceKind::Listener, listener.as_str()));
                }
                refs
            }
            ResourceParams::Listener(p) => vec![
                (ResourceKind::LoadBalancer, p.load_balancer.as_str()),
                (ResourceKind::TargetGroup, p.target_group.as_str()),
            ],
            ResourceParams::Gateway(p) => {
                vec![(ResourceKind::LoadBalancer, p.load_balancer.as_str())]
            }
        };

        refs.into_iter()
            .filter(|(_, name)| !name.is_empty())
            .map(|(kind, name)| ResourceId::new(kind, name))
            .collect()
    }
}

/// Static declaration of one resource to reconcile
///
/// Dependencies named by the parameters are recorded automatically;
/// [`ResourceDescriptor::depends_on`] adds ordering-only edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub params: ResourceParams,
    pub depends_on: Vec<ResourceId>,
    /// Whether a failure of this resource fails a best-effort run
    pub required: bool,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, params: ResourceParams) -> Self {
        let id = ResourceId::new(params.kind(), name);
        let mut descriptor = Self {
            id,
            depends_on: Vec::new(),
            params,
            required: true,
        };
        for dep in descriptor.params.references() {
            descriptor.add_dependency(dep);
        }
        descriptor
    }

    /// A descriptor with empty parameters, for resources whose creation
    /// needs nothing beyond a name
    pub fn bare(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(name, ResourceParams::empty(kind))
    }

    pub fn depends_on(mut self, other: &ResourceDescriptor) -> Self {
        self.add_dependency(other.id.clone());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    fn add_dependency(&mut self, dep: ResourceId) {
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_kind_and_name() {
        let a = ResourceDescriptor::bare(ResourceKind::Cluster, "c1");
        let b = ResourceDescriptor::bare(ResourceKind::Registry, "c1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.to_string(), "cluster/c1");
    }

    #[test]
    fn test_params_references_become_dependencies() {
        let listener = ResourceDescriptor::new(
            "http",
            ResourceParams::Listener(ListenerParams {
                load_balancer: "lb".into(),
                target_group: "tg".into(),
                port: 80,
            }),
        );
        assert_eq!(
            listener.depends_on,
            vec![
                ResourceId::new(ResourceKind::LoadBalancer, "lb"),
                ResourceId::new(ResourceKind::TargetGroup, "tg"),
            ]
        );
    }

    #[test]
    fn test_explicit_dependencies_are_deduplicated() {
        let registry = ResourceDescriptor::bare(ResourceKind::Registry, "r1");
        let image = ResourceDescriptor::new(
            "latest",
            ResourceParams::Image(ImageParams {
                repository: "r1".into(),
                ..Default::default()
            }),
        )
        .depends_on(&registry);
        assert_eq!(image.depends_on, vec![registry.id.clone()]);
    }

    #[test]
    fn test_empty_references_are_ignored() {
        let service = ResourceDescriptor::bare(ResourceKind::Service, "s1");
        assert!(service.depends_on.is_empty());
        assert!(service.required);
    }

    #[test]
    fn test_handle_attributes() {
        let handle = Handle::new("arn:lb").with_attribute(attr::DNS_NAME, "lb.example.com");
        assert_eq!(handle.attribute(attr::DNS_NAME), Some("lb.example.com"));
        assert_eq!(handle.attribute(attr::URI), None);
    }
}
