//! Kinds of AWS resources managed by ecs-deploy
//!
//! Each kind has exactly one provider adapter. Ordering between kinds is not
//! fixed here; it comes from the dependency edges of the deployment plan.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Types of AWS resources managed by ecs-deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// ECR repository
    Registry,
    /// Container image pushed to a registry
    Image,
    /// ECS cluster
    Cluster,
    /// ECS task definition family
    TaskDefinition,
    /// ECS service (must drain before it can be deleted)
    Service,
    /// Application load balancer
    LoadBalancer,
    /// ELBv2 target group
    TargetGroup,
    /// ELBv2 listener
    Listener,
    /// API Gateway REST API
    Gateway,
}

impl ResourceKind {
    /// Every kind, in the order the stack is usually declared
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Registry,
        ResourceKind::Image,
        ResourceKind::Cluster,
        ResourceKind::TaskDefinition,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::Service,
        ResourceKind::Gateway,
    ];

    /// Stable identifier used in logs, reports and configuration
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Registry => "registry",
            ResourceKind::Image => "image",
            ResourceKind::Cluster => "cluster",
            ResourceKind::TaskDefinition => "task-definition",
            ResourceKind::Service => "service",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::Listener => "listener",
            ResourceKind::Gateway => "gateway",
        }
    }

    /// Whether this kind runs a workload that has to be drained to zero
    /// before the resource itself can be deleted
    pub fn has_workload(self) -> bool {
        matches!(self, ResourceKind::Service)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResourceKindError(pub String);

impl fmt::Display for ParseResourceKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown resource kind: {}", self.0)
    }
}

impl std::error::Error for ParseResourceKindError {}

impl FromStr for ResourceKind {
    type Err = ParseResourceKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseResourceKindError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "bucket".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown resource kind: bucket");
    }

    #[test]
    fn test_only_services_drain() {
        let draining: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| k.has_workload())
            .collect();
        assert_eq!(draining, vec![ResourceKind::Service]);
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&ResourceKind::TaskDefinition).unwrap();
        assert_eq!(json, "\"task-definition\"");
    }
}
