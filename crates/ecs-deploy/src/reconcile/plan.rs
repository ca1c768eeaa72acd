//! Dependency-ordered execution plan

use super::descriptor::{ResourceDescriptor, ResourceId};
use super::error::ConfigurationError;
use std::collections::{BTreeSet, HashMap};

/// Descriptors in an order consistent with their dependencies
///
/// Apply walks the plan front to back, destroy back to front.
#[derive(Debug, Clone)]
pub struct Plan {
    ordered: Vec<ResourceDescriptor>,
    /// For each id, the ids that depend on it
    dependents: HashMap<ResourceId, Vec<ResourceId>>,
}

impl Plan {
    /// Topologically sort `descriptors`. Among descriptors that are ready at
    /// the same time, the one declared first goes first.
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self, ConfigurationError> {
        let mut index: HashMap<ResourceId, usize> = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            if index.insert(d.id.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateDescriptor(d.id.clone()));
            }
        }

        let mut pending = vec![0usize; descriptors.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
        for (i, d) in descriptors.iter().enumerate() {
            for dep in &d.depends_on {
                let &j = index
                    .get(dep)
                    .ok_or_else(|| ConfigurationError::UnknownDependency {
                        dependent: d.id.clone(),
                        dependency: dep.clone(),
                    })?;
                pending[i] += 1;
                downstream[j].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..descriptors.len())
            .filter(|&i| pending[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(descriptors.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &k in &downstream[i] {
                pending[k] -= 1;
                if pending[k] == 0 {
                    ready.insert(k);
                }
            }
        }

        if order.len() < descriptors.len() {
            return Err(ConfigurationError::CyclicDependency {
                cycle: find_cycle(&descriptors, &index, &pending),
            });
        }

        let mut dependents: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
        for d in &descriptors {
            for dep in &d.depends_on {
                dependents.entry(dep.clone()).or_default().push(d.id.clone());
            }
        }

        let mut slots: Vec<Option<ResourceDescriptor>> = descriptors.into_iter().map(Some).collect();
        let ordered = order.into_iter().filter_map(|i| slots[i].take()).collect();

        Ok(Self {
            ordered,
            dependents,
        })
    }

    /// Descriptors in apply order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ResourceDescriptor> {
        self.ordered.iter()
    }

    /// Descriptors that declare a dependency on `id`
    pub fn dependents_of(&self, id: &ResourceId) -> &[ResourceId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Every descriptor left with unmet dependencies after the sort has at least
/// one unmet dependency that is itself left over, so following those edges
/// from any leftover descriptor must revisit one.
fn find_cycle(
    descriptors: &[ResourceDescriptor],
    index: &HashMap<ResourceId, usize>,
    pending: &[usize],
) -> Vec<ResourceId> {
    let Some(start) = (0..descriptors.len()).find(|&i| pending[i] > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            let mut cycle: Vec<ResourceId> = path[pos..]
                .iter()
                .map(|&i| descriptors[i].id.clone())
                .collect();
            // Edges were followed dependent -> dependency; report creation order
            cycle.reverse();
            return cycle;
        }
        path.push(current);

        let next = descriptors[current]
            .depends_on
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .find(|&j| pending[j] > 0);
        match next {
            Some(j) => current = j,
            None => return path.iter().map(|&i| descriptors[i].id.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_deploy_common::ResourceKind;

    fn names(plan: &Plan) -> Vec<String> {
        plan.iter().map(|d| d.id.to_string()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let service = ResourceDescriptor::bare(ResourceKind::Service, "s1");
        let cluster = ResourceDescriptor::bare(ResourceKind::Cluster, "c1");
        let service = service.depends_on(&cluster);

        let plan = Plan::build(vec![service, cluster]).unwrap();
        assert_eq!(names(&plan), vec!["cluster/c1", "service/s1"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let plan = Plan::build(vec![
            ResourceDescriptor::bare(ResourceKind::LoadBalancer, "lb"),
            ResourceDescriptor::bare(ResourceKind::Registry, "repo"),
            ResourceDescriptor::bare(ResourceKind::Cluster, "c1"),
        ])
        .unwrap();
        assert_eq!(
            names(&plan),
            vec!["load-balancer/lb", "registry/repo", "cluster/c1"]
        );
    }

    #[test]
    fn test_ready_descriptor_declared_earlier_wins() {
        // b is declared before c, but only becomes ready after a
        let a = ResourceDescriptor::bare(ResourceKind::Registry, "a");
        let b = ResourceDescriptor::bare(ResourceKind::Image, "b").depends_on(&a);
        let c = ResourceDescriptor::bare(ResourceKind::Cluster, "c");

        let plan = Plan::build(vec![b, a, c]).unwrap();
        assert_eq!(names(&plan), vec!["registry/a", "image/b", "cluster/c"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = ResourceDescriptor::bare(ResourceKind::Cluster, "a");
        let b = ResourceDescriptor::bare(ResourceKind::Service, "b").depends_on(&a);
        let a = a.depends_on(&b);

        let err = Plan::build(vec![a.clone(), b.clone()]).unwrap_err();
        match err {
            ConfigurationError::CyclicDependency { cycle } => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&a.id));
                assert!(cycle.contains(&b.id));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let a = ResourceDescriptor::bare(ResourceKind::Cluster, "a");
        let a = a.clone().depends_on(&a);
        let err = Plan::build(vec![a]).unwrap_err();
        assert!(matches!(err, ConfigurationError::CyclicDependency { .. }));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let ghost = ResourceDescriptor::bare(ResourceKind::Cluster, "ghost");
        let service = ResourceDescriptor::bare(ResourceKind::Service, "s1").depends_on(&ghost);

        let err = Plan::build(vec![service.clone()]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                dependent: service.id,
                dependency: ghost.id,
            }
        );
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let err = Plan::build(vec![
            ResourceDescriptor::bare(ResourceKind::Cluster, "c1"),
            ResourceDescriptor::bare(ResourceKind::Cluster, "c1"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateDescriptor(_)));
    }

    #[test]
    fn test_dependents_of() {
        let cluster = ResourceDescriptor::bare(ResourceKind::Cluster, "c1");
        let service = ResourceDescriptor::bare(ResourceKind::Service, "s1").depends_on(&cluster);
        let plan = Plan::build(vec![cluster.clone(), service.clone()]).unwrap();

        assert_eq!(plan.dependents_of(&cluster.id), &[service.id.clone()]);
        assert!(plan.dependents_of(&service.id).is_empty());
    }
}
