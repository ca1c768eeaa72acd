//! In-memory control plane for exercising the reconciler without AWS
//!
//! Every resource kind gets a [`FakeAdapter`] backed by one shared
//! [`FakeControlPlane`]. The fake records every call, never deduplicates on
//! create (so a reconciler that creates twice leaves two live resources) and
//! models workloads that drain one unit per status check.

use async_trait::async_trait;
use ecs_deploy::reconcile::descriptor::attr;
use ecs_deploy::reconcile::{
    AdapterSet, Dependencies, Handle, ProviderError, ResourceAdapter, ResourceDescriptor,
    ResourceId, ResourceParams, ResourceState,
};
use ecs_deploy_common::ResourceKind;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    Create,
    Delete,
    ActiveCount,
    Scale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub id: ResourceId,
}

#[derive(Debug, Clone)]
struct FakeResource {
    id: ResourceId,
    handle: Handle,
    desired: u32,
    running: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    live: Vec<FakeResource>,
    calls: Vec<Call>,
    next_serial: u64,
    injected: HashMap<(ResourceId, Operation), VecDeque<ProviderError>>,
    stuck: HashSet<ResourceId>,
}

/// Shared state behind all fake adapters
#[derive(Debug, Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<FakeState>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// One adapter per resource kind
    pub fn adapters(&self) -> AdapterSet {
        let mut set = AdapterSet::new();
        for kind in ResourceKind::ALL {
            set.register(FakeAdapter {
                kind,
                plane: self.clone(),
            });
        }
        set
    }

    /// Pretend `id` already exists with `running` workload units
    pub fn seed(&self, id: ResourceId, running: u32) -> Handle {
        let mut state = self.state.lock().unwrap();
        let handle = Self::mint_handle(&mut state, &id);
        state.live.push(FakeResource {
            id,
            handle: handle.clone(),
            desired: running,
            running,
        });
        handle
    }

    /// Make the next `operation` on `id` fail with `error`
    pub fn fail_next(&self, id: ResourceId, operation: Operation, error: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .injected
            .entry((id, operation))
            .or_default()
            .push_back(error);
    }

    /// Keep `id`'s workload running no matter what it is scaled to
    pub fn set_stuck(&self, id: ResourceId) {
        self.state.lock().unwrap().stuck.insert(id);
    }

    /// Number of live resources with this identity
    pub fn live_count(&self, id: &ResourceId) -> usize {
        self.state
            .lock()
            .unwrap()
            .live
            .iter()
            .filter(|r| &r.id == id)
            .count()
    }

    pub fn is_live(&self, id: &ResourceId) -> bool {
        self.live_count(id) > 0
    }

    pub fn total_live(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Ids of every call of one operation, in call order
    pub fn calls_of(&self, operation: Operation) -> Vec<ResourceId> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.id)
            .collect()
    }

    pub fn running(&self, id: &ResourceId) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .live
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.running)
    }

    fn mint_handle(state: &mut FakeState, id: &ResourceId) -> Handle {
        state.next_serial += 1;
        let handle = Handle::new(format!("fake:{}:{}:{}", id.kind, id.name, state.next_serial));
        match id.kind {
            ResourceKind::Registry => {
                handle.with_attribute(attr::URI, format!("fake.registry/{}", id.name))
            }
            ResourceKind::LoadBalancer => {
                handle.with_attribute(attr::DNS_NAME, format!("{}.lb.fake", id.name))
            }
            _ => handle,
        }
    }

    /// Record a call and pop an injected failure for it, if any
    fn enter(&self, operation: Operation, id: &ResourceId) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            operation,
            id: id.clone(),
        });
        match state
            .injected
            .get_mut(&(id.clone(), operation))
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn id_for_handle(&self, handle: &Handle) -> Option<ResourceId> {
        self.state
            .lock()
            .unwrap()
            .live
            .iter()
            .find(|r| r.handle.id == handle.id)
            .map(|r| r.id.clone())
    }
}

/// Adapter for one kind over a [`FakeControlPlane`]
pub struct FakeAdapter {
    kind: ResourceKind,
    plane: FakeControlPlane,
}

#[async_trait]
impl ResourceAdapter for FakeAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn find(&self, descriptor: &ResourceDescriptor) -> Result<ResourceState, ProviderError> {
        self.plane.enter(Operation::Find, &descriptor.id)?;
        let state = self.plane.state.lock().unwrap();
        Ok(state
            .live
            .iter()
            .find(|r| r.id == descriptor.id)
            .map(|r| ResourceState::Present(r.handle.clone()))
            .unwrap_or(ResourceState::Absent))
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &Dependencies,
    ) -> Result<Handle, ProviderError> {
        self.plane.enter(Operation::Create, &descriptor.id)?;
        for dep in descriptor.params.references() {
            deps.get(dep.kind, &dep.name)?;
        }

        let desired = match &descriptor.params {
            ResourceParams::Service(p) => p.desired_count,
            _ => 0,
        };
        let mut state = self.plane.state.lock().unwrap();
        let handle = FakeControlPlane::mint_handle(&mut state, &descriptor.id);
        state.live.push(FakeResource {
            id: descriptor.id.clone(),
            handle: handle.clone(),
            desired,
            running: desired,
        });
        Ok(handle)
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        handle: &Handle,
    ) -> Result<(), ProviderError> {
        self.plane.enter(Operation::Delete, &descriptor.id)?;
        let mut state = self.plane.state.lock().unwrap();
        let before = state.live.len();
        state.live.retain(|r| r.handle.id != handle.id);
        if state.live.len() == before {
            return Err(ProviderError::not_found(descriptor.id.to_string()));
        }
        Ok(())
    }

    async fn active_count(&self, handle: &Handle) -> Result<Option<u32>, ProviderError> {
        if !self.kind.has_workload() {
            return Ok(None);
        }
        let id = self
            .plane
            .id_for_handle(handle)
            .ok_or_else(|| ProviderError::not_found(handle.id.clone()))?;
        self.plane.enter(Operation::ActiveCount, &id)?;

        let mut state = self.plane.state.lock().unwrap();
        let stuck = state.stuck.contains(&id);
        let resource = state
            .live
            .iter_mut()
            .find(|r| r.handle.id == handle.id)
            .ok_or_else(|| ProviderError::not_found(handle.id.clone()))?;
        let observed = resource.running;
        if !stuck && resource.running > resource.desired {
            resource.running -= 1;
        }
        Ok(Some(observed))
    }

    async fn scale(&self, handle: &Handle, desired: u32) -> Result<(), ProviderError> {
        let id = self
            .plane
            .id_for_handle(handle)
            .ok_or_else(|| ProviderError::not_found(handle.id.clone()))?;
        self.plane.enter(Operation::Scale, &id)?;

        let mut state = self.plane.state.lock().unwrap();
        if let Some(resource) = state.live.iter_mut().find(|r| r.handle.id == handle.id) {
            resource.desired = desired;
        }
        Ok(())
    }
}
