//! Walks a plan through the provider adapters
//!
//! Apply is find-or-create in plan order; destroy is find-drain-delete in
//! reverse plan order. Every `find` goes to the provider; nothing observed
//! about one descriptor is reused for another.

use super::adapter::{AdapterSet, Dependencies, ResourceAdapter};
use super::descriptor::{Handle, ResourceDescriptor, ResourceId, ResourceState};
use super::error::{ConfigurationError, ProviderError};
use super::plan::Plan;
use super::report::{Action, ExecutionReport, FailureReason, OperationOutcome};
use crate::wait::{WaitConfig, WaitError, wait_for_resource};
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    Destroy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Apply => f.write_str("apply"),
            Mode::Destroy => f.write_str("destroy"),
        }
    }
}

/// What to do after a descriptor fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failure
    #[default]
    Abort,
    /// Keep going with descriptors that do not depend on the failure
    BestEffort,
}

/// Bounded exponential backoff for transient provider errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: ecs_deploy_common::defaults::DEFAULT_MAX_RETRIES,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    pub policy: FailurePolicy,
    pub retry: RetryConfig,
    pub drain: WaitConfig,
}

pub struct Reconciler {
    adapters: AdapterSet,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(adapters: AdapterSet, config: ReconcilerConfig) -> Self {
        Self {
            adapters,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to cancel the run (Ctrl-C in the CLI)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn apply(&self, plan: &Plan) -> Result<ExecutionReport, ConfigurationError> {
        self.run(Mode::Apply, plan).await
    }

    pub async fn destroy(&self, plan: &Plan) -> Result<ExecutionReport, ConfigurationError> {
        self.run(Mode::Destroy, plan).await
    }

    /// Execute `plan`. An `Err` means nothing was sent to the provider.
    pub async fn run(&self, mode: Mode, plan: &Plan) -> Result<ExecutionReport, ConfigurationError> {
        for descriptor in plan.iter() {
            self.adapters.get(descriptor.kind())?;
        }

        let order: Vec<&ResourceDescriptor> = match mode {
            Mode::Apply => plan.iter().collect(),
            Mode::Destroy => plan.iter().rev().collect(),
        };

        info!(
            %mode,
            policy = ?self.config.policy,
            resources = order.len(),
            "Starting reconciliation"
        );

        let mut report = ExecutionReport::new(mode, self.config.policy);
        let mut handles: HashMap<ResourceId, Handle> = HashMap::new();
        let mut failed: HashSet<ResourceId> = HashSet::new();

        for (position, descriptor) in order.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, stopping");
                report.abort(order[position..].iter().map(|d| d.id.clone()));
                break;
            }

            let started = Instant::now();
            let adapter = self.adapters.get(descriptor.kind())?;

            let blocked_by = match mode {
                Mode::Apply => descriptor.depends_on.iter().find(|dep| failed.contains(*dep)),
                Mode::Destroy => plan
                    .dependents_of(&descriptor.id)
                    .iter()
                    .find(|dep| failed.contains(*dep)),
            };

            let (action, handle) = match blocked_by {
                Some(dep) => (Action::Failed(FailureReason::DependencyFailed(dep.clone())), None),
                None => match mode {
                    Mode::Apply => self.apply_one(adapter, descriptor, &handles).await,
                    Mode::Destroy => self.destroy_one(adapter, descriptor).await,
                },
            };

            let outcome = OperationOutcome {
                id: descriptor.id.clone(),
                action,
                handle,
                required: descriptor.required,
                elapsed: started.elapsed(),
            };
            let stop = self.log_outcome(&outcome);

            if outcome.action.is_failed() {
                failed.insert(outcome.id.clone());
            } else if let (Mode::Apply, Some(handle)) = (mode, &outcome.handle) {
                handles.insert(outcome.id.clone(), handle.clone());
            }
            report.record(outcome);

            if stop {
                report.abort(order[position + 1..].iter().map(|d| d.id.clone()));
                break;
            }
        }

        report.finish();
        info!(%mode, summary = %report.summary(), success = report.is_success(), "Reconciliation finished");
        Ok(report)
    }

    /// Log an outcome; returns whether the run has to stop
    fn log_outcome(&self, outcome: &OperationOutcome) -> bool {
        let id = &outcome.id;
        match &outcome.action {
            Action::Failed(reason) => {
                error!(kind = %id.kind, name = %id.name, error = %reason, "Failed");
                reason.always_aborts() || self.config.policy == FailurePolicy::Abort
            }
            action => {
                info!(
                    kind = %id.kind,
                    name = %id.name,
                    action = action.label(),
                    id = outcome.handle.as_ref().map(|h| h.id.as_str()).unwrap_or("-"),
                    "Done"
                );
                false
            }
        }
    }

    async fn apply_one(
        &self,
        adapter: &dyn ResourceAdapter,
        descriptor: &ResourceDescriptor,
        handles: &HashMap<ResourceId, Handle>,
    ) -> (Action, Option<Handle>) {
        match self.call(descriptor, "find", || adapter.find(descriptor)).await {
            Ok(ResourceState::Present(handle)) => return (Action::AlreadyExists, Some(handle)),
            Ok(ResourceState::Absent) => {}
            Err(e) => return (Action::Failed(FailureReason::Provider(e)), None),
        }

        let deps = match Dependencies::resolve(descriptor, handles) {
            Ok(deps) => deps,
            Err(e) => return (Action::Failed(FailureReason::Configuration(e)), None),
        };

        info!(kind = %descriptor.kind(), name = %descriptor.name(), "Creating");
        match self
            .call(descriptor, "create", || adapter.create(descriptor, &deps))
            .await
        {
            Ok(handle) => (Action::Created, Some(handle)),
            Err(e) if e.is_already_exists() => {
                // Lost a race with another writer; adopt what it created
                warn!(kind = %descriptor.kind(), name = %descriptor.name(), "Created concurrently, looking it up again");
                match self.call(descriptor, "find", || adapter.find(descriptor)).await {
                    Ok(ResourceState::Present(handle)) => (Action::AlreadyExists, Some(handle)),
                    Ok(ResourceState::Absent) => (Action::Failed(FailureReason::Provider(e)), None),
                    Err(find_err) => (Action::Failed(FailureReason::Provider(find_err)), None),
                }
            }
            Err(ProviderError::MissingDependency(dependency)) => (
                Action::Failed(FailureReason::Configuration(
                    ConfigurationError::MissingDependency {
                        dependent: descriptor.id.clone(),
                        dependency,
                    },
                )),
                None,
            ),
            Err(e) => (Action::Failed(FailureReason::Provider(e)), None),
        }
    }

    async fn destroy_one(
        &self,
        adapter: &dyn ResourceAdapter,
        descriptor: &ResourceDescriptor,
    ) -> (Action, Option<Handle>) {
        let handle = match self.call(descriptor, "find", || adapter.find(descriptor)).await {
            Ok(ResourceState::Present(handle)) => handle,
            Ok(ResourceState::Absent) => return (Action::NotFound, None),
            Err(e) => return (Action::Failed(FailureReason::Provider(e)), None),
        };

        if let Err(reason) = self.drain(adapter, descriptor, &handle, 0).await {
            return (Action::Failed(reason), Some(handle));
        }

        info!(kind = %descriptor.kind(), name = %descriptor.name(), id = %handle.id, "Deleting");
        match self
            .call(descriptor, "delete", || adapter.delete(descriptor, &handle))
            .await
        {
            Ok(()) => (Action::Deleted, Some(handle)),
            Err(e) if e.is_not_found() => (Action::NotFound, None),
            Err(e) => (Action::Failed(FailureReason::Provider(e)), Some(handle)),
        }
    }

    /// Scale the workload to `target` and wait until its active count is
    /// down to it. Kinds with no workload return immediately.
    async fn drain(
        &self,
        adapter: &dyn ResourceAdapter,
        descriptor: &ResourceDescriptor,
        handle: &Handle,
        target: u32,
    ) -> Result<(), FailureReason> {
        let active = self
            .call(descriptor, "active_count", || adapter.active_count(handle))
            .await
            .map_err(FailureReason::Provider)?;
        let Some(active) = active else {
            return Ok(());
        };

        info!(
            kind = %descriptor.kind(),
            name = %descriptor.name(),
            active,
            target,
            "Scaling down before delete"
        );
        self.call(descriptor, "scale", || adapter.scale(handle, target))
            .await
            .map_err(FailureReason::Provider)?;

        if active <= target {
            return Ok(());
        }

        let drain = self.config.drain.clone();
        let timeout = drain.timeout;
        let name = descriptor.id.to_string();
        let result = wait_for_resource(
            drain,
            Some(&self.cancel),
            || async {
                let remaining = self
                    .call(descriptor, "active_count", || adapter.active_count(handle))
                    .await?
                    .unwrap_or(0);
                info!(resource = %name, remaining, "Waiting for workload to drain");
                Ok(remaining <= target)
            },
            &name,
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(WaitError::Timeout { attempts, .. }) => {
                Err(FailureReason::DrainTimeout { timeout, attempts })
            }
            Err(WaitError::Cancelled { .. }) => Err(FailureReason::Cancelled),
            Err(WaitError::Check { source, .. }) => Err(FailureReason::Provider(source)),
        }
    }

    /// Run one adapter call, retrying transient errors
    async fn call<T, F, Fut>(
        &self,
        descriptor: &ResourceDescriptor,
        operation: &'static str,
        f: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        f.retry(self.config.retry.backoff())
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, delay: Duration| {
                warn!(
                    kind = %descriptor.kind(),
                    name = %descriptor.name(),
                    operation,
                    error = %err,
                    delay_ms = delay.as_millis(),
                    "Transient error, retrying"
                );
            })
            .await
    }
}
