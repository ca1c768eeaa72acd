//! Per-resource outcomes and the run summary

use super::descriptor::{Handle, ResourceId};
use super::error::{ConfigurationError, ProviderError};
use super::reconciler::{FailurePolicy, Mode};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::fmt;
use std::time::Duration;

/// Why a descriptor failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider rejected a call (after retries, for transient errors)
    Provider(ProviderError),
    /// The workload did not drain within the timeout; nothing was deleted
    DrainTimeout {
        timeout: Duration,
        attempts: u32,
    },
    /// The run was cancelled while this descriptor was in progress
    Cancelled,
    /// Skipped without calling the provider because a descriptor it is
    /// ordered against failed earlier in the run
    DependencyFailed(ResourceId),
    /// The plan itself is broken
    Configuration(ConfigurationError),
}

impl FailureReason {
    /// Failures that stop the run regardless of policy
    pub fn always_aborts(&self) -> bool {
        matches!(
            self,
            FailureReason::Cancelled | FailureReason::Configuration(_)
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Provider(e) => write!(f, "{e}"),
            FailureReason::DrainTimeout { timeout, attempts } => write!(
                f,
                "workload did not drain within {}s ({attempts} checks)",
                timeout.as_secs()
            ),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::DependencyFailed(id) => write!(f, "skipped: {id} failed"),
            FailureReason::Configuration(e) => write!(f, "{e}"),
        }
    }
}

/// What the reconciler did for one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Created,
    AlreadyExists,
    Deleted,
    NotFound,
    Failed(FailureReason),
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::AlreadyExists => "already exists",
            Action::Deleted => "deleted",
            Action::NotFound => "not found",
            Action::Failed(_) => "FAILED",
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Action::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub id: ResourceId,
    pub action: Action,
    pub handle: Option<Handle>,
    pub required: bool,
    pub elapsed: Duration,
}

impl OperationOutcome {
    /// Whether this outcome fails a best-effort run. A required descriptor
    /// skipped because of another failure is fatal too, even when the
    /// failure it inherits is from an optional one.
    pub fn is_fatal(&self) -> bool {
        self.required && self.action.is_failed()
    }
}

/// Count of outcomes per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub already_exists: usize,
    pub deleted: usize,
    pub not_found: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} already existed, {} deleted, {} not found, {} failed",
            self.created, self.already_exists, self.deleted, self.not_found, self.failed
        )?;
        if self.not_attempted > 0 {
            write!(f, ", {} not attempted", self.not_attempted)?;
        }
        Ok(())
    }
}

/// Outcomes of one apply or destroy run, in the order they were executed
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub mode: Mode,
    pub policy: FailurePolicy,
    outcomes: Vec<OperationOutcome>,
    not_attempted: Vec<ResourceId>,
    aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionReport {
    pub fn new(mode: Mode, policy: FailurePolicy) -> Self {
        Self {
            mode,
            policy,
            outcomes: Vec::new(),
            not_attempted: Vec::new(),
            aborted: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, outcome: OperationOutcome) {
        self.outcomes.push(outcome);
    }

    /// Stop the run; `remaining` are listed as not attempted
    pub fn abort(&mut self, remaining: impl IntoIterator<Item = ResourceId>) {
        self.aborted = true;
        self.not_attempted.extend(remaining);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn outcomes(&self) -> &[OperationOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, id: &ResourceId) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn actions(&self) -> Vec<&Action> {
        self.outcomes.iter().map(|o| &o.action).collect()
    }

    pub fn not_attempted(&self) -> &[ResourceId] {
        &self.not_attempted
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            not_attempted: self.not_attempted.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match outcome.action {
                Action::Created => summary.created += 1,
                Action::AlreadyExists => summary.already_exists += 1,
                Action::Deleted => summary.deleted += 1,
                Action::NotFound => summary.not_found += 1,
                Action::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        if self.aborted {
            return false;
        }
        match self.policy {
            FailurePolicy::Abort => !self.outcomes.iter().any(|o| o.action.is_failed()),
            FailurePolicy::BestEffort => !self.outcomes.iter().any(OperationOutcome::is_fatal),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Handle of a resource touched by this run
    pub fn handle(&self, id: &ResourceId) -> Option<&Handle> {
        self.outcome(id).and_then(|o| o.handle.as_ref())
    }

    /// One row per descriptor, then the not-attempted ones
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Kind", "Name", "Result", "Id / Detail", "Time"]);

        for outcome in &self.outcomes {
            let (result, color) = match &outcome.action {
                Action::Created | Action::Deleted => (outcome.action.label(), Color::Green),
                Action::AlreadyExists | Action::NotFound => (outcome.action.label(), Color::Reset),
                Action::Failed(_) if !outcome.required => ("failed (optional)", Color::Yellow),
                Action::Failed(_) => (outcome.action.label(), Color::Red),
            };
            let detail = match (&outcome.action, &outcome.handle) {
                (Action::Failed(reason), _) => reason.to_string(),
                (_, Some(handle)) => handle.id.clone(),
                (_, None) => String::new(),
            };
            table.add_row(vec![
                Cell::new(outcome.id.kind),
                Cell::new(&outcome.id.name),
                Cell::new(result).fg(color),
                Cell::new(detail),
                Cell::new(format!("{:.1}s", outcome.elapsed.as_secs_f64())),
            ]);
        }

        for id in &self.not_attempted {
            table.add_row(vec![
                Cell::new(id.kind),
                Cell::new(&id.name),
                Cell::new("not attempted").fg(Color::DarkGrey),
                Cell::new(""),
                Cell::new("-"),
            ]);
        }

        table.to_string()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.render_table())?;
        let status = if self.is_success() { "succeeded" } else { "failed" };
        write!(f, "{} {status}: {}", self.mode, self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_deploy_common::ResourceKind;

    fn outcome(name: &str, action: Action, required: bool) -> OperationOutcome {
        OperationOutcome {
            id: ResourceId::new(ResourceKind::Cluster, name),
            action,
            handle: None,
            required,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_clean_run_exits_zero() {
        let mut report = ExecutionReport::new(Mode::Apply, FailurePolicy::Abort);
        report.record(outcome("a", Action::Created, true));
        report.record(outcome("b", Action::AlreadyExists, true));
        report.finish();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary().created, 1);
        assert_eq!(report.summary().already_exists, 1);
    }

    #[test]
    fn test_any_failure_fails_abort_policy() {
        let mut report = ExecutionReport::new(Mode::Destroy, FailurePolicy::Abort);
        report.record(outcome("a", Action::Failed(FailureReason::Cancelled), false));
        report.abort(vec![ResourceId::new(ResourceKind::Cluster, "b")]);

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.summary().not_attempted, 1);
        assert_eq!(report.not_attempted().len(), 1);
    }

    #[test]
    fn test_best_effort_ignores_optional_failures() {
        let mut report = ExecutionReport::new(Mode::Apply, FailurePolicy::BestEffort);
        report.record(outcome(
            "optional",
            Action::Failed(FailureReason::Provider(ProviderError::malformed("x"))),
            false,
        ));
        report.record(outcome("independent", Action::Created, true));
        assert!(report.is_success());

        report.record(outcome(
            "required",
            Action::Failed(FailureReason::Provider(ProviderError::malformed("y"))),
            true,
        ));
        assert!(!report.is_success());
        assert_eq!(report.summary().failed, 2);
    }

    #[test]
    fn test_required_descriptor_skipped_after_optional_failure_is_fatal() {
        let mut report = ExecutionReport::new(Mode::Apply, FailurePolicy::BestEffort);
        report.record(outcome(
            "optional",
            Action::Failed(FailureReason::Provider(ProviderError::malformed("x"))),
            false,
        ));
        let skipped = outcome(
            "skipped",
            Action::Failed(FailureReason::DependencyFailed(ResourceId::new(
                ResourceKind::Cluster,
                "optional",
            ))),
            true,
        );
        assert!(skipped.is_fatal());
        report.record(skipped);

        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_optional_descriptor_skipped_is_not_fatal() {
        let skipped = outcome(
            "skipped",
            Action::Failed(FailureReason::DependencyFailed(ResourceId::new(
                ResourceKind::Cluster,
                "other",
            ))),
            false,
        );
        assert!(!skipped.is_fatal());
    }

    #[test]
    fn test_table_lists_every_descriptor() {
        let mut report = ExecutionReport::new(Mode::Apply, FailurePolicy::Abort);
        report.record(outcome("first", Action::Created, true));
        report.abort(vec![ResourceId::new(ResourceKind::Service, "second")]);

        let table = report.render_table();
        assert!(table.contains("first"));
        assert!(table.contains("second"));
        assert!(table.contains("not attempted"));
    }
}
