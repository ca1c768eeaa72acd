//! Reconciler behaviour against the in-memory control plane
//!
//! All tests run with paused tokio time, so drain polling and retry backoff
//! complete instantly.

use ecs_deploy::reconcile::descriptor::ServiceParams;
use ecs_deploy::reconcile::{
    Action, ConfigurationError, FailurePolicy, FailureReason, Mode, Plan, ProviderError,
    Reconciler, ReconcilerConfig, ResourceDescriptor, ResourceId, ResourceParams, RetryConfig,
};
use ecs_deploy::wait::WaitConfig;
use ecs_deploy_common::ResourceKind;
use ecs_deploy_test_utils::{FakeControlPlane, Operation};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn id(kind: ResourceKind, name: &str) -> ResourceId {
    ResourceId::new(kind, name)
}

fn r1() -> ResourceId {
    id(ResourceKind::Registry, "r1")
}

fn c1() -> ResourceId {
    id(ResourceKind::Cluster, "c1")
}

fn t1() -> ResourceId {
    id(ResourceKind::TaskDefinition, "t1")
}

fn s1() -> ResourceId {
    id(ResourceKind::Service, "s1")
}

/// `[Registry r1, Cluster c1, TaskDef t1 -> r1, Service s1 -> c1, t1]`
fn stack() -> Vec<ResourceDescriptor> {
    let registry = ResourceDescriptor::bare(ResourceKind::Registry, "r1");
    let cluster = ResourceDescriptor::bare(ResourceKind::Cluster, "c1");
    let task = ResourceDescriptor::bare(ResourceKind::TaskDefinition, "t1").depends_on(&registry);
    let service = ResourceDescriptor::new(
        "s1",
        ResourceParams::Service(ServiceParams {
            cluster: "c1".into(),
            task_definition: "t1".into(),
            desired_count: 2,
            ..Default::default()
        }),
    );
    vec![registry, cluster, task, service]
}

fn config(policy: FailurePolicy) -> ReconcilerConfig {
    ReconcilerConfig {
        policy,
        retry: RetryConfig {
            max_retries: 3,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        drain: WaitConfig::default().with_timeout(Duration::from_secs(120)),
    }
}

fn reconciler(plane: &FakeControlPlane, policy: FailurePolicy) -> Reconciler {
    Reconciler::new(plane.adapters(), config(policy))
}

fn rejected(message: &str) -> ProviderError {
    ProviderError::Sdk {
        code: Some("InvalidParameterException".into()),
        message: message.into(),
    }
}

#[tokio::test(start_paused = true)]
async fn apply_creates_everything_in_dependency_order() {
    let plane = FakeControlPlane::new();
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .apply(&plan)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.actions(), vec![&Action::Created; 4]);
    assert_eq!(plane.calls_of(Operation::Create), vec![r1(), c1(), t1(), s1()]);
    assert_eq!(plane.running(&s1()), Some(2));
    assert!(report.handle(&s1()).is_some());
}

#[tokio::test(start_paused = true)]
async fn apply_twice_never_duplicates() {
    let plane = FakeControlPlane::new();
    let plan = Plan::build(stack()).unwrap();
    let reconciler = reconciler(&plane, FailurePolicy::Abort);

    reconciler.apply(&plan).await.unwrap();
    let second = reconciler.apply(&plan).await.unwrap();

    assert!(second.is_success());
    assert_eq!(second.actions(), vec![&Action::AlreadyExists; 4]);
    assert_eq!(plane.calls_of(Operation::Create).len(), 4);
    for id in [r1(), c1(), t1(), s1()] {
        assert_eq!(plane.live_count(&id), 1, "{id}");
    }
}

#[tokio::test(start_paused = true)]
async fn destroy_of_absent_stack_succeeds() {
    let plane = FakeControlPlane::new();
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .destroy(&plan)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.actions(), vec![&Action::NotFound; 4]);
    assert!(plane.calls_of(Operation::Delete).is_empty());
    assert!(plane.calls_of(Operation::Scale).is_empty());
}

#[tokio::test(start_paused = true)]
async fn apply_then_destroy_leaves_nothing() {
    let plane = FakeControlPlane::new();
    let plan = Plan::build(stack()).unwrap();
    let reconciler = reconciler(&plane, FailurePolicy::Abort);

    reconciler.apply(&plan).await.unwrap();
    let report = reconciler.destroy(&plan).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.actions(), vec![&Action::Deleted; 4]);
    assert_eq!(plane.calls_of(Operation::Delete), vec![s1(), t1(), c1(), r1()]);
    assert_eq!(plane.total_live(), 0);
}

#[tokio::test(start_paused = true)]
async fn service_is_drained_before_delete() {
    let plane = FakeControlPlane::new();
    for id in [r1(), c1(), t1()] {
        plane.seed(id, 0);
    }
    plane.seed(s1(), 3);
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .destroy(&plan)
        .await
        .unwrap();

    assert!(report.is_success());
    let service_calls: Vec<Operation> = plane
        .calls()
        .into_iter()
        .filter(|c| c.id == s1())
        .map(|c| c.operation)
        .collect();
    let scale = service_calls
        .iter()
        .position(|op| *op == Operation::Scale)
        .unwrap();
    assert_eq!(service_calls.first(), Some(&Operation::Find));
    assert_eq!(service_calls.last(), Some(&Operation::Delete));
    // Workload was polled down to zero between the scale and the delete
    assert!(
        service_calls[scale..]
            .iter()
            .filter(|op| **op == Operation::ActiveCount)
            .count()
            >= 3
    );
    assert_eq!(plane.calls_of(Operation::Scale), vec![s1()]);
}

#[tokio::test(start_paused = true)]
async fn stuck_service_times_out_without_delete() {
    let plane = FakeControlPlane::new();
    for id in [r1(), c1(), t1()] {
        plane.seed(id, 0);
    }
    plane.seed(s1(), 2);
    plane.set_stuck(s1());
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .destroy(&plan)
        .await
        .unwrap();

    let outcome = report.outcome(&s1()).unwrap();
    assert!(matches!(
        outcome.action,
        Action::Failed(FailureReason::DrainTimeout { .. })
    ));
    assert!(plane.calls_of(Operation::Delete).is_empty());
    assert!(plane.is_live(&s1()));
    assert!(report.is_aborted());
    assert_eq!(report.not_attempted(), &[t1(), c1(), r1()]);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn best_effort_destroy_keeps_dependencies_of_a_stuck_service() {
    let plane = FakeControlPlane::new();
    for id in [r1(), c1(), t1()] {
        plane.seed(id, 0);
    }
    plane.seed(s1(), 2);
    plane.set_stuck(s1());
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::BestEffort)
        .destroy(&plan)
        .await
        .unwrap();

    // Cluster and task definition are still in use by the service
    for blocked in [t1(), c1()] {
        assert_eq!(
            report.outcome(&blocked).unwrap().action,
            Action::Failed(FailureReason::DependencyFailed(s1()))
        );
        assert!(plane.is_live(&blocked));
    }
    // The registry only blocks on the task definition, which failed too
    assert!(report.outcome(&r1()).unwrap().action.is_failed());
    assert!(plane.calls_of(Operation::Delete).is_empty());
    assert!(!report.is_success());
}

#[tokio::test(start_paused = true)]
async fn cycle_is_rejected_before_any_provider_call() {
    let plane = FakeControlPlane::new();
    let a = ResourceDescriptor::bare(ResourceKind::Cluster, "a");
    let b = ResourceDescriptor::bare(ResourceKind::Registry, "b").depends_on(&a);
    let a = a.depends_on(&b);

    let err = Plan::build(vec![a, b]).unwrap_err();

    assert!(matches!(err, ConfigurationError::CyclicDependency { .. }));
    assert!(plane.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abort_policy_stops_at_first_failure() {
    let plane = FakeControlPlane::new();
    plane.fail_next(c1(), Operation::Create, rejected("bad cluster"));
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .apply(&plan)
        .await
        .unwrap();

    assert_eq!(report.outcome(&r1()).unwrap().action, Action::Created);
    assert!(report.outcome(&c1()).unwrap().action.is_failed());
    assert!(report.is_aborted());
    assert_eq!(report.not_attempted(), &[t1(), s1()]);
    assert_eq!(plane.calls_of(Operation::Create), vec![r1(), c1()]);
    assert_eq!(report.summary().not_attempted, 2);
}

#[tokio::test(start_paused = true)]
async fn best_effort_skips_only_dependents() {
    let plane = FakeControlPlane::new();
    plane.fail_next(c1(), Operation::Create, rejected("bad cluster"));
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::BestEffort)
        .apply(&plan)
        .await
        .unwrap();

    assert_eq!(report.outcome(&r1()).unwrap().action, Action::Created);
    assert_eq!(report.outcome(&t1()).unwrap().action, Action::Created);
    assert_eq!(
        report.outcome(&s1()).unwrap().action,
        Action::Failed(FailureReason::DependencyFailed(c1()))
    );
    assert!(!report.is_aborted());
    assert!(!report.is_success());
    assert!(!plane.calls_of(Operation::Find).contains(&s1()));
}

#[tokio::test(start_paused = true)]
async fn optional_failure_does_not_fail_best_effort_run() {
    let plane = FakeControlPlane::new();
    let extra = ResourceDescriptor::bare(ResourceKind::Cluster, "extra").optional();
    let extra_id = extra.id.clone();
    plane.fail_next(extra_id.clone(), Operation::Create, rejected("quota"));
    let mut descriptors = stack();
    descriptors.push(extra);
    let plan = Plan::build(descriptors).unwrap();

    let report = reconciler(&plane, FailurePolicy::BestEffort)
        .apply(&plan)
        .await
        .unwrap();

    assert!(report.outcome(&extra_id).unwrap().action.is_failed());
    assert!(report.is_success());
}

#[tokio::test(start_paused = true)]
async fn required_dependent_of_failed_optional_fails_best_effort_run() {
    let plane = FakeControlPlane::new();
    plane.fail_next(r1(), Operation::Create, rejected("repository policy"));
    let mut descriptors = stack();
    descriptors[0] = descriptors[0].clone().optional();
    let plan = Plan::build(descriptors).unwrap();

    let report = reconciler(&plane, FailurePolicy::BestEffort)
        .apply(&plan)
        .await
        .unwrap();

    assert_eq!(
        report.outcome(&t1()).unwrap().action,
        Action::Failed(FailureReason::DependencyFailed(r1()))
    );
    assert!(!plane.is_live(&t1()));
    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let plane = FakeControlPlane::new();
    plane.fail_next(
        r1(),
        Operation::Find,
        ProviderError::Throttled {
            message: "Rate exceeded".into(),
        },
    );
    plane.fail_next(
        c1(),
        Operation::Create,
        ProviderError::Throttled {
            message: "Rate exceeded".into(),
        },
    );
    let plan = Plan::build(stack()).unwrap();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .apply(&plan)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(plane.live_count(&c1()), 1);
    assert_eq!(
        plane
            .calls_of(Operation::Create)
            .iter()
            .filter(|id| **id == c1())
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_attempts_nothing() {
    let plane = FakeControlPlane::new();
    let plan = Plan::build(stack()).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let report = reconciler(&plane, FailurePolicy::Abort)
        .with_cancellation(token)
        .run(Mode::Apply, &plan)
        .await
        .unwrap();

    assert!(report.is_aborted());
    assert!(report.outcomes().is_empty());
    assert_eq!(report.not_attempted().len(), 4);
    assert!(plane.calls().is_empty());
}
