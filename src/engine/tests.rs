use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::remote::RemoteError;
use crate::test_utils::{FakeService, arb_remote_error, arb_user_field};
use crate::types::{ExitStatus, FailureStage, OutcomeStatus, ScopeFilter, Target, TargetKind, UserField};

const ASSIGNEE: TargetKind = TargetKind::Issue {
    field: UserField::Assignee,
};

fn issues(n: usize) -> Vec<Target> {
    (1..=n)
        .map(|i| Target::issue(format!("OPS-{}", i), UserField::Assignee))
        .collect()
}

fn ada_and_bo() -> FakeService {
    FakeService::new()
        .with_user("ada@x.com", "acc-ada", "Ada")
        .with_user("bo@x.com", "acc-bo", "Bo")
}

async fn run(service: &Arc<FakeService>, entries: Vec<MappingEntry>, options: RemapOptions) -> RunReport {
    run_with(service, entries, options, 4, CancellationToken::new()).await
}

async fn run_with(
    service: &Arc<FakeService>,
    entries: Vec<MappingEntry>,
    options: RemapOptions,
    capacity: usize,
    cancel: CancellationToken,
) -> RunReport {
    let gate = Arc::new(ConcurrencyGate::new(capacity, Duration::ZERO));
    run_remap(service.clone(), gate, entries, options, cancel).await
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

// ─── Basic runs ───

#[tokio::test]
async fn reassigns_every_owned_target() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(3)));
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!((report.succeeded, report.failed, report.skipped), (3, 0, 0));
    assert!(report.failures.is_empty());
    assert_eq!(report.exit_status(), ExitStatus::Success);

    let mutations = service.mutations();
    assert_eq!(mutations.len(), 3);
    for (_, previous, new_owner) in mutations {
        assert_eq!(previous.as_str(), "acc-ada");
        assert_eq!(new_owner.as_str(), "acc-bo");
    }
}

#[tokio::test]
async fn empty_mapping_is_a_clean_noop() {
    let service = Arc::new(FakeService::new());
    let report = run(&service, vec![], RemapOptions::new(ASSIGNEE)).await;
    assert_eq!(report.total(), 0);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert_eq!(service.search_calls(), 0);
}

#[tokio::test]
async fn owner_with_nothing_succeeds_with_zero_targets() {
    let service = Arc::new(ada_and_bo());
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;
    assert_eq!(report.total(), 0);
    assert!(report.entry_failures.is_empty());
    assert_eq!(service.search_calls(), 1);
}

#[tokio::test]
async fn filters_ignore_project_scope() {
    let service = Arc::new(
        ada_and_bo().with_owned(TargetKind::Filter, "acc-ada", vec![Target::filter("10"), Target::filter("11")]),
    );
    let options = RemapOptions::new(TargetKind::Filter).with_scope(Some(ScopeFilter::Project("OPS".into())));
    let report = run(&service, vec![MappingEntry::new("ada@x.com", "bo@x.com")], options).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(service.last_scope(), None);
}

// ─── Failures ───

#[tokio::test]
async fn unresolved_old_identity_skips_the_entry() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(3)));
    let report = run(
        &service,
        vec![MappingEntry::new("ghost@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!(report.total(), 0);
    assert_eq!(report.entry_failures.len(), 1);
    assert_eq!(
        report.entry_failures[0].stage,
        FailureStage::Resolution {
            token: "ghost@x.com".into()
        }
    );
    assert_eq!(service.search_calls(), 0);
    assert_eq!(service.mutation_count(), 0);
    assert_eq!(report.exit_status(), ExitStatus::CompletedWithFailures);
}

#[tokio::test]
async fn unresolved_new_identity_skips_the_entry() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(2)));
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "ghost@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!(report.entry_failures.len(), 1);
    assert!(report.entry_failures[0].detail.contains("ghost@x.com"));
    assert_eq!(service.search_calls(), 0);
}

#[tokio::test]
async fn one_throttled_target_fails_alone() {
    let service = Arc::new(
        ada_and_bo()
            .with_owned(ASSIGNEE, "acc-ada", issues(5))
            .with_failing_mutation(
                Target::issue("OPS-3", UserField::Assignee),
                RemoteError::from_response(429, r#"{"errorMessages":["slow down"]}"#),
            ),
    );
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!((report.succeeded, report.failed, report.skipped), (4, 1, 0));
    let failure = &report.failures[0];
    assert_eq!(failure.target, Target::issue("OPS-3", UserField::Assignee));
    assert_eq!(failure.status, OutcomeStatus::Failed);
    assert!(failure.detail.as_deref().unwrap().contains("RateLimited"));
    assert_eq!(report.exit_status(), ExitStatus::CompletedWithFailures);
}

#[tokio::test]
async fn entries_do_not_affect_each_other() {
    let service = Arc::new(
        ada_and_bo()
            .with_user("cy@x.com", "acc-cy", "Cy")
            .with_owned(ASSIGNEE, "acc-ada", issues(2))
            .with_owned(ASSIGNEE, "acc-cy", vec![Target::issue("WEB-1", UserField::Assignee)]),
    );
    let report = run(
        &service,
        vec![
            MappingEntry::new("ghost@x.com", "bo@x.com"),
            MappingEntry::new("ada@x.com", "bo@x.com"),
            MappingEntry::new("cy@x.com", "ada@x.com"),
        ],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.entry_failures.len(), 1);
}

#[tokio::test]
async fn enumeration_failure_keeps_earlier_targets() {
    let service = Arc::new(
        ada_and_bo()
            .with_owned(ASSIGNEE, "acc-ada", issues(5))
            .with_page_size(2)
            .with_failing_page(
                "acc-ada",
                1,
                RemoteError::from_response(500, "search broke"),
            ),
    );
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.entry_failures.len(), 1);
    assert_eq!(report.entry_failures[0].stage, FailureStage::Enumeration);
    assert!(report.entry_failures[0].detail.contains("ServerError"));
    assert_eq!(report.exit_status(), ExitStatus::CompletedWithFailures);
}

#[tokio::test]
async fn every_target_moves_when_searches_see_live_ownership() {
    let filters: Vec<Target> = (1..=7).map(|i| Target::filter(i.to_string())).collect();
    let service = Arc::new(
        ada_and_bo()
            .with_owned(TargetKind::Filter, "acc-ada", filters)
            .with_page_size(3)
            .with_live_ownership(),
    );
    let report = run_with(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(TargetKind::Filter),
        1,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.succeeded, 7);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert!(service.owned_by(TargetKind::Filter, "acc-ada").is_empty());
    assert_eq!(service.owned_by(TargetKind::Filter, "acc-bo").len(), 7);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_enumeration_skips_gathered_targets() {
    let service = Arc::new(
        ada_and_bo()
            .with_owned(ASSIGNEE, "acc-ada", issues(6))
            .with_page_size(2)
            .with_latency(Duration::from_millis(50)),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        // Both identities resolve by 100ms; the first page lands at 150ms.
        tokio::time::sleep(Duration::from_millis(175)).await;
        trigger.cancel();
    });

    let report = run_with(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
        1,
        cancel,
    )
    .await;

    assert!(report.aborted);
    assert_eq!(service.mutation_count(), 0);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.skipped, 2);
}

// ─── Dry run ───

#[tokio::test]
async fn dry_run_never_mutates() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(3)));
    let report = run(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE).dry_run(true),
    )
    .await;

    assert_eq!((report.succeeded, report.failed, report.skipped), (0, 0, 3));
    assert_eq!(service.mutation_count(), 0);
    assert_eq!(report.exit_status(), ExitStatus::Success);
}

// ─── Resolution cache ───

#[tokio::test]
async fn each_token_is_resolved_once_per_run() {
    let service = Arc::new(
        ada_and_bo()
            .with_user("cy@x.com", "acc-cy", "Cy")
            .with_owned(ASSIGNEE, "acc-ada", issues(2)),
    );
    let report = run(
        &service,
        vec![
            MappingEntry::new("ada@x.com", "bo@x.com"),
            MappingEntry::new("ada@x.com", "cy@x.com"),
            MappingEntry::new("cy@x.com", "bo@x.com"),
        ],
        RemapOptions::new(ASSIGNEE),
    )
    .await;

    assert_eq!(service.total_resolve_calls(), 3);
    assert_eq!(service.resolve_count("ada@x.com"), 1);
    // Both "ada" rows run independently against the same owned set.
    assert_eq!(report.succeeded, 4);
}

#[tokio::test]
async fn account_id_tokens_resolve_like_emails() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(1)));
    let report = run(
        &service,
        vec![MappingEntry::new("acc-ada", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
    )
    .await;
    assert_eq!(report.succeeded, 1);
}

// ─── Cancellation ───

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(3)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_with(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
        4,
        cancel,
    )
    .await;

    assert!(report.aborted);
    assert_eq!(report.total(), 0);
    assert_eq!(service.mutation_count(), 0);
    assert_eq!(report.exit_status(), ExitStatus::Aborted);
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_in_flight_work() {
    let service = Arc::new(
        ada_and_bo()
            .with_owned(ASSIGNEE, "acc-ada", issues(10))
            .with_latency(Duration::from_millis(50)),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(275)).await;
        trigger.cancel();
    });

    let report = run_with(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
        1,
        cancel,
    )
    .await;

    assert!(report.aborted);
    assert_eq!(report.exit_status(), ExitStatus::Aborted);
    assert_eq!(report.failed, 0);
    // Every mutation that reached the service finished and was counted.
    assert_eq!(report.succeeded, service.mutation_count() as u64);
    assert!(service.mutation_count() < 10);
}

#[tokio::test]
async fn finishing_normally_is_not_aborted() {
    let service = Arc::new(ada_and_bo().with_owned(ASSIGNEE, "acc-ada", issues(2)));
    let cancel = CancellationToken::new();
    let report = run_with(
        &service,
        vec![MappingEntry::new("ada@x.com", "bo@x.com")],
        RemapOptions::new(ASSIGNEE),
        2,
        cancel.clone(),
    )
    .await;
    cancel.cancel();
    assert!(!report.aborted);
}

// ─── Properties ───

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn in_flight_calls_never_exceed_capacity(
        capacity in 1usize..6,
        targets in 0usize..30,
        entries in 1usize..4,
    ) {
        let mut service = FakeService::new()
            .with_user("new@x.com", "acc-new", "New")
            .with_latency(Duration::from_millis(5))
            .with_page_size(4);
        let mut mapping = Vec::new();
        for e in 0..entries {
            let account = format!("acc-{}", e);
            let token = format!("old{}@x.com", e);
            service = service
                .with_user(&token, &account, "Old")
                .with_owned(ASSIGNEE, &account, issues(targets));
            mapping.push(MappingEntry::new(token, "new@x.com"));
        }
        let service = Arc::new(service);

        let report = paused_runtime().block_on(run_with(
            &service,
            mapping,
            RemapOptions::new(ASSIGNEE),
            capacity,
            CancellationToken::new(),
        ));

        prop_assert!(service.max_in_flight() <= capacity);
        prop_assert_eq!(report.succeeded, (targets * entries) as u64);
    }

    #[test]
    fn every_target_is_accounted_for(
        targets in 0usize..25,
        failing in prop::collection::btree_set(1usize..25, 0..8),
        error in arb_remote_error(),
        field in arb_user_field(),
        dry_run in any::<bool>(),
    ) {
        let kind = TargetKind::Issue { field };
        let owned: Vec<_> = (1..=targets)
            .map(|i| Target::issue(format!("OPS-{}", i), field))
            .collect();
        let mut service = ada_and_bo().with_owned(kind, "acc-ada", owned).with_page_size(3);
        for i in failing.iter().filter(|i| **i <= targets) {
            service = service.with_failing_mutation(Target::issue(format!("OPS-{}", i), field), error.clone());
        }
        let service = Arc::new(service);
        let expected_failures = failing.iter().filter(|i| **i <= targets).count() as u64;

        let report = paused_runtime().block_on(run(
            &service,
            vec![MappingEntry::new("ada@x.com", "bo@x.com")],
            RemapOptions::new(kind).dry_run(dry_run),
        ));

        prop_assert_eq!(report.total(), targets as u64);
        prop_assert!(!report.aborted);
        if dry_run {
            prop_assert_eq!(service.mutation_count(), 0);
            prop_assert_eq!(report.skipped, targets as u64);
        } else {
            prop_assert_eq!(service.mutation_count(), targets);
            prop_assert_eq!(report.failed, expected_failures);
            prop_assert_eq!(report.failures.len() as u64, expected_failures);
        }
    }
}
