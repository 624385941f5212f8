//! Pipeline lifecycle integration tests.
//!
//! These tests drive whole orders through the orchestrator with the mock
//! catalog and preparator:
//! - Status stamping on every write path
//! - Terminal statuses are never left
//! - Idempotent re-submission and item redelivery
//! - Partial failure at batch and order level
//! - Independence from completion order

use std::time::Duration;

use oseo_core::{
    order::OrderStore,
    processor::{PipelineConfig, RetryConfig, Step},
    testing::{fixtures, StepScript, TestHarness},
    OrchestratorConfig, PipelineError, ProcessingOutcome, Status,
};

#[tokio::test]
async fn test_status_changed_on_moves_only_with_status() {
    let h = TestHarness::new();
    let order = h
        .orchestrator
        .create_order(fixtures::product_order("alice", 1, 2))
        .await
        .unwrap();
    let created = h.items(&order.id);
    assert!(created.iter().all(|i| i.status_changed_on.is_some()));
    assert!(order.status_changed_on.is_some());

    let submitted = h.orchestrator.submit_order(&order.id).await.unwrap();
    assert_eq!(submitted.status, Status::Completed);
    assert!(submitted.status_changed_on > order.status_changed_on);

    let completed = h.items(&order.id);
    for (before, after) in created.iter().zip(&completed) {
        assert_eq!(after.status, Status::Completed);
        assert!(after.status_changed_on > before.status_changed_on);
    }

    // A second submit writes nothing.
    let again = h.orchestrator.submit_order(&order.id).await.unwrap();
    assert_eq!(again.status_changed_on, submitted.status_changed_on);
    for (before, after) in completed.iter().zip(h.items(&order.id)) {
        assert_eq!(after.status_changed_on, before.status_changed_on);
    }

    // Acknowledging twice: only the first one changes the status.
    let item_id = &completed[0].id;
    let first = h.orchestrator.acknowledge_download(item_id).await.unwrap();
    assert_eq!(first.status, Status::Downloaded);
    assert!(first.status_changed_on > completed[0].status_changed_on);

    let second = h.orchestrator.acknowledge_download(item_id).await.unwrap();
    assert_eq!(second.status, Status::Downloaded);
    assert_eq!(second.downloads, 2);
    assert_eq!(second.status_changed_on, first.status_changed_on);
}

#[tokio::test]
async fn test_terminal_statuses_are_final() {
    let h = TestHarness::new();
    h.preparator.script("p-1-2", Step::Fetch, StepScript::Fatal);
    let order = h
        .orchestrator
        .create_order(fixtures::product_order("alice", 1, 2))
        .await
        .unwrap();
    let order = h.orchestrator.submit_order(&order.id).await.unwrap();
    assert_eq!(order.status, Status::Failed);

    let failed = h.item_by_identifier(&order.id, "p-1-2");
    assert_eq!(failed.status, Status::Failed);

    // Neither the order nor a finished item can be cancelled.
    let err = h.orchestrator.cancel_order(&order.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
    let err = h.orchestrator.cancel_item(&failed.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));

    // A failed item cannot be acknowledged.
    let err = h
        .orchestrator
        .acknowledge_download(&failed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));

    // Redelivering the failed item does not revive it.
    let outcome = h
        .orchestrator
        .coordinator()
        .processor()
        .process_item(&failed.id)
        .await
        .unwrap();
    assert!(outcome.is_failed());
    assert_eq!(
        h.store.get_item(&failed.id).unwrap().unwrap().status,
        Status::Failed
    );
}

#[tokio::test]
async fn test_redelivered_item_is_a_no_op() {
    let h = TestHarness::new();
    let order = h
        .orchestrator
        .create_order(fixtures::single_batch("alice", &["p-1"]))
        .await
        .unwrap();
    let item = h.item_by_identifier(&order.id, "p-1");
    let processor = h.orchestrator.coordinator().processor();

    let first = processor.process_item(&item.id).await.unwrap();
    let after_first = h.store.get_item(&item.id).unwrap().unwrap();
    let second = processor.process_item(&item.id).await.unwrap();
    let after_second = h.store.get_item(&item.id).unwrap().unwrap();

    assert_eq!(first, second);
    assert!(matches!(first, ProcessingOutcome::Completed { .. }));
    assert_eq!(after_first.status, after_second.status);
    assert_eq!(after_first.status_changed_on, after_second.status_changed_on);
    assert_eq!(h.preparator.calls_for("p-1"), vec!["fetch", "customize", "place"]);
    assert_eq!(h.resolver.resolve_count("p-1"), 1);
}

#[tokio::test]
async fn test_partial_failure_in_one_batch() {
    let h = TestHarness::new();
    // Retries exhausted at fetch for the first item.
    h.preparator.script("a", Step::Fetch, StepScript::Transient);
    let order = h
        .orchestrator
        .create_order(fixtures::single_batch("alice", &["a", "b", "c"]))
        .await
        .unwrap();

    let order = h.orchestrator.submit_order(&order.id).await.unwrap();

    let report = h.orchestrator.get_order_status(&order.id).unwrap();
    assert_eq!(report.batches.len(), 1);
    assert_eq!(report.batches[0].status, Status::Failed);
    assert_eq!(h.item_by_identifier(&order.id, "a").status, Status::Failed);
    assert_eq!(h.item_by_identifier(&order.id, "b").status, Status::Completed);
    assert_eq!(h.item_by_identifier(&order.id, "c").status, Status::Completed);
    assert_eq!(h.preparator.calls_for("a"), vec!["fetch", "fetch", "fetch"]);

    let failed = h.item_by_identifier(&order.id, "a");
    assert!(failed.additional_status_info.contains("fetch"));
    // Every batch failed, so the order did.
    assert_eq!(order.status, Status::Failed);
}

#[tokio::test]
async fn test_one_completed_and_one_failed_batch() {
    let h = TestHarness::new();
    h.preparator.script("p-2-1", Step::Place, StepScript::Fatal);
    h.preparator.script("p-2-2", Step::Customize, StepScript::Fatal);
    let order = h
        .orchestrator
        .create_order(fixtures::product_order("alice", 2, 2))
        .await
        .unwrap();

    let order = h.orchestrator.submit_order(&order.id).await.unwrap();

    assert_eq!(order.status, Status::InProduction);
    assert_eq!(
        order.additional_status_info,
        "2 of 4 items completed, 2 failed"
    );
    assert!(order.completed_on.is_none());

    let report = h.orchestrator.get_order_status(&order.id).unwrap();
    let statuses: Vec<_> = report.batches.iter().map(|b| b.status).collect();
    assert_eq!(statuses, vec![Status::Completed, Status::Failed]);
}

#[tokio::test]
async fn test_completion_order_does_not_change_the_result() {
    let delays = [[40u64, 0, 20], [0, 20, 40], [20, 40, 0]];
    for delays in delays {
        let h = TestHarness::new();
        h.preparator.script("b", Step::Fetch, StepScript::Fatal);
        for (identifier, millis) in ["a", "b", "c"].iter().zip(delays) {
            h.preparator.delay(identifier, Duration::from_millis(millis));
        }
        let order = h
            .orchestrator
            .create_order(fixtures::single_batch("alice", &["a", "b", "c"]))
            .await
            .unwrap();
        h.orchestrator.submit_order(&order.id).await.unwrap();

        let report = h.orchestrator.get_order_status(&order.id).unwrap();
        assert_eq!(report.batches[0].status, Status::Failed, "delays {:?}", delays);
        let items: Vec<_> = report.batches[0]
            .items
            .iter()
            .map(|i| (i.identifier.as_str(), i.status))
            .collect();
        assert_eq!(
            items,
            vec![
                ("a", Status::Completed),
                ("b", Status::Failed),
                ("c", Status::Completed)
            ]
        );
    }
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let h = TestHarness::with_config(
        PipelineConfig::default()
            .with_max_parallel_items(2)
            .with_retry(RetryConfig::immediate(1)),
        OrchestratorConfig::default(),
    );
    let order = h
        .orchestrator
        .create_order(fixtures::product_order("alice", 2, 3))
        .await
        .unwrap();
    let gates: Vec<_> = h
        .items(&order.id)
        .iter()
        .map(|item| h.preparator.hold(&item.identifier, Step::Fetch))
        .collect();

    let task = {
        let orchestrator = h.orchestrator.clone();
        let order_id = order.id.clone();
        tokio::spawn(async move { orchestrator.submit_order(&order_id).await })
    };

    // Release items one gate at a time, whichever entered.
    let mut pending = gates;
    while !pending.is_empty() {
        let entered = {
            let waits = pending.iter().map(|g| Box::pin(g.entered()));
            let (_, index, _) = futures::future::select_all(waits).await;
            index
        };
        assert!(h.orchestrator.status().items_in_flight <= 2);
        pending.remove(entered).release();
    }

    let order = task.await.unwrap().unwrap();
    assert_eq!(order.status, Status::Completed);
    assert_eq!(h.orchestrator.status().items_in_flight, 0);
    assert_eq!(h.orchestrator.status().orders_in_flight, 0);
}

#[tokio::test]
async fn test_transient_resolver_failure_is_retried() {
    let h = TestHarness::new();
    h.resolver.fail_transient_times("p-1", 2);
    let order = h
        .orchestrator
        .create_order(fixtures::single_batch("alice", &["p-1"]))
        .await
        .unwrap();

    let order = h.orchestrator.submit_order(&order.id).await.unwrap();

    assert_eq!(order.status, Status::Completed);
    assert_eq!(h.resolver.resolve_count("p-1"), 3);
}

#[tokio::test]
async fn test_missing_catalog_entry_fails_only_that_item() {
    let h = TestHarness::new();
    h.resolver.set_missing("p-1-1");
    let order = h
        .orchestrator
        .create_order(fixtures::product_order("alice", 2, 1))
        .await
        .unwrap();

    let order = h.orchestrator.submit_order(&order.id).await.unwrap();

    assert_eq!(order.status, Status::InProduction);
    assert_eq!(h.resolver.resolve_count("p-1-1"), 1);
    assert!(h.preparator.calls_for("p-1-1").is_empty());
    assert_eq!(
        h.item_by_identifier(&order.id, "p-2-1").status,
        Status::Completed
    );
}
