mod common;

use common::*;
use std::sync::Arc;
use trove_indexer::domain::PositionStatus;
use trove_indexer::ledger::MockLedger;
use trove_indexer::orchestration::{SchedulerState, StepOutcome};

#[tokio::test]
async fn test_empty_batches_advance_cursor() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(MockLedger::new().with_head(1_499));
    let mut scheduler = scheduler(ledger.clone(), repo.clone(), scheduler_config(1_000, 250)).await;

    for _ in 0..2 {
        match scheduler.step().await.unwrap() {
            StepOutcome::Advanced { report, .. } => assert_eq!(report.logs, 0),
            other => panic!("Expected advance, got {:?}", other),
        }
    }
    assert_eq!(scheduler.cursor(), 1_500);
    assert_eq!(repo.load_cursor("test-indexer").await.unwrap(), Some(1_499));
    assert_eq!(ledger.fetch_calls(), vec![(1_000, 1_249), (1_250, 1_499)]);
}

#[tokio::test]
async fn test_tails_ledger_into_positions() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(
        MockLedger::new()
            .with_head(120)
            .with_log(trove_updated(105, 0, 0x0a, 0x0b, tokens(10), tokens(5), OPEN))
            .with_log(unknown_log(107, 0))
            .with_log(trove_updated(112, 3, 0x0a, 0x0b, tokens(10), tokens(0), ADJUST)),
    );
    let mut scheduler = scheduler(ledger.clone(), repo.clone(), scheduler_config(100, 10)).await;

    assert!(matches!(
        scheduler.step().await.unwrap(),
        StepOutcome::Advanced { from: 100, to: 109, .. }
    ));
    assert_eq!(
        repo.position(1).await.unwrap().unwrap().status,
        PositionStatus::Active
    );

    assert!(matches!(
        scheduler.step().await.unwrap(),
        StepOutcome::Advanced { from: 110, to: 119, .. }
    ));
    assert!(matches!(
        scheduler.step().await.unwrap(),
        StepOutcome::Advanced { from: 120, to: 120, .. }
    ));
    assert_eq!(scheduler.step().await.unwrap(), StepOutcome::Idle { head: 120 });

    let position = repo.position(1).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Liquidated);
    assert_eq!(position.history.len(), 2);
}

#[tokio::test]
async fn test_fetch_failures_retry_same_range() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(
        MockLedger::new()
            .with_head(30)
            .with_log(trove_updated(25, 0, 0x0a, 0x0b, tokens(10), tokens(5), OPEN)),
    );
    ledger.fail_next_fetches(3);
    let mut scheduler = scheduler(ledger.clone(), repo.clone(), scheduler_config(20, 100)).await;

    let outcome = scheduler.step().await.unwrap();
    assert!(matches!(outcome, StepOutcome::Advanced { from: 20, to: 30, .. }));
    assert_eq!(ledger.fetch_calls(), vec![(20, 30); 4]);
    assert_eq!(repo.next_identity().await.unwrap(), 2);
}

#[tokio::test]
async fn test_resumes_after_checkpoint() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(
        MockLedger::new()
            .with_head(40)
            .with_log(trove_updated(15, 0, 0x0a, 0x0b, tokens(10), tokens(5), OPEN))
            .with_log(trove_updated(35, 0, 0x0a, 0x0b, tokens(10), tokens(4), ADJUST)),
    );

    {
        let mut first = scheduler(ledger.clone(), repo.clone(), scheduler_config(10, 20)).await;
        first.step().await.unwrap();
        assert_eq!(first.cursor(), 30);
    }

    let mut second = scheduler(ledger.clone(), repo.clone(), scheduler_config(10, 20)).await;
    assert_eq!(second.cursor(), 30);
    assert!(matches!(
        second.step().await.unwrap(),
        StepOutcome::Advanced { from: 30, to: 40, .. }
    ));

    let position = repo.position(1).await.unwrap().unwrap();
    assert_eq!(position.history.len(), 2);
    assert_eq!(ledger.fetch_calls(), vec![(10, 29), (30, 40)]);
}

#[tokio::test]
async fn test_start_block_beyond_checkpoint_wins() {
    let (repo, _temp) = setup_repo().await;
    repo.save_cursor("test-indexer", 50).await.unwrap();
    let ledger = Arc::new(MockLedger::new().with_head(500));

    let scheduler = scheduler(ledger, repo, scheduler_config(300, 10)).await;
    assert_eq!(scheduler.cursor(), 300);
}

#[tokio::test]
async fn test_crash_before_checkpoint_replays_safely() {
    let (repo, _temp) = setup_repo().await;
    let logs = vec![
        trove_updated(10, 0, 0x0a, 0x0b, tokens(10), tokens(5), OPEN),
        trove_updated(11, 0, 0x0a, 0x0b, tokens(10), tokens(2), ADJUST),
    ];
    // Batch persisted but cursor never saved.
    pipeline(repo.clone()).process_batch(&logs).await.unwrap();
    let before = repo.position(1).await.unwrap();

    let ledger = Arc::new(MockLedger::new().with_head(12).with_logs(logs));
    let mut scheduler = scheduler(ledger, repo.clone(), scheduler_config(10, 10)).await;
    match scheduler.step().await.unwrap() {
        StepOutcome::Advanced { report, .. } => {
            assert_eq!(report.replayed, 2);
            assert_eq!(report.folded, 0);
        }
        other => panic!("Expected advance, got {:?}", other),
    }

    assert_eq!(repo.position(1).await.unwrap(), before);
    assert_eq!(repo.next_identity().await.unwrap(), 2);
}

#[tokio::test]
async fn test_crash_replay_keeps_dropped_events_dropped() {
    let (repo, _temp) = setup_repo().await;
    let logs = vec![
        trove_updated(10, 0, 0x0a, 0x0b, tokens(10), tokens(5), ADJUST),
        trove_updated(11, 0, 0x0a, 0x0b, tokens(0), tokens(0), CLOSE),
        trove_updated(12, 0, 0x0a, 0x0b, tokens(20), tokens(8), OPEN),
    ];
    // Batch persisted but cursor never saved.
    let first = pipeline(repo.clone()).process_batch(&logs).await.unwrap();
    assert_eq!(first.dropped, 2);
    let before = repo.position(1).await.unwrap();

    let ledger = Arc::new(MockLedger::new().with_head(12).with_logs(logs));
    let mut scheduler = scheduler(ledger, repo.clone(), scheduler_config(10, 10)).await;
    match scheduler.step().await.unwrap() {
        StepOutcome::Advanced { report, .. } => {
            assert_eq!(report.replayed, 3);
            assert_eq!(report.folded, 0);
            assert_eq!(report.dropped, 0);
        }
        other => panic!("Expected advance, got {:?}", other),
    }

    let after = repo.position(1).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.map(|p| p.status), Some(PositionStatus::Active));
    assert_eq!(repo.load_cursor("test-indexer").await.unwrap(), Some(12));
}

#[tokio::test]
async fn test_idle_until_head_advances() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(MockLedger::new().with_head(9));
    let mut scheduler = scheduler(ledger.clone(), repo.clone(), scheduler_config(0, 10)).await;

    scheduler.step().await.unwrap();
    assert_eq!(scheduler.step().await.unwrap(), StepOutcome::Idle { head: 9 });
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    ledger.fail_next_heads(2);
    assert_eq!(scheduler.step().await.unwrap(), StepOutcome::Idle { head: 9 });

    ledger.push_log(trove_updated(12, 0, 0x0a, 0x0b, tokens(10), tokens(5), OPEN));
    ledger.set_head(15);
    assert_eq!(scheduler.step().await.unwrap(), StepOutcome::Resumed { head: 15 });
    assert_eq!(scheduler.state(), SchedulerState::CatchingUp);
    assert!(matches!(
        scheduler.step().await.unwrap(),
        StepOutcome::Advanced { from: 10, to: 15, .. }
    ));
    assert!(repo.position(1).await.unwrap().is_some());
}
