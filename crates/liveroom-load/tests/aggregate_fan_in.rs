//! Fan-in of repeated runs into one aggregate report.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use liveroom_load::aggregator::ReportAggregator;
use liveroom_load::choreography::{Actor, Choreography};
use liveroom_load::clients::RoomAction;
use liveroom_load::errors::{ErrorKind, RpcError};
use liveroom_load::pacing::{PacingMode, TokioPacer};
use liveroom_test_utils::{MockSessionClient, TestHarness};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn lesson(pause: Duration) -> Choreography {
    Choreography::new()
        .act("start", Actor::Teacher(0), RoomAction::StartRecording)
        .pause("lesson", pause)
        .act("end", Actor::Teacher(0), RoomAction::EndSession)
}

#[tokio::test(start_paused = true)]
async fn test_every_launched_run_reports_once() {
    for repeat in [1, 7, 32] {
        let client = Arc::new(MockSessionClient::new());
        let harness = TestHarness::new(2, 3)
            .client(Arc::clone(&client))
            .pacer(Arc::new(TokioPacer))
            .script(lesson(Duration::from_secs(3)))
            .build()
            .unwrap();
        let process = CancellationToken::new();

        let report = ReportAggregator::new(repeat)
            .run(|_| harness.runner(&process).run())
            .await;
        process.cancel();

        assert_eq!(report.attempted, repeat);
        assert_eq!(report.succeeded, repeat);
        assert_eq!(client.sessions_created(), repeat);
        assert_eq!(report.histogram.iter().map(|b| b.count).sum::<usize>(), repeat);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_isolated_per_run() {
    let client = Arc::new(MockSessionClient::new().failing_times(
        "CreateSession",
        3,
        RpcError::Rejected {
            status: 503,
            body: "busy".to_string(),
        },
    ));
    let harness = TestHarness::new(2, 3)
        .client(Arc::clone(&client))
        .pacer(Arc::new(TokioPacer))
        .script(lesson(Duration::from_secs(1)))
        .build()
        .unwrap();
    let process = CancellationToken::new();

    let report = ReportAggregator::new(10)
        .with_parallelism(4)
        .run(|_| harness.runner(&process).run())
        .await;
    process.cancel();

    assert_eq!(report.attempted, 10);
    assert_eq!(report.succeeded, 7);
    assert_eq!(report.failed(), 3);
    assert_eq!(report.failures_by_kind.get(&ErrorKind::Upstream), Some(&3));
    let stats = report.latency.unwrap();
    assert!(stats.min <= stats.avg && stats.avg <= stats.max);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_still_collects_every_report() {
    let harness = TestHarness::new(2, 3)
        .pacer(Arc::new(TokioPacer))
        .pacing_mode(PacingMode::Abortable)
        .script(lesson(Duration::from_secs(600)))
        .build()
        .unwrap();
    let process = CancellationToken::new();
    let interrupt = process.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        interrupt.cancel();
    });

    let report = ReportAggregator::new(5)
        .run(|_| harness.runner(&process).run())
        .await;

    assert_eq!(report.attempted, 5);
    assert_eq!(report.succeeded, 0);
    assert!(report.latency.is_none());
    assert_eq!(report.failures_by_kind.get(&ErrorKind::Cancelled), Some(&5));
    assert_eq!(report.total_duration, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_sequential_runs_do_not_overlap() {
    let harness = TestHarness::new(2, 2)
        .pacer(Arc::new(TokioPacer))
        .script(lesson(Duration::from_secs(2)))
        .build()
        .unwrap();
    let process = CancellationToken::new();

    let report = ReportAggregator::new(3)
        .with_parallelism(1)
        .run(|_| harness.runner(&process).run())
        .await;
    process.cancel();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.total_duration, Duration::from_secs(6));
    assert!(report.to_string().contains("3 attempted, 3 succeeded, 0 failed"));
}
