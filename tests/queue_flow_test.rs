//! End-to-end queue behaviour against the in-memory job store.
//!
//! Every test runs on tokio's paused clock, so backoff, TTL and polling
//! delays are exact and instant.

mod helpers;

use helpers::*;
use std::time::Duration;

use nutrition_analysis::config::QueueSettings;
use nutrition_analysis::models::job::JobStatus;
use nutrition_analysis::services::store::{keys, JobStore};

fn settings() -> QueueSettings {
    QueueSettings::default()
}

#[tokio::test(start_paused = true)]
async fn test_enqueued_job_reports_queued() {
    let harness = Harness::new(FakeAnalysis::new(Duration::ZERO, 0), 3, settings());

    let job_id = harness.enqueue(1).await;
    let view = harness.status.get_status(job_id).await.unwrap();

    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.result, None);
    assert_eq!(view.error, None);
}

#[tokio::test(start_paused = true)]
async fn test_job_runs_to_completion() {
    let mut harness = Harness::new(FakeAnalysis::new(Duration::from_millis(300), 0), 3, settings());
    harness.start();

    let job_id = harness.enqueue(1).await;
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(10))
        .await
        .unwrap();
    harness.stop().await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result.unwrap()["meal_name"], "Test Meal");
    assert_eq!(harness.store.history(job_id), vec!["queued", "processing", "completed"]);
    assert_eq!(harness.store.list_len(keys::IN_PROGRESS_QUEUE).await.unwrap(), 0);
    assert_eq!(harness.store.list_len(keys::COMPLETED_QUEUE).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_transitions_are_monotonic() {
    // First three calls fail, so some jobs retry while others finish.
    let mut harness = Harness::new(FakeAnalysis::new(Duration::from_millis(100), 3), 3, settings());
    harness.start();

    let mut ids = Vec::new();
    for n in 0..8 {
        ids.push(harness.enqueue(n).await);
    }
    tokio::time::sleep(Duration::from_secs(30)).await;
    harness.stop().await;

    for id in ids {
        let history = harness.store.history(id);
        assert_eq!(history.len(), 3, "unexpected history {history:?}");
        assert_eq!(&history[..2], ["queued", "processing"]);
        assert!(history[2] == "completed" || history[2] == "failed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_processing_never_exceeds_capacity() {
    let mut harness = Harness::new(FakeAnalysis::new(Duration::from_millis(500), 0), 2, settings());
    let mut ids = Vec::new();
    for n in 0..8 {
        ids.push(harness.enqueue(n).await);
    }
    harness.start();

    let mut peak = 0;
    for _ in 0..40 {
        let mut processing = 0;
        for id in &ids {
            if harness.status.get_status(*id).await.unwrap().status == JobStatus::Processing {
                processing += 1;
            }
        }
        assert!(processing <= 2, "{processing} jobs processing at once");
        peak = peak.max(processing);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    harness.stop().await;

    assert_eq!(peak, 2);
    for id in ids {
        assert_eq!(
            harness.status.get_status(id).await.unwrap().status,
            JobStatus::Completed
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success_backs_off() {
    let analysis = FakeAnalysis::new(Duration::ZERO, 2);
    let mut harness = Harness::new(analysis.clone(), 3, settings());
    harness.start();

    let job_id = harness.enqueue(1).await;
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(30))
        .await
        .unwrap();
    harness.stop().await;

    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.result.is_some());

    let calls = analysis.call_times();
    assert_eq!(calls.len(), 3);
    let first_gap = calls[1] - calls[0];
    let second_gap = calls[2] - calls[1];
    assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1100));
    assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_mark_job_failed() {
    let analysis = FakeAnalysis::new(Duration::ZERO, 3);
    let mut harness = Harness::new(analysis.clone(), 3, settings());
    harness.start();

    let job_id = harness.enqueue(1).await;
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(30))
        .await
        .unwrap();
    harness.stop().await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.result, None);
    let error = view.error.unwrap();
    assert_eq!(error.attempt, 3);
    assert!(error.message.contains("503"));
    assert_eq!(analysis.call_times().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_job_expires_after_ttl() {
    let settings = QueueSettings {
        ttl: Duration::from_secs(60),
        ..QueueSettings::default()
    };
    let mut harness = Harness::new(FakeAnalysis::new(Duration::ZERO, 0), 3, settings);
    harness.start();

    let job_id = harness.enqueue(1).await;
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    harness.stop().await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(
        harness.status.get_status(job_id).await.unwrap().status,
        JobStatus::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_admits_in_fifo_order() {
    let mut harness = Harness::new(FakeAnalysis::new(Duration::from_millis(500), 0), 1, settings());
    let a = harness.enqueue(1).await;
    let b = harness.enqueue(2).await;
    harness.start();

    harness
        .status
        .wait_for_completion(b, Duration::from_secs(10))
        .await
        .unwrap();
    harness.stop().await;

    let a_done = harness.store.position(a, "completed").expect("A never completed");
    let b_started = harness.store.position(b, "processing").expect("B never started");
    assert!(a_done < b_started, "B started before A finished");
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_leaves_job_untouched() {
    let mut harness = Harness::new(FakeAnalysis::new(Duration::from_secs(5), 0), 1, settings());
    harness.start();

    let job_id = harness.enqueue(1).await;
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(view.status, JobStatus::Timeout);
    assert_eq!(
        harness.status.get_status(job_id).await.unwrap().status,
        JobStatus::Processing
    );
    assert!(!harness.store.history(job_id).iter().any(|s| s == "timeout"));

    // The job still finishes on its own.
    let view = harness
        .status
        .wait_for_completion(job_id, Duration::from_secs(10))
        .await
        .unwrap();
    harness.stop().await;
    assert_eq!(view.status, JobStatus::Completed);
}
