/// Dispatch tests for the download queue
///
/// Tests cover:
/// - Concurrency limit (never exceeded, refilled as slots free up, lowered without preemption)
/// - Dispatch order (priority, then arrival)
/// - Global and per-item pause
/// - Group submission order and progress
/// - Duplicate and unsupported submissions
mod utils;

use dlqueue_lib::modules::downloads::{
    DownloadOptions, GroupOrder, JobStatus, ProxyConfig, ProxyMode,
};
use dlqueue_lib::shared::config::ModeDefaults;
use utils::{
    factories::{group, playlist, url},
    helpers::{build_queue, settle, wait_for_status, wait_until},
};

// ================================================================================================
// CONCURRENCY LIMIT
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn never_runs_more_than_the_limit() {
    let t = build_queue(2);

    let mut ids = Vec::new();
    for n in 0..4 {
        ids.push(t.queue.add(&url(n), DownloadOptions::default(), None).await.unwrap());
    }

    t.engine.wait_started(&url(0)).await;
    t.engine.wait_started(&url(1)).await;
    settle().await;

    let snapshot = t.queue.snapshot();
    assert_eq!(snapshot.active_count(), 2);
    assert_eq!(snapshot.pending_count(), 2);
    assert_eq!(t.engine.running(), 2);

    t.engine.succeed(&url(0));
    t.engine.wait_started(&url(2)).await;
    t.engine.succeed(&url(1));
    t.engine.wait_started(&url(3)).await;
    t.engine.succeed(&url(2));
    t.engine.succeed(&url(3));

    for id in ids {
        wait_for_status(&t.queue, id, JobStatus::Completed).await;
    }
    assert_eq!(t.engine.peak_concurrency(), 2);
    assert_eq!(t.engine.requests().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn raising_the_limit_dispatches_on_reschedule() {
    let t = build_queue(1);
    for n in 0..3 {
        t.queue.add(&url(n), DownloadOptions::default(), None).await;
    }
    t.engine.wait_started(&url(0)).await;
    settle().await;
    assert_eq!(t.engine.running(), 1);

    t.config.set_concurrency_limit(3);
    t.queue.reschedule().await;

    t.engine.wait_started(&url(1)).await;
    t.engine.wait_started(&url(2)).await;
    assert_eq!(t.queue.snapshot().active_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn lowering_the_limit_never_preempts() {
    let t = build_queue(3);
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(t.queue.add(&url(n), DownloadOptions::default(), None).await.unwrap());
    }
    for n in 0..3 {
        t.engine.wait_started(&url(n)).await;
    }

    t.config.set_concurrency_limit(1);
    t.queue.reschedule().await;
    let waiting = t.queue.add(&url(3), DownloadOptions::default(), None).await.unwrap();
    settle().await;

    assert_eq!(t.engine.running(), 3);
    assert_eq!(t.queue.snapshot().active_count(), 3);
    assert!(t.engine.cancelled().is_empty());

    // Two finish: one job still holds the only slot
    t.engine.succeed(&url(0));
    t.engine.succeed(&url(1));
    wait_for_status(&t.queue, ids[0], JobStatus::Completed).await;
    wait_for_status(&t.queue, ids[1], JobStatus::Completed).await;
    settle().await;

    assert!(!t.engine.is_running(&url(3)));
    assert_eq!(t.queue.get(&waiting).unwrap().status, JobStatus::Pending);
    assert_eq!(t.engine.requests().len(), 3);

    // Active drops to zero, below the new limit
    t.engine.succeed(&url(2));
    t.engine.wait_started(&url(3)).await;
    assert_eq!(t.queue.snapshot().active_count(), 1);
    assert_eq!(t.engine.peak_concurrency(), 3);
}

#[tokio::test(start_paused = true)]
async fn processing_jobs_hold_their_slot() {
    let t = build_queue(1);
    let first = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.queue.add(&url(1), DownloadOptions::default(), None).await;
    t.engine.wait_started(&url(0)).await;

    t.engine.emit(&url(0), "[Merger] Merging formats into \"/d/clip.mp4\"");
    wait_for_status(&t.queue, first, JobStatus::Processing).await;
    settle().await;

    assert!(!t.engine.is_running(&url(1)));
    assert_eq!(t.queue.snapshot().pending_count(), 1);
}

// ================================================================================================
// DISPATCH ORDER
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn dispatches_by_priority_then_arrival() {
    let t = build_queue(1);
    t.queue.pause().await;

    let a = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    let b = t.queue.add(&url(1), DownloadOptions::default(), None).await.unwrap();
    let c = t.queue.add(&url(2), DownloadOptions::default(), None).await.unwrap();
    t.queue.move_to_top(c).await.unwrap();
    t.queue.move_up(b).await.unwrap();
    t.queue.move_down(b).await.unwrap();

    assert_eq!(t.queue.get(&c).unwrap().priority, 1);
    assert_eq!(t.queue.get(&b).unwrap().priority, 0);

    t.queue.resume().await;
    t.engine.wait_started(&url(2)).await;
    t.engine.succeed(&url(2));
    t.engine.wait_started(&url(0)).await;
    t.engine.succeed(&url(0));
    t.engine.wait_started(&url(1)).await;

    assert_eq!(t.engine.started_urls(), vec![url(2), url(0), url(1)]);
    wait_for_status(&t.queue, a, JobStatus::Completed).await;
}

#[tokio::test(start_paused = true)]
async fn moving_an_unknown_job_is_a_no_op() {
    let t = build_queue(1);
    let missing = dlqueue_lib::modules::downloads::JobId::new();
    assert!(t.queue.move_up(missing).await.is_ok());
    assert!(t.queue.move_to_top(missing).await.is_ok());
    assert!(t.queue.snapshot().jobs.is_empty());
}

// ================================================================================================
// PAUSE
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn global_pause_lets_running_jobs_finish() {
    let t = build_queue(1);
    let a = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.engine.wait_started(&url(0)).await;

    t.queue.pause().await;
    let b = t.queue.add(&url(1), DownloadOptions::default(), None).await.unwrap();
    t.engine.succeed(&url(0));
    wait_for_status(&t.queue, a, JobStatus::Completed).await;
    settle().await;

    assert!(t.queue.is_paused());
    assert_eq!(t.queue.get(&b).unwrap().status, JobStatus::Pending);
    assert_eq!(t.engine.requests().len(), 1);

    assert!(!t.queue.toggle_pause().await);
    t.engine.wait_started(&url(1)).await;
    assert!(t.sinks.ui_contains("Queue paused"));
    assert!(t.sinks.ui_contains("Queue resumed"));
}

#[tokio::test(start_paused = true)]
async fn paused_items_are_skipped_until_resumed() {
    let t = build_queue(1);
    t.queue.pause().await;
    let a = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.queue.add(&url(1), DownloadOptions::default(), None).await;

    t.queue.pause_item(a).await.unwrap();
    assert_eq!(t.queue.get(&a).unwrap().status, JobStatus::Paused);

    t.queue.resume().await;
    t.engine.wait_started(&url(1)).await;
    t.engine.succeed(&url(1));
    settle().await;
    assert!(!t.engine.is_running(&url(0)));

    t.queue.resume_item(a).await.unwrap();
    t.engine.wait_started(&url(0)).await;
}

#[tokio::test(start_paused = true)]
async fn pausing_a_running_job_does_nothing() {
    let t = build_queue(1);
    let a = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.engine.wait_started(&url(0)).await;

    t.queue.pause_item(a).await.unwrap();
    assert_eq!(t.queue.get(&a).unwrap().status, JobStatus::Downloading);
}

// ================================================================================================
// GROUPS
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn group_members_run_in_submission_order() {
    let t = build_queue(1);
    let entries = playlist(3);
    let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();

    let ids = t
        .queue
        .add_group(entries, group("pl"), DownloadOptions::default(), GroupOrder::Forward)
        .await;
    assert_eq!(ids.len(), 3);

    for u in &urls {
        t.engine.wait_started(u).await;
        t.engine.succeed(u);
    }
    for id in &ids {
        wait_for_status(&t.queue, *id, JobStatus::Completed).await;
    }

    assert_eq!(t.engine.started_urls(), urls);
    let progress = t.queue.get_group_progress("pl");
    assert_eq!((progress.completed, progress.failed, progress.total), (3, 0, 3));
    // Titles came with the entries, so no lookup ran
    assert_eq!(t.engine.metadata_calls(&urls[0]), 0);
}

#[tokio::test(start_paused = true)]
async fn reversed_group_keeps_index_matching_dispatch_order() {
    let t = build_queue(1);
    t.queue.pause().await;
    let entries = playlist(3);
    let last_url = entries[2].url.clone();

    let ids = t
        .queue
        .add_group(entries, group("rev"), DownloadOptions::default(), GroupOrder::Reverse)
        .await;

    let first = t.queue.get(&ids[0]).unwrap();
    assert_eq!(first.url, last_url);
    assert_eq!(first.group.as_ref().unwrap().index_in_group, Some(0));

    let views = t.queue.snapshot().groups();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].jobs[0].url, last_url);

    t.queue.resume().await;
    t.engine.wait_started(&last_url).await;
}

#[tokio::test(start_paused = true)]
async fn group_progress_counts_failures() {
    let t = build_queue(2);
    let entries = playlist(2);
    let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();
    let ids = t
        .queue
        .add_group(entries, group("mix"), DownloadOptions::default(), GroupOrder::Forward)
        .await;

    t.engine.wait_started(&urls[0]).await;
    t.engine.wait_started(&urls[1]).await;
    t.engine.succeed(&urls[0]);
    t.engine.finish(
        &urls[1],
        Err(dlqueue_lib::shared::errors::AppError::EngineError(
            "VIDEO_UNAVAILABLE: gone".to_string(),
        )),
    );
    wait_for_status(&t.queue, ids[0], JobStatus::Completed).await;
    wait_for_status(&t.queue, ids[1], JobStatus::Failed).await;

    let progress = t.queue.get_group_progress("mix");
    assert_eq!((progress.completed, progress.failed, progress.total), (1, 1, 2));
}

// ================================================================================================
// SUBMISSION GUARDS
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn duplicate_urls_are_rejected_while_in_flight() {
    let t = build_queue(1);
    let first = t.queue.add(&url(0), DownloadOptions::default(), None).await;
    assert!(first.is_some());

    let again = t.queue.add(&url(0), DownloadOptions::default(), None).await;
    assert!(again.is_none());
    assert!(t.sinks.ui_contains("Already in queue"));
    assert_eq!(t.queue.snapshot().jobs.len(), 1);

    t.engine.wait_started(&url(0)).await;
    t.engine.finish(
        &url(0),
        Err(dlqueue_lib::shared::errors::AppError::EngineError("boom".to_string())),
    );
    wait_for_status(&t.queue, first.unwrap(), JobStatus::Failed).await;

    // A failed job no longer blocks a fresh submission
    assert!(t.queue.add(&url(0), DownloadOptions::default(), None).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn missing_extractor_rejects_submissions() {
    let t = build_queue(1);
    t.engine.set_supported(false);

    assert!(t.queue.add(&url(0), DownloadOptions::default(), None).await.is_none());
    assert!(t
        .queue
        .add_group(playlist(2), group("g"), DownloadOptions::default(), GroupOrder::Forward)
        .await
        .is_empty());
    assert!(t.queue.snapshot().jobs.is_empty());
    assert!(t
        .sinks
        .ui_errors()
        .iter()
        .any(|e| e.contains("Media extractor is not installed")));
}

#[tokio::test(start_paused = true)]
async fn mode_defaults_fill_unset_quality() {
    let t = build_queue(1);
    let id = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();

    let job = t.queue.get(&id).unwrap();
    assert_eq!(job.options.video_quality.as_deref(), Some("max"));
    assert_eq!(job.options.audio_quality.as_deref(), Some("best"));

    t.engine.wait_started(&url(0)).await;
    assert_eq!(
        t.engine.requests()[0].options.video_quality.as_deref(),
        Some("max")
    );
}

#[tokio::test(start_paused = true)]
async fn configured_proxy_reaches_lookups_and_transfers() {
    let t = build_queue(1);
    let proxy = ProxyConfig {
        mode: ProxyMode::Custom,
        custom_url: Some("socks5://127.0.0.1:1080".to_string()),
        fallback: true,
    };
    t.config.set_mode_defaults(ModeDefaults {
        proxy: proxy.clone(),
        ..Default::default()
    });

    t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.engine.wait_started(&url(0)).await;
    settle().await;

    assert_eq!(t.engine.requests()[0].options.proxy.as_ref(), Some(&proxy));
    assert_eq!(t.engine.metadata_options()[0].proxy.as_ref(), Some(&proxy));

    // An explicit per-submission proxy is kept as given
    let direct = ProxyConfig {
        mode: ProxyMode::None,
        ..Default::default()
    };
    let id = t
        .queue
        .add(
            &url(1),
            DownloadOptions {
                proxy: Some(direct.clone()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(t.queue.get(&id).unwrap().options.proxy, Some(direct));
}

// ================================================================================================
// PROGRESS
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn displayed_progress_never_goes_backwards() {
    let t = build_queue(1);
    let id = t.queue.add(&url(0), DownloadOptions::default(), None).await.unwrap();
    t.engine.wait_started(&url(0)).await;

    t.engine.emit(&url(0), "50.0% 2.0MiB/s 00:05");
    wait_until(&t.queue, |s| s.get(&id).is_some_and(|j| j.progress == 45.0)).await;
    let job = t.queue.get(&id).unwrap();
    assert_eq!(job.speed, "2.0MiB/s");
    assert_eq!(job.eta, "00:05");

    // Second stream of a merge restarts at zero
    t.engine.emit(&url(0), "10.0% 2.0MiB/s 00:09");
    t.engine.emit(&url(0), "150% 2.0MiB/s 00:09");
    t.engine.emit(&url(0), "100% 2.0MiB/s 00:00");
    wait_for_status(&t.queue, id, JobStatus::Processing).await;

    let job = t.queue.get(&id).unwrap();
    assert_eq!(job.progress, 95.0);
    assert!(job.speed.is_empty());

    t.engine.emit(&url(0), "20.0% 1.0MiB/s 00:03");
    t.engine.succeed(&url(0));
    wait_for_status(&t.queue, id, JobStatus::Completed).await;
    assert_eq!(t.queue.get(&id).unwrap().progress, 100.0);
}
