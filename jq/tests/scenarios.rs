//! Integration tests for the job queue
//!
//! Every test runs on tokio's paused clock, so handler delays advance
//! virtual time and orderings are deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobqueue::{
    HandlerError, JobEvent, JobHandle, JobHandler, JobId, JobOptions, JobQueue, JobStatus, QueueConfig, QueueError,
    QueueHandle,
};
use tokio::sync::broadcast;

/// Shared, ordered record of what handlers did
#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Logs `{name-Start}`, waits (observing cancellation), then logs `{name-End}`
fn traced(trace: &Trace, name: &'static str, delay: Duration) -> impl JobHandler {
    let trace = trace.clone();
    move |job: JobHandle| {
        let trace = trace.clone();
        async move {
            trace.push(format!("{{{}-Start}}", name));
            job.sleep(delay).await?;
            trace.push(format!("{{{}-End}}", name));
            Ok::<(), HandlerError>(())
        }
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn spawn_queue() -> QueueHandle {
    JobQueue::spawn(QueueConfig::default())
}

/// Replays a notification stream and checks that no lane ever has two jobs running
fn assert_lanes_exclusive(events: &[JobEvent]) {
    let mut running: HashMap<JobId, bool> = HashMap::new();
    for event in events {
        if event.transient {
            continue;
        }
        let id = event.job.id();
        if event.status == JobStatus::Running {
            running.insert(id, event.job.out_of_band());
        } else if event.previous == Some(JobStatus::Running) {
            running.remove(&id);
        }

        let out_of_band = running.values().filter(|oob| **oob).count();
        let regular = running.len() - out_of_band;
        assert!(regular <= 1, "two regular jobs running at once: {:?}", event);
        assert!(out_of_band <= 1, "two out-of-band jobs running at once: {:?}", event);
    }
}

fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Ordering scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_regular_job() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let a = queue
        .queue_job("A", traced(&trace, "A", ms(20)), JobOptions::default())
        .await
        .unwrap();
    let outcome = a.completion().await.unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(trace.entries(), vec!["{A-Start}", "{A-End}"]);
}

#[tokio::test(start_paused = true)]
async fn test_regular_jobs_run_one_at_a_time() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let a = queue
        .queue_job("A", traced(&trace, "A", ms(20)), JobOptions::default())
        .await
        .unwrap();
    let b = queue
        .queue_job("B", traced(&trace, "B", ms(20)), JobOptions::default())
        .await
        .unwrap();
    assert_eq!(b.status(), JobStatus::Queued);

    a.completion().await.unwrap();
    b.completion().await.unwrap();

    assert_eq!(trace.entries(), vec!["{A-Start}", "{A-End}", "{B-Start}", "{B-End}"]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_band_job_overtakes_queued_regular_job() {
    let queue = spawn_queue();
    let trace = Trace::default();
    let mut rx = queue.subscribe();

    let a = queue
        .queue_job("A", traced(&trace, "A", ms(100)), JobOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(ms(1)).await;
    let b = queue
        .queue_job("B", traced(&trace, "B", ms(10)), JobOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(ms(1)).await;
    let c = queue
        .queue_job("C", traced(&trace, "C", ms(10)), JobOptions::out_of_band())
        .await
        .unwrap();

    // C runs beside A even though B was submitted first
    assert_eq!(c.status(), JobStatus::Running);
    assert_eq!(b.status(), JobStatus::Queued);

    for job in [&a, &b, &c] {
        assert!(job.completion().await.unwrap().is_success());
    }

    assert_eq!(
        trace.entries(),
        vec!["{A-Start}", "{C-Start}", "{C-End}", "{A-End}", "{B-Start}", "{B-End}"]
    );
    assert_lanes_exclusive(&drain(&mut rx));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_job_is_observed_after_it_starts() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let one = queue
        .queue_job("1", traced(&trace, "1", ms(50)), JobOptions::default())
        .await
        .unwrap();
    let two = queue
        .queue_job("2", traced(&trace, "2", ms(50)), JobOptions::default())
        .await
        .unwrap();
    let three = queue
        .queue_job("3", traced(&trace, "3", ms(50)), JobOptions::default())
        .await
        .unwrap();

    assert_eq!(two.status(), JobStatus::Queued);
    assert!(queue.cancel_job(&two).await.unwrap());
    // Raising the signal does not change status by itself
    assert_eq!(two.status(), JobStatus::Queued);

    assert_eq!(one.completion().await.unwrap().status, JobStatus::Succeeded);
    assert_eq!(two.completion().await.unwrap().status, JobStatus::Canceled);
    assert_eq!(three.completion().await.unwrap().status, JobStatus::Succeeded);

    assert_eq!(
        trace.entries(),
        vec!["{1-Start}", "{1-End}", "{2-Start}", "{3-Start}", "{3-End}"]
    );
}

// =============================================================================
// Retry and repeat
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_count_is_total_attempts() {
    let queue = spawn_queue();
    let trace = Trace::default();
    let mut rx = queue.subscribe();

    let handler = {
        let trace = trace.clone();
        move |_job: JobHandle| {
            let trace = trace.clone();
            async move {
                trace.push("{1-Start}");
                Err::<(), _>(HandlerError::failed("device unreachable"))
            }
        }
    };
    let job = queue
        .queue_job("1", handler, JobOptions::default().with_retry_count(5))
        .await
        .unwrap();

    let outcome = job.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.status_text, "Failed - Exception: device unreachable");
    assert_eq!(outcome.attempts, 5);
    assert_eq!(trace.entries(), vec!["{1-Start}"; 5]);
    assert_eq!(job.state().last_error.as_deref(), Some("device unreachable"));

    // Purged as terminal
    assert!(queue.jobs().await.unwrap().is_empty());

    // Four transient failures, each followed by the real requeue
    let events = drain(&mut rx);
    let transient = events.iter().filter(|e| e.transient).count();
    assert_eq!(transient, 4);
    for pair in events.windows(2).filter(|w| w[0].transient) {
        assert_eq!(pair[0].status, JobStatus::Failed);
        assert_eq!(pair[0].status_text, "device unreachable");
        assert_eq!(pair[1].previous, Some(JobStatus::Running));
        assert_eq!(pair[1].status, JobStatus::Queued);
    }
    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert!(!last.transient);
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_success() {
    let queue = spawn_queue();
    let attempts = Arc::new(AtomicU32::new(0));

    let handler = {
        let attempts = attempts.clone();
        move |_job: JobHandle| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(HandlerError::failed("not yet"));
                }
                Ok(())
            }
        }
    };
    let job = queue
        .queue_job("flaky", handler, JobOptions::default().with_retry_count(3))
        .await
        .unwrap();

    let outcome = job.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(job.retries_remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeating_job_runs_until_cancel_all() {
    let queue = spawn_queue();
    let trace = Trace::default();
    let counter = Arc::new(AtomicU32::new(0));

    let handler = {
        let trace = trace.clone();
        let counter = counter.clone();
        move |_job: JobHandle| {
            let trace = trace.clone();
            let counter = counter.clone();
            async move {
                trace.push(format!("{{1-{}}}", counter.fetch_add(1, Ordering::SeqCst)));
                Ok::<(), HandlerError>(())
            }
        }
    };
    let job = queue
        .queue_job("1", handler, JobOptions::default().repeat_every(ms(10)))
        .await
        .unwrap();

    tokio::time::sleep(ms(35)).await;
    assert_eq!(queue.jobs().await.unwrap(), vec![job.clone()]);
    // Held in its lane between repeats
    assert_eq!(job.status(), JobStatus::Running);

    assert_eq!(queue.cancel_all_jobs().await.unwrap(), 1);
    let outcome = job.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Canceled);
    assert!(queue.jobs().await.unwrap().is_empty());

    let entries = trace.entries();
    assert!(entries.len() >= 3, "expected several repeats, got {:?}", entries);
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry, &format!("{{1-{}}}", index));
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_repeating_job_requeues_until_canceled() {
    let queue = spawn_queue();
    let mut rx = queue.subscribe();
    let attempts = Arc::new(AtomicU32::new(0));

    let handler = {
        let attempts = attempts.clone();
        move |job: JobHandle| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                job.sleep(ms(5)).await?;
                Err::<(), _>(HandlerError::failed("still offline"))
            }
        }
    };
    let job = queue
        .queue_job("poll", handler, JobOptions::default().repeat_every(ms(1000)))
        .await
        .unwrap();

    // Failures skip the repeat delay and ignore the one-attempt budget
    tokio::time::sleep(ms(52)).await;
    assert!(attempts.load(Ordering::SeqCst) >= 5);
    assert_eq!(queue.jobs().await.unwrap(), vec![job.clone()]);
    let state = job.state();
    assert!(matches!(state.status, JobStatus::Queued | JobStatus::Running));
    assert_eq!(state.last_error.as_deref(), Some("still offline"));

    assert!(queue.cancel_job(&job).await.unwrap());
    let outcome = job.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Canceled);
    assert!(queue.jobs().await.unwrap().is_empty());

    let terminal_failures = drain(&mut rx)
        .into_iter()
        .filter(|e| e.status == JobStatus::Failed && !e.transient)
        .count();
    assert_eq!(terminal_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_count_repeating_job_keeps_repeating() {
    let queue = spawn_queue();
    let runs = Arc::new(AtomicU32::new(0));

    let handler = {
        let runs = runs.clone();
        move |_job: JobHandle| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }
    };
    let job = queue
        .queue_job(
            "tick",
            handler,
            JobOptions::default().with_retry_count(0).repeat_every(ms(10)),
        )
        .await
        .unwrap();

    tokio::time::sleep(ms(35)).await;
    assert!(runs.load(Ordering::SeqCst) >= 3);
    assert_eq!(job.status(), JobStatus::Running);

    queue.cancel_job(&job).await.unwrap();
    assert_eq!(job.completion().await.unwrap().status, JobStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_runs_beside_regular_work() {
    let queue = spawn_queue();
    let trace = Trace::default();
    let beats = Arc::new(AtomicU32::new(0));
    let mut rx = queue.subscribe();

    let heartbeat = {
        let beats = beats.clone();
        move |job: JobHandle| {
            let beats = beats.clone();
            async move {
                job.sleep(ms(2)).await?;
                beats.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }
    };
    let hb = queue
        .queue_job("heartbeat", heartbeat, JobOptions::out_of_band().repeat_every(ms(20)))
        .await
        .unwrap();

    let mut work = Vec::new();
    for name in ["upload", "install", "launch"] {
        work.push(
            queue
                .queue_job(name, traced(&trace, name, ms(30)), JobOptions::default())
                .await
                .unwrap(),
        );
    }
    for job in &work {
        assert!(job.completion().await.unwrap().is_success());
    }

    assert!(beats.load(Ordering::SeqCst) >= 3);
    assert_eq!(queue.jobs().await.unwrap(), vec![hb.clone()]);

    queue.cancel_job(&hb).await.unwrap();
    assert_eq!(hb.completion().await.unwrap().status, JobStatus::Canceled);
    assert_lanes_exclusive(&drain(&mut rx));
}

// =============================================================================
// Failure isolation, snapshots, shutdown
// =============================================================================

struct Panics;

#[async_trait::async_trait]
impl JobHandler for Panics {
    async fn run(&self, job: JobHandle) -> jobqueue::HandlerResult {
        job.sleep(ms(5)).await?;
        panic!("handler contract violated");
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_fails_alone() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let bad = queue
        .queue_job("bad", Panics, JobOptions::default().with_retry_count(3))
        .await
        .unwrap();
    let good = queue
        .queue_job("good", traced(&trace, "good", ms(5)), JobOptions::default())
        .await
        .unwrap();

    let outcome = bad.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.status_text, "Unknown Completion");
    assert_eq!(outcome.attempts, 1);
    assert!(good.completion().await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_is_oldest_first_and_never_terminal() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let mut submitted = Vec::new();
    for (name, options) in [
        ("r1", JobOptions::default()),
        ("o1", JobOptions::out_of_band()),
        ("r2", JobOptions::default()),
        ("o2", JobOptions::out_of_band()),
    ] {
        submitted.push(
            queue
                .queue_job(name, traced(&trace, name, ms(10)), options)
                .await
                .unwrap(),
        );
    }

    assert_eq!(queue.jobs().await.unwrap(), submitted);

    let first = submitted[0].clone();
    first.completion().await.unwrap();
    let remaining = queue.jobs().await.unwrap();
    assert!(!remaining.contains(&first));

    for job in &submitted {
        job.completion().await.unwrap();
    }
    assert!(queue.jobs().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_without_change_starts_nothing() {
    let queue = spawn_queue();
    let trace = Trace::default();

    queue
        .queue_job("A", traced(&trace, "A", ms(50)), JobOptions::default())
        .await
        .unwrap();
    let b = queue
        .queue_job("B", traced(&trace, "B", ms(50)), JobOptions::default())
        .await
        .unwrap();

    assert_eq!(queue.reschedule().await.unwrap(), None);
    assert_eq!(queue.reschedule().await.unwrap(), None);
    assert_eq!(b.status(), JobStatus::Queued);
    assert_eq!(trace.entries(), vec!["{A-Start}"]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_count_runs_once() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let handler = {
        let trace = trace.clone();
        move |_job: JobHandle| {
            let trace = trace.clone();
            async move {
                trace.push("{zero-Start}");
                Err::<(), _>(HandlerError::failed("no response"))
            }
        }
    };
    let job = queue
        .queue_job("zero", handler, JobOptions::default().with_retry_count(0))
        .await
        .unwrap();

    let outcome = job.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(trace.entries(), vec!["{zero-Start}"]);
    assert!(queue.jobs().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_job_state_can_be_watched() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let a = queue
        .queue_job("A", traced(&trace, "A", ms(20)), JobOptions::default())
        .await
        .unwrap();
    let b = queue
        .queue_job("B", traced(&trace, "B", ms(20)), JobOptions::default().with_retry_count(2))
        .await
        .unwrap();

    let mut state = b.watch();
    assert_eq!(state.borrow().status, JobStatus::Queued);
    assert_eq!(state.borrow().retries_remaining, 2);

    let running = state
        .wait_for(|s| s.status == JobStatus::Running)
        .await
        .unwrap()
        .clone();
    assert_eq!(running.attempts, 1);
    assert_eq!(running.retries_remaining, 1);
    assert_eq!(a.status(), JobStatus::Succeeded);

    b.completion().await.unwrap();
    assert_eq!(state.borrow().status, JobStatus::Succeeded);
    assert_eq!(state.borrow().status_text, "Succeeded");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_everything_and_closes() {
    let queue = spawn_queue();
    let trace = Trace::default();

    let running = queue
        .queue_job("running", traced(&trace, "running", ms(1000)), JobOptions::default())
        .await
        .unwrap();
    let queued = queue
        .queue_job("queued", traced(&trace, "queued", ms(1000)), JobOptions::default())
        .await
        .unwrap();

    queue.shutdown().await.unwrap();

    assert_eq!(running.completion().await.unwrap().status, JobStatus::Canceled);
    let outcome = queued.completion().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Canceled);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(trace.entries(), vec!["{running-Start}"]);

    assert!(queue.is_closed());
    let late = queue
        .queue_job("late", traced(&trace, "late", ms(1)), JobOptions::default())
        .await;
    assert!(matches!(late, Err(QueueError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_every_subscriber_sees_every_transition_in_order() {
    let queue = spawn_queue();
    let trace = Trace::default();
    let mut first = queue.subscribe();
    let mut second = queue.subscribe();

    let job = queue
        .queue_job("A", traced(&trace, "A", ms(5)), JobOptions::default())
        .await
        .unwrap();
    job.completion().await.unwrap();

    let transitions = |events: Vec<JobEvent>| {
        events
            .into_iter()
            .map(|e| (e.previous, e.status))
            .collect::<Vec<_>>()
    };
    let expected = vec![
        (None, JobStatus::Queued),
        (Some(JobStatus::Queued), JobStatus::Running),
        (Some(JobStatus::Running), JobStatus::Succeeded),
    ];
    assert_eq!(transitions(drain(&mut first)), expected);
    assert_eq!(transitions(drain(&mut second)), expected);
}
