use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serialq_core::{
    Action, CancelToken, Cancelled, Failure, Priority, Queue, QueueAction, QueueConfig,
    ShutdownPolicy, WaitError,
};

const WAIT: Duration = Duration::from_secs(5);
const PRIORITIES: [Priority; 3] = [Priority::Low, Priority::Normal, Priority::High];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum FetchError {
    #[error("NotFound")]
    NotFound,
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

struct Fetch {
    fail: bool,
    absorb: bool,
}

impl QueueAction for Fetch {
    type Output = u32;
    type Error = FetchError;

    fn run(&mut self, _cancel: &CancelToken) -> Result<u32, FetchError> {
        if self.fail {
            Err(FetchError::NotFound)
        } else {
            Ok(42)
        }
    }

    fn failure_handler(&mut self, failure: &Failure<FetchError>) -> bool {
        self.absorb && failure.as_declared() == Some(&FetchError::NotFound)
    }
}

fn paused(name: &str) -> Queue {
    Queue::with_config(QueueConfig {
        name: name.to_string(),
        start_paused: true,
        ..QueueConfig::default()
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn blocking_submit_returns_42_without_trace() {
    let queue = Queue::new("scenario-x").unwrap();
    assert!(!queue.is_debug());
    let x = Action::new(Fetch {
        fail: false,
        absorb: false,
    });
    assert_eq!(queue.add_and_wait(&x).unwrap(), 42);
    assert_eq!(x.result(), None, "blocking submit moves the result out");
    assert!(x.caller_backtrace().is_none());
    assert!(x.caller().is_some());
}

#[test]
fn not_found_reraised_then_absorbed_after_reset() {
    let queue = Queue::new("scenario-y").unwrap();
    let y = Action::new(Fetch {
        fail: true,
        absorb: false,
    });

    let err = queue.add_and_wait(&y).unwrap_err();
    assert_eq!(err.declared(), Some(&FetchError::NotFound));
    assert!(y.is_finished());

    y.reset().unwrap();
    y.with_work(|w| w.absorb = true);
    queue.add(&y).unwrap();
    assert!(y.wait_finished(WAIT));

    assert!(y.is_started());
    assert!(!y.has_failure());
    assert!(y.failure().is_none());
    queue.shutdown();
    assert_eq!(queue.stats().handled, 1);
}

#[test]
fn unhandled_fire_and_forget_failure_stays_visible() {
    let queue = Queue::new("visible").unwrap();
    let y = Action::new(Fetch {
        fail: true,
        absorb: false,
    });
    queue.add(&y).unwrap();
    assert!(y.wait_finished(WAIT));
    queue.shutdown();
    assert_eq!(
        y.failure().and_then(Failure::into_declared),
        Some(FetchError::NotFound)
    );
}

#[test]
fn reset_then_resubmit_behaves_like_new_action() {
    let queue = Queue::new("fresh").unwrap();
    let reused = Action::new(Fetch {
        fail: false,
        absorb: false,
    });
    assert_eq!(queue.add_and_wait(&reused).unwrap(), 42);
    reused.reset().unwrap();

    let brand_new = Action::new(Fetch {
        fail: false,
        absorb: false,
    });
    for a in [&reused, &brand_new] {
        assert!(!a.is_started());
        assert!(!a.is_finished());
        assert!(!a.is_killed());
        assert!(a.worker_thread().is_none());
    }
    assert_eq!(queue.add_and_wait(&reused).unwrap(), 42);
    assert_eq!(queue.add_and_wait(&brand_new).unwrap(), 42);
}

#[test]
fn debug_mode_captures_submitter_backtrace() {
    let queue = Queue::with_config(QueueConfig {
        name: "debugq".to_string(),
        debug: true,
        ..QueueConfig::default()
    })
    .unwrap();
    let action = Action::from_fn(|_: &CancelToken| Ok::<_, String>(()));
    queue.add_and_wait(&action).unwrap();
    assert!(action.caller_backtrace().is_some());
    let worker = action.worker_thread().unwrap();
    assert_eq!(worker.name(), Some("debugq"));
    assert_eq!(action.queue_name().as_deref(), Some("debugq"));
}

// ---------------------------------------------------------------------------
// Ordering under concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_producers_keep_priority_and_per_producer_fifo() {
    let queue = Arc::new(paused("producers"));
    let log: Arc<Mutex<Vec<(Priority, usize, usize)>>> = Arc::default();

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                let mut actions = Vec::new();
                for n in 0..25 {
                    let priority = PRIORITIES[n % 3];
                    let log = Arc::clone(&log);
                    let action = Action::from_fn(move |_: &CancelToken| {
                        log.lock().push((priority, producer, n));
                        Ok::<_, String>(())
                    });
                    queue.add_with_priority(&action, priority).unwrap();
                    actions.push(action);
                }
                actions
            })
        })
        .collect();
    let actions: Vec<_> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(queue.len(), 100);
    queue.resume();
    for a in &actions {
        assert!(a.wait_finished(WAIT));
    }

    let log = log.lock();
    assert_eq!(log.len(), 100);
    assert!(log.windows(2).all(|w| w[0].0 >= w[1].0), "priority order");
    for producer in 0..4 {
        for priority in PRIORITIES {
            let seq: Vec<usize> = log
                .iter()
                .filter(|(p, who, _)| *p == priority && *who == producer)
                .map(|(_, _, n)| *n)
                .collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]), "fifo within priority");
        }
    }
}

#[test]
fn only_one_action_runs_at_a_time() {
    let queue = Arc::new(Queue::new("serial").unwrap());
    let running = Arc::new(Mutex::new(0_u32));
    let overlaps = Arc::new(Mutex::new(0_u32));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                for _ in 0..10 {
                    let running = Arc::clone(&running);
                    let overlaps = Arc::clone(&overlaps);
                    let action = Action::from_fn(move |_: &CancelToken| {
                        {
                            let mut r = running.lock();
                            *r += 1;
                            if *r > 1 {
                                *overlaps.lock() += 1;
                            }
                        }
                        thread::sleep(Duration::from_micros(200));
                        *running.lock() -= 1;
                        Ok::<_, String>(())
                    });
                    queue.add_and_wait(&action).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*overlaps.lock(), 0);
    assert_eq!(queue.stats().executed, 80);
}

// ---------------------------------------------------------------------------
// Cancellation and shutdown
// ---------------------------------------------------------------------------

#[test]
fn kill_is_cooperative_for_running_action() {
    let queue = Queue::new("coop").unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let looping = Action::from_fn(move |cancel: &CancelToken| -> Result<(), FetchError> {
        let _ = started_tx.send(());
        loop {
            cancel.check()?;
            thread::sleep(Duration::from_millis(1));
        }
    });
    queue.add(&looping).unwrap();
    started_rx.recv_timeout(WAIT).unwrap();

    looping.kill();
    assert!(looping.is_killed());
    assert!(matches!(looping.wait(), Err(WaitError::Killed)));

    // The worker is free again once the work function noticed the token.
    let next = Action::from_fn(|_: &CancelToken| Ok::<_, String>("next"));
    assert_eq!(queue.add_and_wait(&next).unwrap(), "next");
}

#[test]
fn discard_shutdown_wakes_blocked_submitter() {
    let queue = Arc::new(Queue::with_config(QueueConfig {
        name: "discard".to_string(),
        shutdown: ShutdownPolicy::Discard,
        start_paused: true,
        ..QueueConfig::default()
    })
    .unwrap());

    let action = Action::from_fn(|_: &CancelToken| Ok::<_, String>(1));
    let submitter = {
        let queue = Arc::clone(&queue);
        let action = action.clone();
        thread::spawn(move || queue.add_and_wait(&action))
    };
    while queue.is_empty() {
        thread::yield_now();
    }
    queue.shutdown();

    let outcome = submitter.join().unwrap();
    assert!(matches!(outcome, Err(WaitError::Killed)));
    assert!(!action.is_started());
    assert_eq!(queue.stats().skipped, 1);
}

#[test]
fn drain_shutdown_runs_pending_even_when_paused() {
    let queue = paused("drain");
    let actions: Vec<_> = (0..5)
        .map(|i| Action::from_fn(move |_: &CancelToken| Ok::<_, String>(i)))
        .collect();
    for a in &actions {
        queue.add(a).unwrap();
    }
    drop(queue);
    let results: Vec<_> = actions.iter().map(|a| a.result().unwrap()).collect();
    assert_eq!(results, vec![0, 1, 2, 3, 4]);
}
