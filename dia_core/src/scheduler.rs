//! Priority-augmented delayed-event scheduler.
//!
//! A single worker thread executes every periodic action in the system.
//! Events are ordered strictly by `(deadline, priority rank, insertion
//! sequence)`: at the same deadline `High` runs before `Normal` before
//! `Low`, and equal priorities run first-in first-out.
//!
//! ```text
//!  schedule_after ──► ┌──────────────────────────────┐   wake
//!  schedule_at    ──► │ BTreeMap<(deadline,rank,seq)>│ ◄──────── Condvar
//!  cancel         ──► └──────────────┬───────────────┘
//!                                    │ earliest due
//!                                    ▼
//!                          worker thread: run action
//! ```

use dia_common::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::core_services::ShutdownSignal;

/// Scheduled action. Arguments are captured by the closure.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Priority of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Runs first among events with the same deadline.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Runs last among events with the same deadline.
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Handle returned by the schedule calls, used to cancel an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

impl EventHandle {
    /// Insertion sequence number.
    pub fn id(&self) -> u64 {
        self.0
    }
}

type EventKey = (Instant, u8, u64);

enum EventKind {
    Run(Action),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct Queue {
    events: BTreeMap<EventKey, EventKind>,
    index: HashMap<u64, EventKey>,
    next_seq: u64,
    state: WorkerState,
    worker_thread: Option<ThreadId>,
}

impl Queue {
    fn insert(&mut self, deadline: Instant, priority: Priority, kind: EventKind) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = (deadline, priority.rank(), seq);
        self.events.insert(key, kind);
        self.index.insert(seq, key);
        EventHandle(seq)
    }

    fn flush(&mut self) -> usize {
        let dropped = self
            .events
            .values()
            .filter(|kind| matches!(kind, EventKind::Run(_)))
            .count();
        self.events.clear();
        self.index.clear();
        dropped
    }
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
    shutdown: ShutdownSignal,
}

/// Single-queue delayed-event scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a stopped scheduler. Events may be queued before [`start`](Self::start).
    ///
    /// `shutdown` is signalled if the worker dies.
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    events: BTreeMap::new(),
                    index: HashMap::new(),
                    next_seq: 0,
                    state: WorkerState::Idle,
                    worker_thread: None,
                }),
                wake: Condvar::new(),
                shutdown,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Schedule `action` to run `delay_seconds` from now at `Normal` priority.
    ///
    /// # Errors
    /// Returns `CoreError::BadCallback` if the delay is negative, not
    /// finite or too large to express as a deadline, or the scheduler has
    /// been stopped.
    pub fn schedule_after<F>(&self, delay_seconds: f64, action: F) -> CoreResult<EventHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_after_with_priority(delay_seconds, Priority::Normal, action)
    }

    /// Schedule `action` to run `delay_seconds` from now at `priority`.
    ///
    /// # Errors
    /// See [`schedule_after`](Self::schedule_after).
    pub fn schedule_after_with_priority<F>(
        &self,
        delay_seconds: f64,
        priority: Priority,
        action: F,
    ) -> CoreResult<EventHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if !delay_seconds.is_finite() || delay_seconds < 0.0 {
            return Err(CoreError::BadCallback(format!(
                "delay must be a non-negative number of seconds, got {delay_seconds}"
            )));
        }
        let deadline = Duration::try_from_secs_f64(delay_seconds)
            .ok()
            .and_then(|delay| Instant::now().checked_add(delay))
            .ok_or_else(|| {
                CoreError::BadCallback(format!("delay of {delay_seconds} seconds is out of range"))
            })?;
        self.schedule_at(deadline, priority, action)
    }

    /// Schedule `action` at an absolute deadline.
    ///
    /// # Errors
    /// Returns `CoreError::BadCallback` if the scheduler has been stopped.
    pub fn schedule_at<F>(&self, deadline: Instant, priority: Priority, action: F) -> CoreResult<EventHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if matches!(queue.state, WorkerState::Stopping | WorkerState::Stopped) {
            return Err(CoreError::BadCallback(
                "scheduler is stopped; callback not accepted".to_string(),
            ));
        }
        let handle = queue.insert(deadline, priority, EventKind::Run(Box::new(action)));
        drop(queue);
        self.shared.wake.notify_one();
        Ok(handle)
    }

    /// Cancel a pending event.
    ///
    /// # Errors
    /// Returns `CoreError::NotFound` if the event already fired or was cancelled.
    pub fn cancel(&self, handle: EventHandle) -> CoreResult<()> {
        let mut queue = self.shared.queue.lock();
        let key = queue
            .index
            .remove(&handle.0)
            .ok_or(CoreError::NotFound(handle.0))?;
        queue.events.remove(&key);
        drop(queue);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Number of queued events.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().index.len()
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().state == WorkerState::Running
    }

    /// Start the worker. Calling `start` on a running scheduler does nothing.
    ///
    /// # Errors
    /// Returns `CoreError::Worker` if the thread cannot be spawned, or
    /// the scheduler was already stopped.
    pub fn start(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock();
        {
            let mut queue = self.shared.queue.lock();
            match queue.state {
                WorkerState::Running => return Ok(()),
                WorkerState::Stopping | WorkerState::Stopped => {
                    return Err(CoreError::Worker("scheduler cannot be restarted".to_string()));
                }
                WorkerState::Idle => queue.state = WorkerState::Running,
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("dia-scheduler".to_string())
            .spawn(move || worker_main(shared));
        match spawned {
            Ok(handle) => {
                self.shared.queue.lock().worker_thread = Some(handle.thread().id());
                *worker = Some(handle);
                info!("Scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shared.queue.lock().state = WorkerState::Idle;
                Err(CoreError::Worker(format!("failed to spawn scheduler worker: {e}")))
            }
        }
    }

    /// Stop the worker.
    ///
    /// Enqueues a high-priority stop event; the worker flushes the queue
    /// and exits. An action executing when `stop` is called completes,
    /// and no further actions run. Idempotent. When called from a
    /// scheduled action the worker is not joined.
    pub fn stop(&self) {
        let on_worker = {
            let mut queue = self.shared.queue.lock();
            match queue.state {
                WorkerState::Idle => {
                    let dropped = queue.flush();
                    queue.state = WorkerState::Stopped;
                    debug!("Scheduler stopped before start, dropped {} events", dropped);
                    return;
                }
                WorkerState::Stopped => return,
                WorkerState::Running => {
                    queue.state = WorkerState::Stopping;
                    queue.insert(Instant::now(), Priority::High, EventKind::Stop);
                }
                WorkerState::Stopping => {}
            }
            queue.worker_thread == Some(thread::current().id())
        };
        self.shared.wake.notify_all();

        if on_worker {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Scheduler worker panicked during stop");
            }
            info!("Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

fn worker_main(shared: Arc<Shared>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker_loop(&shared)));
    if outcome.is_err() {
        error!("Scheduler worker died; requesting shutdown");
        let mut queue = shared.queue.lock();
        queue.flush();
        queue.state = WorkerState::Stopped;
        drop(queue);
        shared.shutdown.request();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let Some(action) = next_action(shared) else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
            debug!("Scheduled action panicked");
        }
    }
}

/// Wait for the earliest due event. Returns `None` when the worker must exit.
fn next_action(shared: &Shared) -> Option<Action> {
    let mut queue = shared.queue.lock();
    loop {
        if queue.state == WorkerState::Stopping {
            let dropped = queue.flush();
            queue.state = WorkerState::Stopped;
            debug!("Scheduler worker exiting, dropped {} events", dropped);
            return None;
        }

        let next_deadline = queue.events.keys().next().map(|(deadline, _, _)| *deadline);
        match next_deadline {
            None => shared.wake.wait(&mut queue),
            Some(deadline) if deadline > Instant::now() => {
                shared.wake.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                if let Some(((_, _, seq), kind)) = queue.events.pop_first() {
                    queue.index.remove(&seq);
                    match kind {
                        EventKind::Run(action) => return Some(action),
                        EventKind::Stop => queue.state = WorkerState::Stopping,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn scheduler() -> Scheduler {
        Scheduler::new(ShutdownSignal::new())
    }

    #[test]
    fn test_zero_delay_fires() {
        let sched = scheduler();
        sched.start().unwrap();
        let (tx, rx) = mpsc::channel();
        sched.schedule_after(0.0, move || tx.send(1).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        sched.stop();
    }

    #[test]
    fn test_priority_then_fifo_at_same_deadline() {
        let sched = scheduler();
        let (tx, rx) = mpsc::channel();
        let deadline = Instant::now() + Duration::from_millis(50);
        for (label, priority) in [
            ("A", Priority::Normal),
            ("B", Priority::High),
            ("C", Priority::Normal),
            ("D", Priority::Low),
        ] {
            let tx = tx.clone();
            sched
                .schedule_at(deadline, priority, move || tx.send(label).unwrap())
                .unwrap();
        }
        sched.start().unwrap();
        let order: Vec<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, vec!["B", "A", "C", "D"]);
        sched.stop();
    }

    #[test]
    fn test_earlier_insert_wakes_worker() {
        let sched = scheduler();
        sched.start().unwrap();
        let (tx, rx) = mpsc::channel();
        let late = tx.clone();
        sched.schedule_after(30.0, move || late.send("late").unwrap()).unwrap();
        sched.schedule_after(0.01, move || tx.send("early").unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "early");
        sched.stop();
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_cancel_twice_is_not_found() {
        let sched = scheduler();
        let handle = sched.schedule_after(10.0, || {}).unwrap();
        assert!(sched.cancel(handle).is_ok());
        assert!(matches!(sched.cancel(handle), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_cancel_after_fire_is_not_found() {
        let sched = scheduler();
        sched.start().unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = sched.schedule_after(0.0, move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(sched.cancel(handle), Err(CoreError::NotFound(_))));
        sched.stop();
    }

    #[test]
    fn test_bad_delay_rejected() {
        let sched = scheduler();
        assert!(matches!(
            sched.schedule_after(-1.0, || {}),
            Err(CoreError::BadCallback(_))
        ));
        assert!(matches!(
            sched.schedule_after(f64::NAN, || {}),
            Err(CoreError::BadCallback(_))
        ));
    }

    #[test]
    fn test_huge_delay_rejected() {
        let sched = scheduler();
        for delay in [1e19, 1e20, f64::MAX] {
            assert!(matches!(
                sched.schedule_after(delay, || {}),
                Err(CoreError::BadCallback(_))
            ));
        }
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_stop_during_action_runs_nothing_more() {
        let sched = Arc::new(scheduler());
        sched.start().unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        let done = done_tx.clone();
        sched
            .schedule_after(0.0, move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                done.send("first").unwrap();
            })
            .unwrap();
        sched.schedule_after(0.0, move || done_tx.send("second").unwrap()).unwrap();

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let stopper = {
            let sched = Arc::clone(&sched);
            thread::spawn(move || sched.stop())
        };
        thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();
        stopper.join().unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(1)).unwrap(), "first");
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!sched.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_new_events() {
        let sched = scheduler();
        sched.start().unwrap();
        sched.stop();
        sched.stop();
        assert!(matches!(
            sched.schedule_after(0.0, || {}),
            Err(CoreError::BadCallback(_))
        ));
    }

    #[test]
    fn test_panicking_action_does_not_kill_worker() {
        let sched = scheduler();
        sched.start().unwrap();
        let (tx, rx) = mpsc::channel();
        sched.schedule_after(0.0, || panic!("boom")).unwrap();
        sched.schedule_after(0.0, move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
        assert!(sched.is_running());
        sched.stop();
    }

    #[test]
    fn test_stop_from_inside_action() {
        let sched = Arc::new(scheduler());
        sched.start().unwrap();
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&sched);
        sched
            .schedule_after(0.0, move || {
                inner.stop();
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sched.stop();
        assert!(!sched.is_running());
    }
}
