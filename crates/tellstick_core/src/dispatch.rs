//! Callback dispatch strategies
//!
//! Events arrive on the native callback thread. The dispatch strategy decides
//! where the consumer callback actually runs: on that thread directly, on
//! whichever consumer thread drains a queue, or on an event loop the consumer
//! already owns. Exactly one strategy is active per library session.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// A ready-to-run event delivery (consumer callback plus decoded arguments).
pub type DispatchJob = Box<dyn FnOnce() + Send>;

/// Strategy for redelivering native events to consumer code.
///
/// `dispatch` is called from the native callback thread and must not block
/// it for longer than a queue insertion.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, job: DispatchJob);
}

/// Run a delivery, containing any panic from the consumer callback.
///
/// Failures never propagate into the native callback thread or corrupt a
/// dispatch loop; they are logged and discarded.
pub(crate) fn run_job(job: DispatchJob) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::warn!("event callback panicked; event discarded");
    }
}

/// Invokes the consumer callback synchronously on the native callback thread.
///
/// Cheapest strategy, but consumer callbacks must be thread-safe with
/// respect to their own state.
#[derive(Debug, Default)]
pub struct DirectDispatcher;

impl DirectDispatcher {
    pub fn new() -> Self {
        DirectDispatcher
    }
}

impl EventDispatcher for DirectDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        run_job(job);
    }
}

/// Queues events on a FIFO for delivery on whatever thread drains it.
///
/// The native callback thread only ever enqueues; events run when the
/// consumer calls one of the `process_*` methods, typically from its main
/// thread. Emission order is preserved.
pub struct QueuedDispatcher {
    tx: Sender<DispatchJob>,
    rx: Receiver<DispatchJob>,
}

impl QueuedDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Deliver one queued event.
    ///
    /// With `block` set this suspends the calling thread until an event
    /// arrives; there is no cancellation other than not calling it again.
    /// Without `block` it returns `false` immediately when the queue is
    /// empty.
    pub fn process_one(&self, block: bool) -> bool {
        let job = if block {
            self.rx.recv().ok()
        } else {
            self.rx.try_recv().ok()
        };
        match job {
            Some(job) => {
                run_job(job);
                true
            }
            None => false,
        }
    }

    /// Like `process_one(true)` but gives up after `timeout`.
    pub fn process_one_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                run_job(job);
                true
            }
            Err(_) => false,
        }
    }

    /// Deliver everything currently queued, returning the delivery count.
    pub fn process_all_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job);
            count += 1;
        }
        count
    }

    /// Number of undelivered events.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for QueuedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher for QueuedDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        // Receiver half lives in self, so send cannot fail.
        let _ = self.tx.send(job);
    }
}

/// Hands each event to a consumer-supplied scheduling primitive.
///
/// The primitive must arrange for the job to run on its single-threaded
/// event loop at the next opportunity, e.g. by posting to a `calloop`
/// channel or a winit event-loop proxy. The native callback thread is never
/// blocked on the loop itself.
pub struct EventLoopDispatcher {
    schedule: Box<dyn Fn(DispatchJob) + Send + Sync>,
}

impl EventLoopDispatcher {
    pub fn new(schedule: impl Fn(DispatchJob) + Send + Sync + 'static) -> Self {
        Self {
            schedule: Box::new(schedule),
        }
    }
}

impl EventDispatcher for EventLoopDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        // Panic containment is wrapped in before the job reaches the loop,
        // so a faulty callback cannot take the consumer's loop down.
        (self.schedule)(Box::new(move || run_job(job)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_direct_runs_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        DirectDispatcher::new().dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_preserves_order() {
        let dispatcher = QueuedDispatcher::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            dispatcher.dispatch(Box::new(move || order.lock().push(i)));
        }
        assert_eq!(dispatcher.pending(), 3);
        assert_eq!(dispatcher.process_all_pending(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(!dispatcher.process_one(false));
    }

    #[test]
    fn test_queued_blocking_wakes_on_event() {
        let dispatcher = Arc::new(QueuedDispatcher::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || dispatcher.process_one(true))
        };

        let c = counter.clone();
        dispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(consumer.join().unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_timeout_expires() {
        let dispatcher = QueuedDispatcher::new();
        assert!(!dispatcher.process_one_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_panicking_job_does_not_poison_queue() {
        let dispatcher = QueuedDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(Box::new(|| panic!("faulty callback")));
        let c = counter.clone();
        dispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(dispatcher.process_all_pending(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_loop_dispatcher_schedules() {
        let (tx, rx) = unbounded::<DispatchJob>();
        let dispatcher = EventLoopDispatcher::new(move |job| {
            let _ = tx.send(job);
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        dispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        // Nothing runs until the "loop" picks the job up.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        rx.recv().unwrap()();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
