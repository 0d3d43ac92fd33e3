//! Cross-thread event-loop signalling.
//!
//! A [`Signal`] is an *enqueue-on-foreign-loop* primitive: any thread may
//! call [`Signal::notify`], and the bound callback runs on the thread that
//! drives the owning [`EventLoop`]. The contract is load-bearing for the
//! delivery pipeline:
//!
//! - `notify()` is non-blocking (the wakeup channel is unbounded),
//! - notifications coalesce (N notifies yield 1..N callback runs),
//! - `notify()` is safe to call while holding unrelated mutexes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashMap;
use parking_lot::Mutex;

struct SignalShared {
    id: u64,
    /// Set between `notify()` and the next dispatch; guards the wakeup
    /// channel against flooding (coalescing).
    pending: AtomicBool,
    detached: AtomicBool,
    tx: Mutex<Sender<u64>>,
}

struct Binding {
    shared: Arc<SignalShared>,
    callback: Box<dyn Fn()>,
}

/// A single-threaded host loop that runs signal callbacks.
///
/// The loop is owned and driven by one thread (the host thread); it is
/// intentionally not `Send`. Signals created from it may be notified from
/// any thread.
pub struct EventLoop {
    rx: Receiver<u64>,
    tx: Sender<u64>,
    bindings: RefCell<FxHashMap<u64, Rc<Binding>>>,
    next_id: Cell<u64>,
}

impl EventLoop {
    /// Creates an idle event loop.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            rx,
            tx,
            bindings: RefCell::new(FxHashMap::default()),
            next_id: Cell::new(0),
        }
    }

    /// Binds `callback` to this loop, returning the [`Signal`] that triggers
    /// it.
    ///
    /// The callback runs on the loop's thread during [`EventLoop::poll`] /
    /// [`EventLoop::wait`]. Dropping the returned signal detaches the
    /// binding.
    pub fn signal(&self, callback: impl Fn() + 'static) -> Signal {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let shared = Arc::new(SignalShared {
            id,
            pending: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            tx: Mutex::new(self.tx.clone()),
        });
        self.bindings.borrow_mut().insert(
            id,
            Rc::new(Binding {
                shared: Arc::clone(&shared),
                callback: Box::new(callback),
            }),
        );
        Signal { shared }
    }

    /// Runs callbacks for all wakeups received so far, without blocking.
    ///
    /// Returns the number of callback invocations.
    pub fn poll(&self) -> usize {
        let mut ran = 0;
        while let Ok(id) = self.rx.try_recv() {
            ran += self.dispatch(id);
        }
        ran
    }

    /// Blocks up to `timeout` for the first wakeup, then drains like
    /// [`EventLoop::poll`]. Returns the number of callback invocations.
    pub fn wait(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(id) => self.dispatch(id) + self.poll(),
            Err(_) => 0,
        }
    }

    fn dispatch(&self, id: u64) -> usize {
        let binding = self.bindings.borrow().get(&id).cloned();
        let Some(binding) = binding else { return 0 };
        if binding.shared.detached.load(Ordering::Acquire) {
            self.bindings.borrow_mut().remove(&id);
            return 0;
        }
        // Clear before running so notifies from inside the callback (or
        // racing with it) enqueue a fresh wakeup.
        binding.shared.pending.store(false, Ordering::Release);
        (binding.callback)();
        1
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("bindings", &self.bindings.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Thread-safe trigger for a callback bound to an [`EventLoop`].
pub struct Signal {
    shared: Arc<SignalShared>,
}

impl Signal {
    /// Requests a callback run on the host loop thread.
    ///
    /// Non-blocking and coalescing: if a wakeup is already pending, this is
    /// a no-op.
    pub fn notify(&self) {
        if self.shared.detached.load(Ordering::Acquire) {
            return;
        }
        if !self.shared.pending.swap(true, Ordering::AcqRel) {
            let _ = self.shared.tx.lock().send(self.shared.id);
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.shared.detached.store(true, Ordering::Release);
        // Wake the loop so it can prune the binding.
        let _ = self.shared.tx.lock().send(self.shared.id);
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_signal_runs_callback_on_poll() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let signal = {
            let runs = Arc::clone(&runs);
            event_loop.signal(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert_eq!(event_loop.poll(), 0);
        signal.notify();
        assert_eq!(event_loop.poll(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal_coalesces() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let signal = {
            let runs = Arc::clone(&runs);
            event_loop.signal(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        signal.notify();
        signal.notify();
        signal.notify();
        event_loop.poll();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // A new notify after dispatch triggers again.
        signal.notify();
        event_loop.poll();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_signal_notify_from_other_thread() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let signal = Arc::new({
            let runs = Arc::clone(&runs);
            event_loop.signal(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        });

        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            remote.notify();
        });
        handle.join().unwrap();

        assert!(event_loop.wait(Duration::from_secs(5)) >= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal_detaches_on_drop() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let signal = {
            let runs = Arc::clone(&runs);
            event_loop.signal(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        signal.notify();
        drop(signal);
        event_loop.poll();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_signal_notify_during_callback_requeues() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner: Arc<Mutex<Option<Arc<Signal>>>> = Arc::default();
        let signal = Arc::new({
            let runs = Arc::clone(&runs);
            let inner = Arc::clone(&inner);
            event_loop.signal(move || {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    if let Some(signal) = inner.lock().as_ref() {
                        signal.notify();
                    }
                }
            })
        });
        *inner.lock() = Some(Arc::clone(&signal));

        signal.notify();
        event_loop.poll();
        // First run re-notified, second run delivered by the same poll.
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        *inner.lock() = None;
    }

    #[test]
    fn test_event_loop_multiple_signals() {
        let event_loop = EventLoop::new();
        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));
        let a = {
            let a_runs = Arc::clone(&a_runs);
            event_loop.signal(move || {
                a_runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let b_runs = Arc::clone(&b_runs);
            event_loop.signal(move || {
                b_runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        a.notify();
        b.notify();
        event_loop.poll();
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    }
}
