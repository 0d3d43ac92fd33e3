//! The global change notifier.
//!
//! Couples the admin feed (discovery), the watch registry, the work queue
//! with its calculator thread, and the delivery pipeline into one facade:
//!
//! ```text
//! admin feed ──► register ──► commit callbacks ──► work queue
//!                  │                                  │
//!                  │ seed                             ▼ calculator thread
//!                  ▼                            change-sets per table
//!            delivery queue ◄───────────────────────┘
//!                  │  signal.notify()
//!                  ▼
//!            host event loop ──► Target::realm_changed
//! ```
//!
//! Ordering: within one watched file, notifications are delivered in
//! commit-version order (commit callbacks run under the coordinator's lock
//! in commit order, the work queue is FIFO with a single consumer, and the
//! delivery queue is FIFO drained by one loop). Across files no ordering is
//! guaranteed.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ripple_store::{
    ChangeTracker, Coordinator, Database, EventLoop, Signal, StoreConfig, VersionId,
};

use crate::admin::AdminFeed;
use crate::error::{NotifierError, Result};
use crate::notification::ChangeNotification;
use crate::worker::{Job, WorkQueue};

/// Host capability set.
///
/// `realm_changed` runs on the host event-loop thread; `filter_callback` and
/// `notifier_error` may run on whichever thread discovers or fails.
pub trait Target: Send + Sync {
    /// Admission filter: whether the named realm should be watched. The
    /// decision is final; a rejected name is never re-evaluated.
    fn filter_callback(&self, realm_name: &str) -> bool;

    /// Delivery of one change notification, in commit order per file.
    fn realm_changed(&self, notification: ChangeNotification);

    /// Diagnostic channel for errors that cannot be returned synchronously
    /// (admin-feed processing, dropped calculator jobs).
    fn notifier_error(&self, error: NotifierError) {
        warn!(%error, "notifier error");
    }
}

/// Construction parameters for [`GlobalNotifier`].
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Directory holding `admin.db` and the `realms/` subdirectory.
    pub local_root_dir: PathBuf,
    /// Base URL of the sync server.
    pub server_base_url: String,
    /// Access token presented for every file.
    pub access_token: String,
}

enum WatchEntry {
    /// Rejected by the admission filter; never re-evaluated.
    Filtered,
    /// Watched; the registry owns one coordinator reference per file.
    Watched(Arc<Coordinator>),
}

struct Shared {
    weak: Weak<Shared>,
    admin: AdminFeed,
    target: Box<dyn Target>,
    entries: Mutex<FxHashMap<String, WatchEntry>>,
    work: WorkQueue,
    deliveries: Mutex<VecDeque<ChangeNotification>>,
    paused: AtomicBool,
    signal: Signal,
}

impl Shared {
    /// Registers a discovered file. Idempotent per `id`.
    fn register_realm(&self, id: &str, name: &str) {
        let coordinator = {
            let mut entries = self.entries.lock();
            if entries.contains_key(id) {
                return;
            }
            if !self.target.filter_callback(name) {
                debug!(id, name, "realm rejected by filter");
                entries.insert(id.to_string(), WatchEntry::Filtered);
                return;
            }
            let config = self.admin.get_config(id, name);
            let coordinator = match Coordinator::for_config(&config) {
                Ok(coordinator) => coordinator,
                Err(error) => {
                    warn!(id, name, %error, "failed to open coordinator");
                    self.target.notifier_error(error.into());
                    return;
                }
            };
            entries.insert(id.to_string(), WatchEntry::Watched(Arc::clone(&coordinator)));
            coordinator
        };

        let config = coordinator.get_config();
        if let Err(error) = self.seed_registration(&config) {
            self.target.notifier_error(error);
        }

        // On every externally observed commit, pin a fresh handle at the old
        // version and hand the pair to the calculator. The callback runs on
        // the committing thread and does nothing heavier than taking the
        // work-queue lock.
        let weak = self.weak.clone();
        coordinator.set_transaction_callback(move |old_version, new_version| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match pinned_handle(&config, old_version) {
                Ok(database) => shared.work.push(Job {
                    database,
                    target_version: new_version,
                }),
                Err(error) => {
                    // File gone out-of-band or version pruned: drop the job.
                    warn!(%error, "commit callback could not pin handle; dropping");
                    shared.target.notifier_error(error.into());
                }
            }
        });
        info!(id, name, "watching realm");
    }

    /// Enqueues the bootstrap notification for a newly watched, non-empty
    /// file: `old` unset, `new` at the registration-time version, no
    /// change-sets.
    fn seed_registration(&self, config: &StoreConfig) -> Result<()> {
        let mut database = Database::open(config.clone())?;
        if database.read_group()?.is_empty() {
            return Ok(());
        }
        let version = database.current_version();
        self.enqueue(ChangeNotification::new(
            None,
            version,
            database,
            FxHashMap::default(),
        ));
        Ok(())
    }

    fn enqueue(&self, notification: ChangeNotification) {
        {
            self.deliveries.lock().push_back(notification);
        }
        // notify() is non-blocking, so no reentry through the host loop can
        // occur from here.
        self.signal.notify();
    }

    /// Calculator: computes one notification per job.
    fn process_job(&self, job: Job) -> Result<()> {
        let Job {
            mut database,
            target_version,
        } = job;
        let from = database.current_version();

        // Second uncached handle for the advance; `database` stays pinned at
        // `from` and is what the consumer receives as the old side.
        let mut fresh = Database::open(database.config().clone())?;
        fresh.begin_read(Some(from))?;
        let mut tracker = ChangeTracker::track_all();
        fresh.advance_read(target_version, &mut tracker)?;

        let mut changes: FxHashMap<String, ripple_store::ChangeSet> = FxHashMap::default();
        {
            let group = fresh.read_group()?;
            for (index, entry) in tracker.into_tables().into_iter().enumerate() {
                if entry.is_empty() {
                    continue;
                }
                // Reserved tables resolve to no object type and are skipped.
                if let Some(name) = group.object_type_at(index) {
                    changes.insert(name.to_string(), entry.finalize());
                }
            }
        }

        if changes.is_empty() && !database.read_group()?.is_empty() {
            // Nothing to notify about. An empty source group is the one
            // exception: "file has content at version X" matters to a fresh
            // subscriber.
            debug!(%from, %target_version, "empty change-set suppressed");
            return Ok(());
        }

        self.enqueue(ChangeNotification::new(
            Some(from),
            target_version,
            database,
            changes,
        ));
        Ok(())
    }

    /// Drains the delivery queue on the host loop thread.
    fn on_change(&self) {
        while !self.paused.load(Ordering::Acquire) {
            let next = {
                let mut queue = self.deliveries.lock();
                queue.pop_front()
            };
            let Some(notification) = next else {
                return;
            };
            self.target.realm_changed(notification);
        }
    }
}

fn pinned_handle(config: &StoreConfig, version: VersionId) -> ripple_store::Result<Database> {
    let mut database = Database::open(config.clone())?;
    database.begin_read(Some(version))?;
    Ok(database)
}

fn calculate(shared: &Arc<Shared>) {
    debug!("calculator thread started");
    while let Some(job) = shared.work.next() {
        if let Err(error) = shared.process_job(job) {
            warn!(%error, "change calculation failed; job dropped");
            shared.target.notifier_error(error);
        }
    }
    debug!("calculator thread exiting");
}

/// Watches a dynamic fleet of synchronized database files and dispatches
/// per-version change notifications on a host event loop.
pub struct GlobalNotifier {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl GlobalNotifier {
    /// Creates a notifier rooted at `config.local_root_dir`, dispatching to
    /// `target` on the [`EventLoop`]'s thread.
    ///
    /// # Errors
    ///
    /// Fatal: inability to create the realms directory or open the admin
    /// database.
    pub fn new(
        config: &NotifierConfig,
        target: Box<dyn Target>,
        event_loop: &EventLoop,
    ) -> Result<Self> {
        let admin = AdminFeed::new(
            &config.local_root_dir,
            &config.server_base_url,
            &config.access_token,
        )?;
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let signal = {
                let weak = weak.clone();
                event_loop.signal(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_change();
                    }
                })
            };
            Shared {
                weak: weak.clone(),
                admin,
                target,
                entries: Mutex::new(FxHashMap::default()),
                work: WorkQueue::new(),
                deliveries: Mutex::new(VecDeque::new()),
                paused: AtomicBool::new(false),
                signal,
            }
        });
        Ok(Self {
            shared,
            worker: None,
        })
    }

    /// Starts discovery and the calculator thread.
    ///
    /// Every admin entry already present is registered before this returns;
    /// later insertions register as they are committed. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates admin-observer installation and thread-spawn failures.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("ripple-calculator".into())
            .spawn(move || calculate(&shared))
            .map_err(ripple_store::StoreError::Io)?;
        self.worker = Some(handle);

        let weak = Arc::downgrade(&self.shared);
        self.shared.admin.start(move |id, name| {
            if let Some(shared) = weak.upgrade() {
                shared.register_realm(id, name);
            }
        })?;
        Ok(())
    }

    /// The admin feed (administrative surface: `create_realm`,
    /// `get_config`).
    #[must_use]
    pub fn admin(&self) -> &AdminFeed {
        &self.shared.admin
    }

    /// Whether the file with this admin id is being watched.
    #[must_use]
    pub fn is_watching(&self, id: &str) -> bool {
        matches!(
            self.shared.entries.lock().get(id),
            Some(WatchEntry::Watched(_))
        )
    }

    /// Suspends delivery. In-flight callbacks complete; queued
    /// notifications are held until [`GlobalNotifier::resume`].
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Resumes delivery and immediately drains on the calling thread, which
    /// must be the host loop thread.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.on_change();
    }

    /// Whether notifications are queued for delivery.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.shared.deliveries.lock().is_empty()
    }

    /// Number of notifications queued for delivery.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.deliveries.lock().len()
    }
}

impl Drop for GlobalNotifier {
    fn drop(&mut self) {
        self.shared.work.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("calculator thread panicked during shutdown");
            }
        }
        self.shared.admin.stop();
        // Pending deliveries are discarded with the queue.
        self.shared.deliveries.lock().clear();
    }
}

impl std::fmt::Debug for GlobalNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalNotifier")
            .field("watching", &self.shared.entries.lock().len())
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}
