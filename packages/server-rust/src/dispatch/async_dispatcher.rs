//! Background delivery of event records.
//!
//! Producers push records onto an [`EventStack`] and return immediately. A
//! single named thread, started lazily by the first push, drains the stack
//! and replays each record through a synchronous [`Dispatcher`]. The thread
//! sleeps with a timed park between drains and is unparked whenever a push
//! finds the stack empty.
//!
//! Lifecycle: `NotStarted -> Running -> Shutdown`, advanced only by
//! compare-and-swap or swap. Once `Shutdown` is observed, producers deliver
//! on their own thread, so records racing with shutdown are never lost.
//!
//! At most one thread delivers at a time. That thread holds the delivery
//! claim, which producers only ever try to take: a producer that loses the
//! race leaves its record on the stack for the current holder and returns
//! without waiting on anyone's observers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use reqprobe_core::{EventRecord, Operation};
use tracing::{debug, error};

use super::stack::EventStack;
use super::sync::Dispatcher;
use crate::config::ProbeConfig;
use crate::error::ProbeError;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const SHUTDOWN: u8 = 2;

/// Observable lifecycle state of an [`AsyncDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    NotStarted,
    Running,
    Shutdown,
}

impl DeliveryState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            NOT_STARTED => Self::NotStarted,
            RUNNING => Self::Running,
            _ => Self::Shutdown,
        }
    }
}

/// Exclusive right to deliver records.
///
/// The mutex only guards the flag; it is never held while observers run.
#[derive(Default)]
struct DeliveryClaim {
    busy: Mutex<bool>,
    idle: Condvar,
}

impl DeliveryClaim {
    fn try_claim(&self) -> Option<ClaimGuard<'_>> {
        let mut busy = self.busy.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(ClaimGuard(self))
    }

    /// Blocks until nobody holds the claim.
    fn wait_idle(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.idle.wait(&mut busy);
        }
    }
}

/// Releases the claim on drop, including during unwinding.
struct ClaimGuard<'a>(&'a DeliveryClaim);

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        *self.0.busy.lock() = false;
        self.0.idle.notify_all();
    }
}

struct Shared<O: Operation> {
    stack: EventStack<O>,
    state: AtomicU8,
    delegate: Arc<Dispatcher<O>>,
    claim: DeliveryClaim,
    drainer: OnceLock<Thread>,
    /// Guards thread start; holds the join handle while running.
    handle: Mutex<Option<JoinHandle<()>>>,
    park_interval: Duration,
    thread_name: String,
}

impl<O: Operation> Shared<O> {
    fn state(&self) -> DeliveryState {
        DeliveryState::from_raw(self.state.load(Ordering::SeqCst))
    }

    fn enqueue(self: &Arc<Self>) {
        match self.state() {
            DeliveryState::NotStarted => self.start(),
            DeliveryState::Running => self.wake(),
            DeliveryState::Shutdown => self.drain_and_deliver(),
        }
    }

    fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        match self
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => match self.spawn_drainer() {
                Ok(join) => {
                    let _ = self.drainer.set(join.thread().clone());
                    *handle = Some(join);
                    debug!(thread = %self.thread_name, "async delivery started");
                }
                Err(err) => {
                    self.state.store(SHUTDOWN, Ordering::SeqCst);
                    drop(handle);
                    error!(error = ?err, "async delivery unavailable; delivering on producer threads");
                    self.drain_and_deliver();
                }
            },
            Err(RUNNING) => {
                drop(handle);
                self.wake();
            }
            Err(_) => {
                drop(handle);
                self.drain_and_deliver();
            }
        }
    }

    fn spawn_drainer(self: &Arc<Self>) -> Result<JoinHandle<()>, ProbeError> {
        let shared = Arc::clone(self);
        thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.drain_loop())
            .map_err(|source| ProbeError::ThreadSpawn {
                name: self.thread_name.clone(),
                source,
            })
    }

    fn wake(&self) {
        if let Some(thread) = self.drainer.get() {
            thread.unpark();
            return;
        }
        // The starter publishes the thread before releasing the start lock.
        drop(self.handle.lock());
        match self.drainer.get() {
            Some(thread) => thread.unpark(),
            None => self.drain_and_deliver(),
        }
    }

    fn drain_loop(&self) {
        loop {
            self.drain_and_deliver();
            if self.state() == DeliveryState::Shutdown {
                break;
            }
            thread::park_timeout(self.park_interval);
        }
        self.flush();
        debug!(thread = %self.thread_name, "async delivery stopped");
    }

    /// Delivers everything queued so far, oldest first, if no other thread
    /// is already delivering. Never waits on another thread's observers.
    fn drain_and_deliver(&self) {
        while let Some(claim) = self.claim.try_claim() {
            let mut batch = VecDeque::new();
            while self.stack.drain_into(&mut batch) {
                while let Some(record) = batch.pop_front() {
                    self.delegate.dispatch(&record);
                }
            }
            drop(claim);
            // A push that lost the claim to us is still on the stack.
            if self.stack.is_empty() {
                break;
            }
        }
    }

    /// Returns once everything pushed before the call has been delivered,
    /// by this thread or by whichever thread held the claim.
    fn flush(&self) {
        loop {
            self.claim.wait_idle();
            self.drain_and_deliver();
            self.claim.wait_idle();
            if self.stack.is_empty() {
                return;
            }
        }
    }
}

/// Queues records for delivery on a dedicated background thread.
///
/// `push` never blocks once the thread is running. [`shutdown`](Self::shutdown)
/// stops the thread after a final drain; records pushed afterwards are
/// delivered on the pushing thread, or by the thread already delivering if
/// there is one. Dropping the dispatcher shuts it down.
pub struct AsyncDispatcher<O: Operation> {
    shared: Arc<Shared<O>>,
}

impl<O: Operation> AsyncDispatcher<O> {
    /// Wraps `delegate` with the default park interval and thread name.
    #[must_use]
    pub fn new(delegate: Arc<Dispatcher<O>>) -> Self {
        Self::with_config(delegate, &ProbeConfig::default())
    }

    #[must_use]
    pub fn with_config(delegate: Arc<Dispatcher<O>>, config: &ProbeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                stack: EventStack::new(),
                state: AtomicU8::new(NOT_STARTED),
                delegate,
                claim: DeliveryClaim::default(),
                drainer: OnceLock::new(),
                handle: Mutex::new(None),
                park_interval: config.park_interval,
                thread_name: config.thread_name.clone(),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> DeliveryState {
        self.shared.state()
    }

    /// The synchronous dispatcher records are replayed through.
    #[must_use]
    pub fn delegate(&self) -> &Arc<Dispatcher<O>> {
        &self.shared.delegate
    }

    /// Submits `record` for delivery.
    pub fn push(&self, record: EventRecord<O>) {
        let shutdown = self.shared.state() == DeliveryState::Shutdown;
        let was_empty = self.shared.stack.push(Arc::new(record));
        if shutdown {
            self.shared.drain_and_deliver();
        } else if was_empty {
            self.shared.enqueue();
        }
    }

    /// Stops the delivery thread after it drains what is queued.
    ///
    /// Blocks until the thread exits, unless called from the delivery thread
    /// itself. Returns `true` only for the call that stopped a running thread.
    pub fn shutdown(&self) -> bool {
        let shared = &self.shared;
        if shared.state.swap(SHUTDOWN, Ordering::SeqCst) != RUNNING {
            return false;
        }
        let Some(join) = shared.handle.lock().take() else {
            // Spawning failed after the state flipped; drain what raced in.
            shared.drain_and_deliver();
            return false;
        };
        if join.thread().id() == thread::current().id() {
            // The loop sees `Shutdown` once the current record is delivered.
            return true;
        }
        join.thread().unpark();
        if join.join().is_err() {
            error!(
                thread = %shared.thread_name,
                "delivery thread terminated abnormally; draining remaining records on caller"
            );
            shared.flush();
        }
        true
    }
}

impl<O: Operation> Drop for AsyncDispatcher<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
