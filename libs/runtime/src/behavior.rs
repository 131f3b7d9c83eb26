//! Behaviors and the multi-cown acquisition protocol
//!
//! Each cown keeps an implicit FIFO queue of request slots, threaded through
//! the slots' `next` links, whose tail is the cown's `last` pointer. A
//! behavior naming `n` cowns:
//!
//! 1. sorts its requests by [`CownId`] so every behavior acquires in the same
//!    global order,
//! 2. swaps one slot into each cown's tail, linking itself behind the
//!    previous holder once that holder has finished publishing,
//! 3. counts down `n + 1` resolutions; the resolution that reaches zero
//!    submits the behavior to the run-queue.
//!
//! After the closure returns, each slot is released: the successor (if any)
//! gets one resolution. A successor that has swapped in but not linked yet
//! finds the [`released`] sentinel and resolves itself, so release never
//! waits on another thread.
//!
//! # Lock Ordering
//!
//! There are no locks on this path. The only wait is in [`BehaviorCore::enqueue`]
//! for a predecessor that is still publishing its own requests; that
//! predecessor only ever waits on cowns later in the canonical order, so the
//! wait chain is acyclic.

use crate::cown::{CownId, ErasedCown};
use crate::error::{Result, RuntimeError};
use crate::scheduler::Shared;

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::{hint, thread};
use tracing::{debug, trace};

static NEXT_BEHAVIOR_ID: AtomicU64 = AtomicU64::new(1);

/// Spins before yielding while a predecessor finishes publishing.
const SPIN_LIMIT: u32 = 64;

pub(crate) type Thunk = Box<dyn FnOnce() + Send>;

/// Lifecycle of a behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BehaviorState {
    Pending = 0,
    Acquiring = 1,
    Running = 2,
    Done = 3,
}

impl BehaviorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BehaviorState::Pending,
            1 => BehaviorState::Acquiring,
            2 => BehaviorState::Running,
            _ => BehaviorState::Done,
        }
    }
}

/// Marker stored in `Slot::next` once the slot's owner has released the cown.
fn released() -> *mut BehaviorCore {
    NonNull::dangling().as_ptr()
}

/// One behavior's place in one cown's queue
#[derive(Debug, Default)]
pub(crate) struct Slot {
    /// Successor behavior (an owned `Arc` in raw form), null, or `released()`.
    next: AtomicPtr<BehaviorCore>,
    /// Set once the owning behavior has enqueued on all of its cowns.
    published: AtomicBool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let next = *self.next.get_mut();
        if !next.is_null() && next != released() {
            // SAFETY: a linked successor that was never handed to a releaser.
            drop(unsafe { Arc::from_raw(next) });
        }
    }
}

struct Request {
    cown: Arc<dyn ErasedCown>,
    slot: Arc<Slot>,
}

impl Request {
    fn id(&self) -> CownId {
        self.cown.header().id()
    }
}

pub(crate) struct BehaviorCore {
    id: u64,
    /// Sorted by cown id.
    requests: Box<[Request]>,
    /// Resolutions still needed before the behavior may run.
    pending: AtomicUsize,
    state: AtomicU8,
    thunk: UnsafeCell<Option<Thunk>>,
    shared: Arc<Shared>,
}

// SAFETY: `thunk` is taken exactly once, by the worker that received the
// behavior from the run-queue; the pending counter guarantees a single
// submission. Every other field is immutable or atomic.
unsafe impl Send for BehaviorCore {}
unsafe impl Sync for BehaviorCore {}

impl fmt::Debug for BehaviorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorCore")
            .field("id", &self.id)
            .field("cowns", &self.cown_ids())
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("state", &self.state())
            .finish()
    }
}

/// Validate the request set, then run the acquisition protocol
pub(crate) fn schedule(cowns: Vec<Arc<dyn ErasedCown>>, thunk: Thunk) -> Result<()> {
    let shared = match cowns.first() {
        Some(first) => Arc::clone(&first.header().shared),
        None => return Err(RuntimeError::NoCowns),
    };

    if let Some(foreign) = cowns
        .iter()
        .find(|c| !Arc::ptr_eq(&c.header().shared, &shared))
    {
        return Err(RuntimeError::ForeignCown {
            cown: foreign.header().id(),
        });
    }

    let mut requests: Vec<Request> = cowns
        .into_iter()
        .map(|cown| Request {
            cown,
            slot: Arc::new(Slot::default()),
        })
        .collect();
    requests.sort_unstable_by_key(Request::id);

    if let Some(pair) = requests.windows(2).find(|w| w[0].id() == w[1].id()) {
        return Err(RuntimeError::DuplicateCown { cown: pair[0].id() });
    }

    shared.work_submitted()?;

    let behavior = BehaviorCore::new(shared, requests.into_boxed_slice(), thunk);
    behavior.acquire();
    Ok(())
}

impl BehaviorCore {
    fn new(shared: Arc<Shared>, requests: Box<[Request]>, thunk: Thunk) -> Arc<Self> {
        shared.ledger.behavior_allocated();
        Arc::new(Self {
            id: NEXT_BEHAVIOR_ID.fetch_add(1, Ordering::Relaxed),
            pending: AtomicUsize::new(requests.len() + 1),
            requests,
            state: AtomicU8::new(BehaviorState::Pending as u8),
            thunk: UnsafeCell::new(Some(thunk)),
            shared,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> BehaviorState {
        BehaviorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BehaviorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn cown_ids(&self) -> Vec<CownId> {
        self.requests.iter().map(Request::id).collect()
    }

    /// Publish on every cown in canonical order, then drop the extra resolution
    fn acquire(self: Arc<Self>) {
        self.set_state(BehaviorState::Acquiring);
        trace!(behavior = self.id, cowns = ?self.cown_ids(), "Enqueueing behavior");

        for request in self.requests.iter() {
            self.enqueue(request);
        }
        for request in self.requests.iter() {
            request.slot.published.store(true, Ordering::Release);
        }

        self.resolve();
    }

    fn enqueue(self: &Arc<Self>, request: &Request) {
        let header = request.cown.header();
        let mine = Arc::into_raw(Arc::clone(&request.slot)) as *mut Slot;
        let prev = header.last.swap(mine, Ordering::AcqRel);

        if prev.is_null() {
            Arc::clone(self).resolve();
            return;
        }

        // SAFETY: the tail owned one strong reference to `prev`; swapping the
        // tail out moved that reference to us.
        let prev = unsafe { Arc::from_raw(prev) };

        let mut spins = 0;
        while !prev.published.load(Ordering::Acquire) {
            if spins < SPIN_LIMIT {
                hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }

        let successor = Arc::into_raw(Arc::clone(self)) as *mut BehaviorCore;
        if prev
            .next
            .compare_exchange(ptr::null_mut(), successor, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Predecessor already released; the cown is ours.
            // SAFETY: `successor` was produced by `Arc::into_raw` above and not shared.
            let me = unsafe { Arc::from_raw(successor) };
            me.resolve();
        }
    }

    /// Count one acquired cown; the last resolution submits the behavior
    fn resolve(self: Arc<Self>) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            trace!(behavior = self.id, "Behavior runnable");
            self.shared
                .diagnostics
                .line(format_args!("behavior {} runnable", self.id));
            let shared = Arc::clone(&self.shared);
            shared.submit(self);
        }
    }

    /// Run the closure with every cown held, then release them.
    ///
    /// Returns the panic payload if the closure panicked; the cowns are
    /// released either way.
    pub(crate) fn run(self: Arc<Self>) -> std::result::Result<(), Box<dyn Any + Send>> {
        debug_assert_eq!(self.pending.load(Ordering::Acquire), 0);
        self.set_state(BehaviorState::Running);

        // SAFETY: only the worker that dequeued this behavior reaches here,
        // and it does so once.
        let thunk = unsafe { (*self.thunk.get()).take() };
        let outcome = match thunk {
            Some(thunk) => panic::catch_unwind(AssertUnwindSafe(thunk)),
            None => Ok(()),
        };

        self.release();
        self.set_state(BehaviorState::Done);
        debug!(behavior = self.id, panicked = outcome.is_err(), "Behavior completed");
        outcome
    }

    fn release(&self) {
        for request in self.requests.iter() {
            let header = request.cown.header();
            let slot = Arc::as_ptr(&request.slot) as *mut Slot;

            if request.slot.next.load(Ordering::Acquire).is_null()
                && header
                    .last
                    .compare_exchange(slot, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                // SAFETY: we removed the tail's strong reference to our slot.
                drop(unsafe { Arc::from_raw(slot) });
                continue;
            }

            let next = request.slot.next.swap(released(), Ordering::AcqRel);
            if !next.is_null() {
                // SAFETY: a linked successor is an owned `Arc` in raw form.
                let successor = unsafe { Arc::from_raw(next) };
                successor.resolve();
            }
        }
    }
}

impl Drop for BehaviorCore {
    fn drop(&mut self) {
        self.shared.ledger.behavior_freed();
    }
}
