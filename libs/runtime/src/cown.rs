//! Concurrent owners
//!
//! A [`Cown`] is a reference-counted cell whose payload can only be reached
//! from a behavior that currently holds it (see [`crate::when`]). Every cown
//! carries a [`CownId`] drawn from a process-wide creation sequence; that id
//! is the canonical order used when a behavior acquires several cowns.
//!
//! Pending behaviors keep their own counted reference, so dropping the last
//! caller handle while work is still queued defers destruction until that
//! work has released the cown.

use crate::behavior::Slot;
use crate::scheduler::{Scheduler, Shared};

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static NEXT_COWN_ID: AtomicU64 = AtomicU64::new(1);

/// Creation-sequence identity of a cown, total and stable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CownId(u64);

impl CownId {
    fn next() -> Self {
        Self(NEXT_COWN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CownId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cown-{}", self.0)
    }
}

/// Untyped part of every cown: identity, owning scheduler and queue tail.
pub(crate) struct CownHeader {
    id: CownId,
    /// Last request slot queued on this cown; holds one strong `Arc<Slot>`.
    pub(crate) last: AtomicPtr<Slot>,
    pub(crate) shared: Arc<Shared>,
}

impl CownHeader {
    fn new(shared: Arc<Shared>) -> Self {
        let id = CownId::next();
        shared.ledger.cown_allocated();
        shared.diagnostics.line(format_args!("{} alloc", id));
        trace!(cown = %id, "Cown allocated");
        Self {
            id,
            last: AtomicPtr::new(ptr::null_mut()),
            shared,
        }
    }

    pub(crate) fn id(&self) -> CownId {
        self.id
    }

    fn release_allocation(&self) {
        debug_assert!(
            self.last.load(Ordering::Acquire).is_null(),
            "{} destroyed with a non-empty queue",
            self.id
        );
        self.shared.ledger.cown_freed();
        self.shared.diagnostics.line(format_args!("{} dealloc", self.id));
        trace!(cown = %self.id, "Cown deallocated");
    }
}

/// Type-erased view used by the acquisition protocol
pub(crate) trait ErasedCown: Send + Sync {
    fn header(&self) -> &CownHeader;
}

type Destructor<T> = Box<dyn FnOnce(T) + Send>;

struct CownCell<T> {
    header: CownHeader,
    value: ManuallyDrop<UnsafeCell<T>>,
    destructor: Option<Destructor<T>>,
}

// SAFETY: the payload is only reached through `AcquiredCown`, which the
// acquisition protocol hands to one behavior at a time, or through
// `get_mut`/`try_unwrap`, which require the only reference. That is the same
// contract as `Mutex<T>`, so `T: Send` is sufficient for both.
unsafe impl<T: Send> Send for CownCell<T> {}
unsafe impl<T: Send> Sync for CownCell<T> {}

impl<T: Send + 'static> ErasedCown for CownCell<T> {
    fn header(&self) -> &CownHeader {
        &self.header
    }
}

impl<T> CownCell<T> {
    fn into_value(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped and each field is moved out once.
        let (value, header, destructor) = unsafe {
            (
                ManuallyDrop::take(&mut this.value).into_inner(),
                ptr::read(&this.header),
                ptr::read(&this.destructor),
            )
        };
        drop(destructor);
        header.release_allocation();
        value
    }
}

/// Releases the allocation even if the destructor panics.
struct ReleaseOnDrop<'a>(&'a CownHeader);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release_allocation();
    }
}

impl<T> Drop for CownCell<T> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and nothing reads `value` afterwards.
        let value = unsafe { ManuallyDrop::take(&mut self.value) }.into_inner();
        let destructor = self.destructor.take();
        let _release = ReleaseOnDrop(&self.header);
        match destructor {
            Some(destructor) => destructor(value),
            None => drop(value),
        }
    }
}

/// Owning handle to a cown
pub struct Cown<T> {
    inner: Arc<CownCell<T>>,
}

impl<T: Send + 'static> Cown<T> {
    /// Allocate a cown on `scheduler`; `T`'s drop glue is the destructor
    pub fn new(scheduler: &Scheduler, value: T) -> Self {
        Self::from_parts(scheduler, value, None)
    }

    /// Allocate a cown whose payload is handed to `destructor` on destruction
    pub fn with_destructor(
        scheduler: &Scheduler,
        value: T,
        destructor: impl FnOnce(T) + Send + 'static,
    ) -> Self {
        Self::from_parts(scheduler, value, Some(Box::new(destructor)))
    }

    fn from_parts(scheduler: &Scheduler, value: T, destructor: Option<Destructor<T>>) -> Self {
        Self {
            inner: Arc::new(CownCell {
                header: CownHeader::new(Arc::clone(scheduler.shared())),
                value: ManuallyDrop::new(UnsafeCell::new(value)),
                destructor,
            }),
        }
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedCown> {
        self.inner.clone()
    }

    /// Take the payload back if this is the only reference left
    pub fn try_unwrap(self) -> Result<T, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(cell) => Ok(cell.into_value()),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl<T> Cown<T> {
    pub fn id(&self) -> CownId {
        self.inner.header.id
    }

    /// The scheduler this cown was allocated on
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::from_shared(Arc::clone(&self.inner.header.shared))
    }

    /// Whether both handles refer to the same cown
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Owning handles plus pending behaviors referencing this cown
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Direct access when no other handle and no behavior references the cown
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.inner).map(|cell| cell.value.get_mut())
    }

    pub(crate) fn data_ptr(&self) -> *mut T {
        self.inner.value.get()
    }

    #[cfg(test)]
    pub(crate) fn header_is_idle(&self) -> bool {
        self.inner.header.last.load(Ordering::Acquire).is_null()
    }
}

impl<T> Clone for Cown<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Cown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cown")
            .field("id", &self.id())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl<T> fmt::Pointer for Cown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Arc::as_ptr(&self.inner), f)
    }
}
