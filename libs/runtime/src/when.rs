//! Behavior submission
//!
//! `when*` schedules a closure that runs once every named cown is held
//! exclusively. The closure receives one [`AcquiredCown`] per cown, in the
//! order the caller named them; acquisition itself always happens in
//! canonical [`CownId`](crate::CownId) order.
//!
//! Submission is asynchronous. A `when*` called from inside a behavior
//! queues behind the current holder and never runs inline.

use crate::behavior::{self, Thunk};
use crate::cown::{Cown, CownId};
use crate::error::Result;

use std::fmt;
use std::marker::PhantomData;
use std::ops;

/// Access to a cown's payload for the duration of one behavior
pub struct AcquiredCown<'a, T> {
    cown: &'a Cown<T>,
    marker: PhantomData<&'a mut T>,
}

impl<'a, T> AcquiredCown<'a, T> {
    fn new(cown: &'a Cown<T>) -> Self {
        Self {
            cown,
            marker: PhantomData,
        }
    }

    pub fn id(&self) -> CownId {
        self.cown.id()
    }

    /// A fresh owning handle to the acquired cown
    pub fn cown(&self) -> Cown<T> {
        self.cown.clone()
    }

    /// Alias of [`AcquiredCown::cown`]
    pub fn recover_handle(&self) -> Cown<T> {
        self.cown()
    }
}

impl<T> ops::Deref for AcquiredCown<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the acquisition protocol grants this behavior exclusive
        // access to the payload until its closure returns.
        unsafe { &*self.cown.data_ptr() }
    }
}

impl<T> ops::DerefMut for AcquiredCown<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as for `deref`; `&mut self` rules out aliasing through
        // this token.
        unsafe { &mut *self.cown.data_ptr() }
    }
}

impl<T: fmt::Debug> fmt::Debug for AcquiredCown<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for AcquiredCown<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// Run `f` once `cown` is held
pub fn when<T, F>(cown: &Cown<T>, f: F) -> Result<()>
where
    T: Send + 'static,
    F: for<'a> FnOnce(AcquiredCown<'a, T>) + Send + 'static,
{
    let held = cown.clone();
    let thunk: Thunk = Box::new(move || f(AcquiredCown::new(&held)));
    behavior::schedule(vec![cown.erased()], thunk)
}

/// Run `f` once both cowns are held
pub fn when2<A, B, F>(a: &Cown<A>, b: &Cown<B>, f: F) -> Result<()>
where
    A: Send + 'static,
    B: Send + 'static,
    F: for<'a, 'b> FnOnce(AcquiredCown<'a, A>, AcquiredCown<'b, B>) + Send + 'static,
{
    let (held_a, held_b) = (a.clone(), b.clone());
    let thunk: Thunk =
        Box::new(move || f(AcquiredCown::new(&held_a), AcquiredCown::new(&held_b)));
    behavior::schedule(vec![a.erased(), b.erased()], thunk)
}

/// Run `f` once all three cowns are held
pub fn when3<A, B, C, F>(a: &Cown<A>, b: &Cown<B>, c: &Cown<C>, f: F) -> Result<()>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: for<'a, 'b, 'c> FnOnce(AcquiredCown<'a, A>, AcquiredCown<'b, B>, AcquiredCown<'c, C>)
        + Send
        + 'static,
{
    let (held_a, held_b, held_c) = (a.clone(), b.clone(), c.clone());
    let thunk: Thunk = Box::new(move || {
        f(
            AcquiredCown::new(&held_a),
            AcquiredCown::new(&held_b),
            AcquiredCown::new(&held_c),
        )
    });
    behavior::schedule(vec![a.erased(), b.erased(), c.erased()], thunk)
}

/// Run `f` once every cown in `cowns` is held
pub fn when_all<T, F>(cowns: &[Cown<T>], f: F) -> Result<()>
where
    T: Send + 'static,
    F: for<'a> FnOnce(Vec<AcquiredCown<'a, T>>) + Send + 'static,
{
    let held: Vec<Cown<T>> = cowns.to_vec();
    let requests = cowns.iter().map(Cown::erased).collect();
    let thunk: Thunk = Box::new(move || f(held.iter().map(AcquiredCown::new).collect()));
    behavior::schedule(requests, thunk)
}
