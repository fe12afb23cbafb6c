//! Single-slot memoizing cell with concurrent recomputation.
//!
//! A [`CachedValue`] lazily computes one supplier result and serves it to
//! any number of threads. The slot moves between three states: invalid
//! (next `get` computes), computing (one thread holds the compute right,
//! concurrent getters park), and a concrete value. Invalidation that lands
//! mid-compute does not discard the in-flight result: parked getters still
//! receive it, and only once they have all returned does the slot fall
//! back to invalid.
//!
//! The state sentinels are per-instance `Arc` singletons compared by
//! pointer identity, so any concrete value of `T` is representable. The
//! waiter count and status flags could be bit-packed into one signal
//! word; they are kept as three separate atomics so every transition is
//! a single well-named store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, Thread};

use arc_swap::ArcSwap;


/// Waiting getters are released by this status.
const UNBLOCK_COMPUTE: u32 = 1;
/// The pending invalidator is released by this status.
const UNBLOCK_INVALIDATE: u32 = 2;

/// Ceiling on concurrently parked getters, inherited from the 29-bit
/// counter field of the packed-signal layout.
const GETTER_LIMIT: u32 = (1 << 29) - 1;

enum State<T> {
    Invalid,
    Computing,
    Ready(T),
}

struct Waiter {
    thread: Thread,
    invalidate: bool,
}

/// Memoizing cell for one supplier result.
pub struct CachedValue<T> {
    supplier: Box<dyn Fn() -> T + Send + Sync>,
    value: ArcSwap<State<T>>,
    invalid: Arc<State<T>>,
    computing: Arc<State<T>>,

    /// Count of getters parked on an in-flight computation.
    waiting_getters: AtomicU32,
    /// 0, UNBLOCK_COMPUTE or UNBLOCK_INVALIDATE; tells woken threads which
    /// phase of the release sequence is running.
    status: AtomicU32,
    /// True while an invalidation is pending behind a computation.
    invalidating: AtomicBool,

    /// Getters enqueue at the front, the invalidator at the back, so the
    /// release walk sees getters first. The mutex also covers every
    /// transition into or out of the computing state.
    waiters: Mutex<VecDeque<Waiter>>,
}

impl<T: Send + Sync + 'static> CachedValue<T> {
    /// Wrap a supplier. The supplier runs at most once per generation; a
    /// generation ends when the cell is invalidated.
    pub fn new(supplier: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let invalid: Arc<State<T>> = Arc::new(State::Invalid);
        CachedValue {
            supplier: Box::new(supplier),
            value: ArcSwap::new(Arc::clone(&invalid)),
            invalid,
            computing: Arc::new(State::Computing),
            waiting_getters: AtomicU32::new(0),
            status: AtomicU32::new(0),
            invalidating: AtomicBool::new(false),
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    fn lock_waiters(&self) -> MutexGuard<'_, VecDeque<Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity compare-and-exchange on the value slot; returns the prior
    /// state.
    fn exchange_value(&self, current: &Arc<State<T>>, new: Arc<State<T>>) -> Arc<State<T>> {
        let prior = self.value.compare_and_swap(current, new);
        Arc::clone(&prior)
    }

    /// Park until the value leaves the computing state and the status
    /// matches `token`. Parking tolerates spurious wakeups; the release
    /// sequence cannot finish until this thread has re-checked, so a
    /// consumed token is never lost.
    fn await_signal(&self, token: u32) -> Arc<State<T>> {
        loop {
            thread::park();
            let witness = self.value.load_full();
            if !Arc::ptr_eq(&witness, &self.computing)
                && self.status.load(Ordering::Acquire) == token
            {
                return witness;
            }
        }
    }

    /// Release every parked thread, getters before the invalidator.
    ///
    /// Called with the waiters mutex held, after the value slot has left
    /// the computing state. Spins on the counters rather than blocking:
    /// the threads being waited on only have to advance far enough to read
    /// the value from memory.
    fn unblock_waiters(&self, waiters: &mut VecDeque<Waiter>) {
        self.status.store(UNBLOCK_COMPUTE, Ordering::Release);

        let mut found_invalidate = false;
        for waiter in waiters.iter() {
            if !found_invalidate && waiter.invalidate {
                found_invalidate = true;

                // Every getter must observe the result before the
                // invalidator is allowed to wipe it.
                while self.waiting_getters.load(Ordering::Acquire) != 0 {
                    std::hint::spin_loop();
                }
                self.status.store(UNBLOCK_INVALIDATE, Ordering::Release);
            }

            waiter.thread.unpark();
        }

        if found_invalidate {
            while self.invalidating.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
        } else {
            while self.waiting_getters.load(Ordering::Acquire) != 0 {
                std::hint::spin_loop();
            }
        }

        self.status.store(0, Ordering::Release);
        waiters.clear();
    }

    /// Return the cached value, computing it if the slot is invalid.
    ///
    /// Exactly one thread computes per generation; concurrent getters park
    /// and receive the same result. A supplier panic reverts the slot to
    /// invalid, releases all waiters, and propagates.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        loop {
            let prior = self.exchange_value(&self.invalid, Arc::clone(&self.computing));

            if Arc::ptr_eq(&prior, &self.invalid) {
                // This thread holds the compute right; others will park.
                let guard = ComputeGuard { cell: self, armed: true };
                let computed = (self.supplier)();
                guard.disarm();

                let ready = Arc::new(State::Ready(computed));
                let mut waiters = self.lock_waiters();
                let observed = self.exchange_value(&self.computing, Arc::clone(&ready));

                if Arc::ptr_eq(&observed, &self.computing) {
                    self.unblock_waiters(&mut waiters);
                    drop(waiters);
                    match &*ready {
                        State::Ready(value) => return value.clone(),
                        _ => unreachable!(),
                    }
                }

                // A concurrent set overrode the computation; its value wins
                // and the setter already released the waiters.
                drop(waiters);
                if let State::Ready(value) = &*observed {
                    return value.clone();
                }
                continue;
            }

            if Arc::ptr_eq(&prior, &self.computing) {
                {
                    let mut waiters = self.lock_waiters();
                    let sample = self.value.load_full();

                    // Invalidated before we queued; start over.
                    if Arc::ptr_eq(&sample, &self.invalid) {
                        continue;
                    }
                    // Resolved before we queued; no need to wait.
                    if !Arc::ptr_eq(&sample, &self.computing) {
                        if let State::Ready(value) = &*sample {
                            return value.clone();
                        }
                        continue;
                    }

                    let observed = self.waiting_getters.fetch_add(1, Ordering::AcqRel);
                    if observed + 1 >= GETTER_LIMIT {
                        self.waiting_getters.fetch_sub(1, Ordering::AcqRel);
                        panic!("cached value getter count overflow");
                    }

                    waiters.push_front(Waiter {
                        thread: thread::current(),
                        invalidate: false,
                    });
                }

                let witness = self.await_signal(UNBLOCK_COMPUTE);
                self.waiting_getters.fetch_sub(1, Ordering::AcqRel);
                if let State::Ready(value) = &*witness {
                    return value.clone();
                }
                // The computation was torn down without a result; retry.
                continue;
            }

            if let State::Ready(value) = &*prior {
                return value.clone();
            }
        }
    }

    /// Forcibly set the cached value. When this lands mid-computation, any
    /// getters waiting on the result receive this value instead.
    pub fn set(&self, value: T) {
        let mut waiters = self.lock_waiters();
        let old = self.value.swap(Arc::new(State::Ready(value)));
        if Arc::ptr_eq(&old, &self.computing) {
            self.unblock_waiters(&mut waiters);
        }
    }

    /// Set the cached value only when the slot is invalid. Never changes
    /// the outcome of an in-flight computation, and needs no internal
    /// locking.
    pub fn set_if_invalid(&self, value: T) -> bool {
        let prior = self.exchange_value(&self.invalid, Arc::new(State::Ready(value)));
        Arc::ptr_eq(&prior, &self.invalid)
    }

    /// Invalidate the cached value so the next `get` recomputes.
    ///
    /// When a computation is in flight, getters already waiting on it
    /// still receive its result; this call blocks until they have, then
    /// drops the slot to invalid. Returns false when the slot was already
    /// invalid or another invalidation is pending.
    pub fn invalidate(&self) -> bool {
        {
            let mut waiters = self.lock_waiters();
            let witness = self.value.load_full();

            if Arc::ptr_eq(&witness, &self.invalid) {
                return false;
            }

            if !Arc::ptr_eq(&witness, &self.computing) {
                // Wait-free: no computation to coordinate with. The mutex
                // serializes us against every computing-state transition,
                // so this exchange cannot lose.
                let prior = self.exchange_value(&witness, Arc::clone(&self.invalid));
                debug_assert!(Arc::ptr_eq(&prior, &witness));
                return true;
            }

            if self.invalidating.swap(true, Ordering::AcqRel) {
                return false;
            }

            waiters.push_back(Waiter {
                thread: thread::current(),
                invalidate: true,
            });
        }

        self.await_signal(UNBLOCK_INVALIDATE);
        self.value.store(Arc::clone(&self.invalid));
        self.invalidating.store(false, Ordering::Release);
        true
    }

    /// True when no release sequence is running and no waiter is parked.
    /// The stress tests assert this after every quiescent point.
    #[cfg(test)]
    pub(crate) fn is_quiescent(&self) -> bool {
        self.status.load(Ordering::Acquire) == 0
            && self.waiting_getters.load(Ordering::Acquire) == 0
            && !self.invalidating.load(Ordering::Acquire)
            && self.lock_waiters().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_invalid(&self) -> bool {
        Arc::ptr_eq(&self.value.load_full(), &self.invalid)
    }
}

/// Reverts a panicking computation: the slot returns to invalid and every
/// waiter is released with no cached result. Woken getters retry, so one
/// of them takes over the next computation.
struct ComputeGuard<'a, T: Send + Sync + 'static> {
    cell: &'a CachedValue<T>,
    armed: bool,
}

impl<T: Send + Sync + 'static> ComputeGuard<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Send + Sync + 'static> Drop for ComputeGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut waiters = self.cell.lock_waiters();
        let prior = self
            .cell
            .exchange_value(&self.cell.computing, Arc::clone(&self.cell.invalid));
        if Arc::ptr_eq(&prior, &self.cell.computing) {
            self.cell.unblock_waiters(&mut waiters);
        }
    }
}
