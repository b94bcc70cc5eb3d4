//! A FIFO mutex and a condition variable that works with it.
//!
//! [FairMutex] hands out tickets in arrival order and serves them in that same order, so a thread
//! that releases the lock cannot barge back in ahead of threads already queued.  Unlike a spin
//! lock, queued threads sleep.
//!
//! [FairCondvar] atomically releases a [FairMutex] and sleeps until notified.  A woken thread
//! takes a fresh ticket to re-enter the mutex, so it queues behind everyone who arrived while it
//! slept.
//!
//! A guard is only shared across threads when the data it guards is itself `Sync`:
//!
//! ```compile_fail
//! fn assert_sync<T: Sync>() {}
//! assert_sync::<symposium::FairMutexGuard<'static, std::cell::Cell<u64>>>();
//! ```

use std::cell::UnsafeCell;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

use biometrics::Counter;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static LOCK: Counter = Counter::new("symposium.fair_mutex.lock");
static LOCK_CONTENDED: Counter = Counter::new("symposium.fair_mutex.lock_contended");
static CONDVAR_WAIT: Counter = Counter::new("symposium.fair_condvar.wait");
static CONDVAR_NOTIFY: Counter = Counter::new("symposium.fair_condvar.notify");
static CONDVAR_SPURIOUS: Counter = Counter::new("symposium.fair_condvar.spurious");

/// Register biometrics for the fair mutex and condition variable.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&LOCK);
    collector.register_counter(&LOCK_CONTENDED);
    collector.register_counter(&CONDVAR_WAIT);
    collector.register_counter(&CONDVAR_NOTIFY);
    collector.register_counter(&CONDVAR_SPURIOUS);
}

////////////////////////////////////////////// Tickets /////////////////////////////////////////////

#[derive(Debug, Default)]
struct Tickets {
    acquires: u64,
    releases: u64,
}

///////////////////////////////////////////// FairMutex ////////////////////////////////////////////

/// [FairMutex] grants the lock in the order threads asked for it.
pub struct FairMutex<T> {
    tickets: Mutex<Tickets>,
    turn: Condvar,
    data: UnsafeCell<T>,
}

impl<T> FairMutex<T> {
    /// Create a new [FairMutex] that protects a `T`.
    pub fn new(t: T) -> Self {
        Self {
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
            data: UnsafeCell::new(t),
        }
    }

    /// Lock until the guard is dropped.
    pub fn lock(&self) -> FairMutexGuard<'_, T> {
        LOCK.click();
        let mut tickets = self.tickets.lock().unwrap();
        let index = tickets.acquires;
        tickets.acquires += 1;
        if index > tickets.releases {
            LOCK_CONTENDED.click();
        }
        while index > tickets.releases {
            tickets = self.turn.wait(tickets).unwrap();
        }
        FairMutexGuard { lock: self, index }
    }

    /// Take the lock only if nobody holds it or is queued for it.
    pub fn try_lock(&self) -> Option<FairMutexGuard<'_, T>> {
        let mut tickets = self.tickets.lock().unwrap();
        if tickets.acquires != tickets.releases {
            return None;
        }
        LOCK.click();
        let index = tickets.acquires;
        tickets.acquires += 1;
        Some(FairMutexGuard { lock: self, index })
    }

    /// The number of threads holding or queued for the lock.  For debugging, not for logic.
    pub fn queue_len(&self) -> u64 {
        let tickets = self.tickets.lock().unwrap();
        tickets.acquires - tickets.releases
    }

    /// Consume the mutex and return its data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn unlock(&self, index: u64) {
        let mut tickets = self.tickets.lock().unwrap();
        assert_eq!(index, tickets.releases, "fair mutex released out of turn");
        tickets.releases = index + 1;
        self.turn.notify_all();
    }
}

impl<T: Default> Default for FairMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Debug for FairMutex<T> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(fmt, "FairMutex<{}>", std::any::type_name::<T>())
    }
}

unsafe impl<T: Send> Send for FairMutex<T> {}
unsafe impl<T: Send> Sync for FairMutex<T> {}

/////////////////////////////////////////// FairMutexGuard //////////////////////////////////////////

/// A guard on a held [FairMutex].
pub struct FairMutexGuard<'a, T> {
    lock: &'a FairMutex<T>,
    index: u64,
}

// Sharing a guard hands out `&T` on every thread that holds the reference.
unsafe impl<T: Sync> Sync for FairMutexGuard<'_, T> {}

impl<T> Drop for FairMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock(self.index);
    }
}

impl<T> Deref for FairMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY:  Only the thread whose ticket is being served holds a guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FairMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY:  Only the thread whose ticket is being served holds a guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

//////////////////////////////////////////// FairCondvar ///////////////////////////////////////////

/// A condition variable for a [FairMutex].
///
/// Notifications are not remembered:  a notify with no thread waiting does nothing.  Callers must
/// hold the associated [FairMutex] when they notify, and must re-check their predicate on wake.
#[derive(Debug, Default)]
pub struct FairCondvar {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl FairCondvar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically release `guard` and sleep until notified, then queue for the lock again.
    pub fn wait<'a, T>(&self, guard: FairMutexGuard<'a, T>) -> FairMutexGuard<'a, T> {
        CONDVAR_WAIT.click();
        let lock = guard.lock;
        let mut generation = self.generation.lock().unwrap();
        let seen = *generation;
        // The generation mutex is held across the unlock, so no notify can slip in between.
        drop(guard);
        generation = self.cond.wait(generation).unwrap();
        while *generation == seen {
            CONDVAR_SPURIOUS.click();
            generation = self.cond.wait(generation).unwrap();
        }
        drop(generation);
        lock.lock()
    }

    /// Wake every thread currently waiting.
    pub fn notify_all(&self) {
        CONDVAR_NOTIFY.click();
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        self.cond.notify_all();
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counter() {
        const THREADS: u64 = 4;
        const LOOPS: u64 = 10_000;
        let counter = Arc::new(FairMutex::new(0u64));
        let mut threads = Vec::new();
        for _ in 0..THREADS {
            let c = Arc::clone(&counter);
            threads.push(std::thread::spawn(move || {
                for _ in 0..LOOPS {
                    *c.lock() += 1;
                }
            }));
        }
        for thread in threads.into_iter() {
            thread.join().unwrap();
        }
        assert_eq!(THREADS * LOOPS, *counter.lock());
    }

    #[test]
    fn guard_is_sync_when_data_is() {
        fn assert_sync<T: Sync>() {}
        fn assert_send<T: Send>() {}
        assert_sync::<FairMutexGuard<'static, u64>>();
        assert_send::<FairMutexGuard<'static, std::cell::Cell<u64>>>();
        let mutex = FairMutex::new(5u64);
        let guard = mutex.lock();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| assert_eq!(5, *guard));
            }
        });
    }

    #[test]
    fn try_lock() {
        let mutex = FairMutex::new(());
        let guard = mutex.try_lock();
        assert!(guard.is_some());
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn served_in_arrival_order() {
        let order = Arc::new(FairMutex::new(Vec::new()));
        let guard = order.lock();
        let mut threads = Vec::new();
        for idx in 0..4u64 {
            let o = Arc::clone(&order);
            threads.push(std::thread::spawn(move || {
                o.lock().push(idx);
            }));
            // Wait for the thread to take its ticket before spawning the next.
            while order.queue_len() < idx + 2 {
                std::thread::yield_now();
            }
        }
        drop(guard);
        for thread in threads.into_iter() {
            thread.join().unwrap();
        }
        assert_eq!(vec![0, 1, 2, 3], *order.lock());
    }

    #[test]
    fn wait_notify() {
        let mutex = Arc::new(FairMutex::new(false));
        let cond = Arc::new(FairCondvar::new());
        let m = Arc::clone(&mutex);
        let c = Arc::clone(&cond);
        let waiter = std::thread::spawn(move || {
            let mut ready = m.lock();
            while !*ready {
                ready = c.wait(ready);
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut ready = mutex.lock();
        *ready = true;
        cond.notify_all();
        drop(ready);
        waiter.join().unwrap();
        assert_eq!(0, mutex.queue_len());
    }

    #[test]
    fn notify_without_waiter_is_dropped() {
        let mutex = FairMutex::new(0u64);
        let cond = FairCondvar::new();
        {
            let _guard = mutex.lock();
            cond.notify_all();
        }
        assert_eq!(0, mutex.queue_len());
    }
}
