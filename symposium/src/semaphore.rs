//! Counting semaphores, and a table built from one binary semaphore per resource.
//!
//! [SemaphoreTable] keeps no per-agent state.  Even agents take their left resource first; odd
//! agents take their right resource first.  If every agent took its left resource first, each
//! could end up holding one resource while waiting on its neighbor's, forever.  Inverting the
//! order for odd agents means two neighbors contend for the same resource first, so that cycle
//! never closes.  Nothing here is fair: a slow agent can lose every race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use biometrics::Counter;

use super::{check_agents, left_resource, right_resource, Error, ResourceTable, Strategy};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static SEMAPHORE_ACQUIRE: Counter = Counter::new("symposium.semaphore.acquire");
static SEMAPHORE_CONTENDED: Counter = Counter::new("symposium.semaphore.contended");
static SEMAPHORE_RELEASE: Counter = Counter::new("symposium.semaphore.release");
static SEMAPHORE_INTERRUPTED: Counter = Counter::new("symposium.semaphore.interrupted");
static TABLE_ACQUIRE: Counter = Counter::new("symposium.semaphore_table.acquire");
static TABLE_BACK_OUT: Counter = Counter::new("symposium.semaphore_table.back_out");
static TABLE_RELEASE: Counter = Counter::new("symposium.semaphore_table.release");

/// Register biometrics for semaphores and the semaphore table.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&SEMAPHORE_ACQUIRE);
    collector.register_counter(&SEMAPHORE_CONTENDED);
    collector.register_counter(&SEMAPHORE_RELEASE);
    collector.register_counter(&SEMAPHORE_INTERRUPTED);
    collector.register_counter(&TABLE_ACQUIRE);
    collector.register_counter(&TABLE_BACK_OUT);
    collector.register_counter(&TABLE_RELEASE);
}

///////////////////////////////////////////// Semaphore ////////////////////////////////////////////

/// A counting semaphore whose blocking acquire can be interrupted.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<u64>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits.
    pub fn new(permits: u64) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Create a semaphore with exactly one permit.
    pub fn binary() -> Self {
        Self::new(1)
    }

    /// The number of permits not currently held.
    pub fn permits(&self) -> u64 {
        *self.permits.lock().unwrap()
    }

    /// Take a permit if one is free, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        if *permits > 0 {
            SEMAPHORE_ACQUIRE.click();
            *permits -= 1;
            true
        } else {
            false
        }
    }

    /// Block until a permit is free and take it, unless `interrupted` is raised first.  Returns
    /// true iff the permit was taken.  A raised `interrupted` wins over a free permit.
    ///
    /// Whoever raises `interrupted` must call [Semaphore::wake_all] afterwards.
    pub fn acquire_unless(&self, interrupted: &AtomicBool) -> bool {
        let mut permits = self.permits.lock().unwrap();
        let mut contended = false;
        loop {
            if interrupted.load(Ordering::SeqCst) {
                SEMAPHORE_INTERRUPTED.click();
                return false;
            }
            if *permits > 0 {
                SEMAPHORE_ACQUIRE.click();
                *permits -= 1;
                return true;
            }
            if !contended {
                SEMAPHORE_CONTENDED.click();
                contended = true;
            }
            permits = self.available.wait(permits).unwrap();
        }
    }

    /// Return a permit.
    pub fn release(&self) {
        SEMAPHORE_RELEASE.click();
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.available.notify_one();
    }

    /// Wake every blocked acquirer so it re-checks its interrupt.
    pub fn wake_all(&self) {
        let _permits = self.permits.lock().unwrap();
        self.available.notify_all();
    }
}

////////////////////////////////////////// SemaphoreTable //////////////////////////////////////////

/// A [ResourceTable] with one binary [Semaphore] per resource and no other shared state.
#[derive(Debug)]
pub struct SemaphoreTable {
    resources: Vec<Semaphore>,
    interrupted: Vec<AtomicBool>,
}

impl SemaphoreTable {
    /// Lay out `agents` free resources.
    pub fn new(agents: usize) -> Result<Self, Error> {
        check_agents(agents)?;
        let resources = (0..agents).map(|_| Semaphore::binary()).collect();
        let interrupted = (0..agents).map(|_| AtomicBool::new(false)).collect();
        Ok(Self {
            resources,
            interrupted,
        })
    }

    /// The order in which `agent` takes its resources:  left first for even agents, right first
    /// for odd agents.
    pub fn acquisition_order(&self, agent: usize) -> (usize, usize) {
        let agents = self.resources.len();
        let left = left_resource(agent, agents);
        let right = right_resource(agent, agents);
        if agent % 2 == 0 {
            (left, right)
        } else {
            (right, left)
        }
    }

    /// For every resource, true iff nobody holds it.
    pub fn available(&self) -> Vec<bool> {
        self.resources.iter().map(|r| r.permits() > 0).collect()
    }

    fn cancel(&self, agent: usize) -> Error {
        self.interrupted[agent].store(false, Ordering::SeqCst);
        Error::interrupted(agent)
    }
}

impl ResourceTable for SemaphoreTable {
    fn agents(&self) -> usize {
        self.resources.len()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Semaphore
    }

    fn acquire(&self, agent: usize) -> Result<(), Error> {
        TABLE_ACQUIRE.click();
        let (first, second) = self.acquisition_order(agent);
        let interrupted = &self.interrupted[agent];
        if !self.resources[first].acquire_unless(interrupted) {
            return Err(self.cancel(agent));
        }
        if !self.resources[second].acquire_unless(interrupted) {
            TABLE_BACK_OUT.click();
            self.resources[first].release();
            return Err(self.cancel(agent));
        }
        Ok(())
    }

    fn release(&self, agent: usize) {
        TABLE_RELEASE.click();
        let agents = self.resources.len();
        self.resources[left_resource(agent, agents)].release();
        self.resources[right_resource(agent, agents)].release();
    }

    fn interrupt(&self, agent: usize) {
        let agents = self.resources.len();
        self.interrupted[agent].store(true, Ordering::SeqCst);
        self.resources[left_resource(agent, agents)].wake_all();
        self.resources[right_resource(agent, agents)].wake_all();
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
