//! Run a table:  one thread per agent, each cycling between thinking and eating.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use biometrics::{Counter, Moments};
use guacamole::{FromGuacamole, Guacamole};
use indicio::{clue, ALWAYS, ERROR, INFO};

use super::{
    new_table, Error, ResourceTable, Strategy, COLLECTOR, EAT_MILLIS, NUM_AGENTS, THINK_MILLIS,
};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static DINNER_START: Counter = Counter::new("symposium.dinner.start");
static DINNER_STOP: Counter = Counter::new("symposium.dinner.stop");
static SPAWN_FAILED: Counter = Counter::new("symposium.dinner.spawn_failed");
static MEAL: Counter = Counter::new("symposium.dinner.meal");
static DINER_INTERRUPTED: Counter = Counter::new("symposium.dinner.interrupted");
static DINER_PANICKED: Counter = Counter::new("symposium.dinner.panicked");
static HUNGRY_WAIT: Moments = Moments::new("symposium.dinner.hungry_wait_micros");

/// Register biometrics for the dinner driver.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&DINNER_START);
    collector.register_counter(&DINNER_STOP);
    collector.register_counter(&SPAWN_FAILED);
    collector.register_counter(&MEAL);
    collector.register_counter(&DINER_INTERRUPTED);
    collector.register_counter(&DINER_PANICKED);
    collector.register_moments(&HUNGRY_WAIT);
}

/////////////////////////////////////////// DinnerOptions //////////////////////////////////////////

/// Options for a [Dinner].
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "command_line", derive(arrrg_derive::CommandLine))]
pub struct DinnerOptions {
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Strategy:  monitor (1), semaphore (2), or fair-lock (3).")
    )]
    pub strategy: String,
    #[cfg_attr(feature = "command_line", arrrg(optional, "Number of agents at the table."))]
    pub agents: usize,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Upper bound on each think pause, in milliseconds.")
    )]
    pub think_millis: u64,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Upper bound on each eat pause, in milliseconds.")
    )]
    pub eat_millis: u64,
    #[cfg_attr(feature = "command_line", arrrg(optional, "Seed for the pause durations."))]
    pub seed: u64,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Meals each agent eats before leaving.  Zero means no limit.")
    )]
    pub meals: u64,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Seconds to run for.  Zero means until signalled.")
    )]
    pub duration_secs: u64,
    #[cfg_attr(feature = "command_line", arrrg(flag, "Do not print status lines."))]
    pub quiet: bool,
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Write biometrics to this file once per second.")
    )]
    pub metrics: String,
}

impl Default for DinnerOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default().to_string(),
            agents: NUM_AGENTS,
            think_millis: THINK_MILLIS,
            eat_millis: EAT_MILLIS,
            seed: 0,
            meals: 0,
            duration_secs: 0,
            quiet: false,
            metrics: String::new(),
        }
    }
}

///////////////////////////////////////////// DinerStats ///////////////////////////////////////////

/// What one agent did over the course of a [Dinner].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DinerStats {
    pub agent: usize,
    pub meals: u64,
    /// True iff the agent left while waiting for its resources.
    pub interrupted: bool,
    pub longest_wait: Duration,
    pub total_wait: Duration,
}

impl DinerStats {
    /// The average time spent hungry per meal.
    pub fn mean_wait(&self) -> Duration {
        if self.meals == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_wait.as_nanos() / self.meals as u128;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/////////////////////////////////////////////// Diner //////////////////////////////////////////////

// Counts a diner as gone however its thread ends, panics included.
struct Leaving(Arc<AtomicUsize>);

impl Drop for Leaving {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

struct Diner {
    agent: usize,
    table: Arc<dyn ResourceTable>,
    done: Arc<AtomicBool>,
    finished: Arc<AtomicUsize>,
    think_millis: u64,
    eat_millis: u64,
    meals: u64,
    guac: Guacamole,
}

impl Diner {
    fn run(mut self) -> DinerStats {
        let _leaving = Leaving(Arc::clone(&self.finished));
        let mut stats = DinerStats {
            agent: self.agent,
            ..DinerStats::default()
        };
        while !self.done.load(Ordering::Relaxed) && (self.meals == 0 || stats.meals < self.meals) {
            self.status("thinking");
            let think = self.pick(self.think_millis);
            if !self.pause(think) {
                break;
            }
            self.status("hungry");
            let hungry = Instant::now();
            if self.table.acquire(self.agent).is_err() {
                DINER_INTERRUPTED.click();
                stats.interrupted = true;
                break;
            }
            let waited = hungry.elapsed();
            HUNGRY_WAIT.add(waited.as_micros() as f64);
            stats.longest_wait = std::cmp::max(stats.longest_wait, waited);
            stats.total_wait += waited;
            self.status("eating");
            let eat = self.pick(self.eat_millis);
            let completed = self.pause(eat);
            self.table.release(self.agent);
            MEAL.click();
            stats.meals += 1;
            if !completed {
                break;
            }
        }
        stats
    }

    fn pick(&mut self, millis: u64) -> Duration {
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(u64::from_guacamole(&mut (), &mut self.guac) % millis)
    }

    // Returns false iff the dinner stopped before the pause elapsed.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.done.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::park_timeout(deadline - now);
        }
    }

    fn status(&self, what: &str) {
        clue!(COLLECTOR, INFO, {
            agent: self.agent as u64,
            status: what,
        });
    }
}

////////////////////////////////////////////// Dinner //////////////////////////////////////////////

/// A running table and the threads seated at it.
pub struct Dinner {
    table: Arc<dyn ResourceTable>,
    done: Arc<AtomicBool>,
    finished: Arc<AtomicUsize>,
    diners: Vec<JoinHandle<DinerStats>>,
}

impl Dinner {
    /// Build the table `options` describes and seat every agent at it.
    pub fn start(options: &DinnerOptions) -> Result<Self, Error> {
        let strategy = Strategy::select(&options.strategy);
        let table = new_table(strategy, options.agents)?;
        clue!(COLLECTOR, ALWAYS, {
            strategy: strategy.to_string(),
            description: strategy.description(),
            agents: options.agents as u64,
        });
        Self::with_table(table, options)
    }

    /// Seat one thread per agent at `table`.  `options.agents` and `options.strategy` are
    /// ignored in favor of the table's own.
    ///
    /// [Dinner::stop] interrupts every agent at `table`, and an interrupt sticks until an acquire
    /// observes it.  After the dinner, the next acquire of each agent at `table` may fail with
    /// [Error::Interrupted].
    pub fn with_table(table: Arc<dyn ResourceTable>, options: &DinnerOptions) -> Result<Self, Error> {
        DINNER_START.click();
        let agents = table.agents();
        let mut dinner = Self {
            table,
            done: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicUsize::new(0)),
            diners: Vec::with_capacity(agents),
        };
        for agent in 0..agents {
            let diner = Diner {
                agent,
                table: Arc::clone(&dinner.table),
                done: Arc::clone(&dinner.done),
                finished: Arc::clone(&dinner.finished),
                think_millis: options.think_millis,
                eat_millis: options.eat_millis,
                meals: options.meals,
                guac: Guacamole::new(
                    options
                        .seed
                        .wrapping_add((u64::MAX / agents as u64).wrapping_mul(agent as u64)),
                ),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("diner-{agent}"))
                .spawn(move || diner.run());
            match spawned {
                Ok(handle) => dinner.diners.push(handle),
                Err(err) => {
                    SPAWN_FAILED.click();
                    clue!(COLLECTOR, ERROR, {
                        spawn_failed: agent as u64,
                        error: err.to_string(),
                    });
                    dinner.stop();
                    dinner.join();
                    return Err(Error::Spawn {
                        agent,
                        what: err.to_string(),
                    });
                }
            }
        }
        Ok(dinner)
    }

    /// The table the diners are seated at.
    pub fn table(&self) -> &Arc<dyn ResourceTable> {
        &self.table
    }

    /// True iff every diner has left the table.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed) >= self.diners.len()
    }

    /// Ask every diner to leave.  Diners that are eating finish eating first.  Diners waiting for
    /// their resources give up.
    pub fn stop(&self) {
        DINNER_STOP.click();
        self.done.store(true, Ordering::Relaxed);
        for diner in self.diners.iter() {
            diner.thread().unpark();
        }
        for agent in 0..self.table.agents() {
            self.table.interrupt(agent);
        }
    }

    /// Wait for every diner to leave and return what each did, in agent order.  This does not
    /// call [Dinner::stop].
    pub fn join(mut self) -> Vec<DinerStats> {
        let mut stats = Vec::with_capacity(self.diners.len());
        for diner in std::mem::take(&mut self.diners).into_iter() {
            match diner.join() {
                Ok(s) => stats.push(s),
                Err(err) => std::panic::resume_unwind(err),
            }
        }
        stats
    }
}

impl Drop for Dinner {
    fn drop(&mut self) {
        if !self.diners.is_empty() {
            self.stop();
            for diner in std::mem::take(&mut self.diners).into_iter() {
                let name = diner.thread().name().unwrap_or("diner").to_string();
                if diner.join().is_err() {
                    DINER_PANICKED.click();
                    clue!(COLLECTOR, ERROR, {
                        diner_panicked: name,
                    });
                }
            }
        }
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
