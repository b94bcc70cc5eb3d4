//! symposium seats a fixed number of agents around a circular table.  Between every pair of
//! adjacent agents lies one exclusive resource, and an agent must hold both of its adjacent
//! resources before it may eat.  Three [ResourceTable] implementations solve the same problem with
//! different primitives:
//!
//! - [MonitorTable] tracks per-agent state under a single mutex and broadcasts on every release.
//! - [SemaphoreTable] keeps no state and acquires one binary [Semaphore] per resource, inverting
//!   the acquisition order for odd agents so that no cycle of waiters can form.
//! - [FairLockTable] tracks the same state as the monitor under a FIFO [FairMutex], but gives
//!   every agent its own [FairCondvar] and signals only the neighbors a release made eligible.
//!
//! No two adjacent agents are ever eating at the same time, regardless of the strategy.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use biometrics::Counter;
use indicio::{clue, ALWAYS, INFO};

pub mod dinner;
pub mod fair_lock;
pub mod fair_mutex;
pub mod monitor;
pub mod seating;
pub mod semaphore;

pub use fair_lock::FairLockTable;
pub use fair_mutex::{FairCondvar, FairMutex, FairMutexGuard};
pub use monitor::MonitorTable;
pub use seating::{AgentState, Seating};
pub use semaphore::{Semaphore, SemaphoreTable};

///////////////////////////////////////////// Constants ////////////////////////////////////////////

/// The number of agents seated when nobody says otherwise.
pub const NUM_AGENTS: usize = 5;
/// The fewest agents for which a cyclic table makes sense.
pub const MIN_AGENTS: usize = 2;
/// Upper bound on a single think pause, in milliseconds.
pub const THINK_MILLIS: u64 = 2_000;
/// Upper bound on a single eat pause, in milliseconds.
pub const EAT_MILLIS: u64 = 1_000;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static INTERRUPTED: Counter = Counter::new("symposium.interrupted");
static TOO_FEW_AGENTS: Counter = Counter::new("symposium.error.too_few_agents");
static UNKNOWN_STRATEGY: Counter = Counter::new("symposium.error.unknown_strategy");
static STRATEGY_FALLBACK: Counter = Counter::new("symposium.strategy.fallback");
static NEW_TABLE: Counter = Counter::new("symposium.new_table");

/// Register the biometrics of this crate and every module within it.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&INTERRUPTED);
    collector.register_counter(&TOO_FEW_AGENTS);
    collector.register_counter(&UNKNOWN_STRATEGY);
    collector.register_counter(&STRATEGY_FALLBACK);
    collector.register_counter(&NEW_TABLE);
    monitor::register_biometrics(collector);
    semaphore::register_biometrics(collector);
    fair_mutex::register_biometrics(collector);
    fair_lock::register_biometrics(collector);
    dinner::register_biometrics(collector);
}

////////////////////////////////////////////// indicio /////////////////////////////////////////////

pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/////////////////////////////////////////////// Error //////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The agent was interrupted before it could acquire its resources.  It holds nothing.
    Interrupted { agent: usize },
    /// A table needs at least [MIN_AGENTS] agents.
    TooFewAgents { agents: usize },
    /// The input names none of the strategies.
    UnknownStrategy { input: String },
    /// A worker thread could not be spawned.
    Spawn { agent: usize, what: String },
}

impl Error {
    pub(crate) fn interrupted(agent: usize) -> Self {
        INTERRUPTED.click();
        clue!(COLLECTOR, INFO, {
            interrupted: agent as u64,
        });
        Self::Interrupted { agent }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::Interrupted { agent } => write!(f, "agent {agent} was interrupted"),
            Error::TooFewAgents { agents } => {
                write!(f, "{agents} agents is too few; need at least {MIN_AGENTS}")
            }
            Error::UnknownStrategy { input } => write!(f, "unknown strategy {input:?}"),
            Error::Spawn { agent, what } => write!(f, "could not spawn agent {agent}: {what}"),
        }
    }
}

impl std::error::Error for Error {}

/// Check that `agents` is enough to seat a table.
pub fn check_agents(agents: usize) -> Result<(), Error> {
    if agents < MIN_AGENTS {
        TOO_FEW_AGENTS.click();
        return Err(Error::TooFewAgents { agents });
    }
    Ok(())
}

///////////////////////////////////////////// Strategy /////////////////////////////////////////////

/// The three ways to seat a table.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Strategy {
    Monitor,
    Semaphore,
    #[default]
    FairLock,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Monitor, Strategy::Semaphore, Strategy::FairLock];

    /// Pick the strategy named by `input`, falling back to the default when `input` is empty or
    /// names nothing we know.
    pub fn select(input: &str) -> Self {
        match input.parse::<Strategy>() {
            Ok(strategy) => strategy,
            Err(_) => {
                STRATEGY_FALLBACK.click();
                clue!(COLLECTOR, ALWAYS, {
                    invalid_strategy: input,
                    defaulting_to: Strategy::default().to_string(),
                });
                Strategy::default()
            }
        }
    }

    /// A human-readable description of the strategy.
    pub fn description(&self) -> &'static str {
        match self {
            Strategy::Monitor => "monitor solution with broadcast wake-up",
            Strategy::Semaphore => "semaphore-based solution",
            Strategy::FairLock => "fair lock with per-agent condition solution",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Strategy::Monitor => write!(f, "monitor"),
            Strategy::Semaphore => write!(f, "semaphore"),
            Strategy::FairLock => write!(f, "fair-lock"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "monitor" | "synchronized" => Ok(Strategy::Monitor),
            "2" | "semaphore" | "semaphores" => Ok(Strategy::Semaphore),
            "3" | "fair-lock" | "fair_lock" | "lock" | "reentrant-lock" => Ok(Strategy::FairLock),
            _ => {
                UNKNOWN_STRATEGY.click();
                Err(Error::UnknownStrategy {
                    input: s.to_string(),
                })
            }
        }
    }
}

/////////////////////////////////////////// ResourceTable //////////////////////////////////////////

/// A [ResourceTable] hands out the two resources adjacent to an agent.
///
/// Every call to [ResourceTable::release] must follow a successful [ResourceTable::acquire] for
/// the same agent.  Agent indices outside `0..agents()` panic.
pub trait ResourceTable: Send + Sync {
    /// The number of agents seated at the table.
    fn agents(&self) -> usize;
    /// The strategy this table implements.
    fn strategy(&self) -> Strategy;
    /// Block until `agent` holds both of its adjacent resources.
    ///
    /// Returns [Error::Interrupted] if [ResourceTable::interrupt] was called for `agent` before the
    /// resources were granted.  In that case the agent holds nothing and must not call release.
    fn acquire(&self, agent: usize) -> Result<(), Error>;
    /// Free both of `agent`'s resources and wake whoever may now proceed.
    fn release(&self, agent: usize);
    /// Interrupt `agent`.  The interrupt sticks until an acquire for `agent` observes it, so an
    /// interrupt delivered between two acquires cancels the second.
    fn interrupt(&self, agent: usize);
}

///////////////////////////////////////////// neighbors ////////////////////////////////////////////

/// The agent seated to the left of `agent`.
pub fn left_neighbor(agent: usize, agents: usize) -> usize {
    (agent + agents - 1) % agents
}

/// The agent seated to the right of `agent`.
pub fn right_neighbor(agent: usize, agents: usize) -> usize {
    (agent + 1) % agents
}

/// The resource to the left of `agent`.  It shares this resource with its left neighbor.
pub fn left_resource(agent: usize, _agents: usize) -> usize {
    agent
}

/// The resource to the right of `agent`.  It shares this resource with its right neighbor.
pub fn right_resource(agent: usize, agents: usize) -> usize {
    (agent + 1) % agents
}

///////////////////////////////////////////// new_table ////////////////////////////////////////////

/// Create a table of `agents` agents that implements `strategy`.
pub fn new_table(strategy: Strategy, agents: usize) -> Result<Arc<dyn ResourceTable>, Error> {
    NEW_TABLE.click();
    let table: Arc<dyn ResourceTable> = match strategy {
        Strategy::Monitor => Arc::new(MonitorTable::new(agents)?),
        Strategy::Semaphore => Arc::new(SemaphoreTable::new(agents)?),
        Strategy::FairLock => Arc::new(FairLockTable::new(agents)?),
    };
    Ok(table)
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
