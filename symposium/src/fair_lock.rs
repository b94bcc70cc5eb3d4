//! A table guarded by a [FairMutex] with one [FairCondvar] per agent.
//!
//! [FairLockTable] tracks the same [Seating] as [crate::MonitorTable], but waiting is targeted.
//! An agent that finds itself eligible on arrival eats without waiting.  Otherwise it sleeps on
//! its own channel.  On release, the releaser checks each neighbor, moves any neighbor that can
//! now eat straight to eating, and wakes that neighbor's channel alone.  Agents that are not
//! adjacent to the releaser never wake.

use biometrics::Counter;

use super::{
    check_agents, left_neighbor, right_neighbor, AgentState, Error, FairCondvar, FairMutex,
    ResourceTable, Seating, Strategy,
};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static ACQUIRE: Counter = Counter::new("symposium.fair_lock.acquire");
static ACQUIRE_IMMEDIATE: Counter = Counter::new("symposium.fair_lock.acquire_immediate");
static ACQUIRE_WAITED: Counter = Counter::new("symposium.fair_lock.acquire_waited");
static RELEASE: Counter = Counter::new("symposium.fair_lock.release");
static SIGNAL: Counter = Counter::new("symposium.fair_lock.signal");
static WAKEUP: Counter = Counter::new("symposium.fair_lock.wakeup");

/// Register biometrics for the fair-lock table.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&ACQUIRE);
    collector.register_counter(&ACQUIRE_IMMEDIATE);
    collector.register_counter(&ACQUIRE_WAITED);
    collector.register_counter(&RELEASE);
    collector.register_counter(&SIGNAL);
    collector.register_counter(&WAKEUP);
}

////////////////////////////////////////// FairLockState ///////////////////////////////////////////

#[derive(Debug)]
struct FairLockState {
    seating: Seating,
    interrupted: Vec<bool>,
    signals: Vec<u64>,
}

/////////////////////////////////////////// FairLockTable //////////////////////////////////////////

/// A [ResourceTable] that signals only the agents a release made eligible.
#[derive(Debug)]
pub struct FairLockTable {
    state: FairMutex<FairLockState>,
    channels: Vec<FairCondvar>,
}

impl FairLockTable {
    /// Seat `agents` agents, all thinking, each with its own wait channel.
    pub fn new(agents: usize) -> Result<Self, Error> {
        check_agents(agents)?;
        let state = FairLockState {
            seating: Seating::new(agents),
            interrupted: vec![false; agents],
            signals: vec![0; agents],
        };
        let channels = (0..agents).map(|_| FairCondvar::new()).collect();
        Ok(Self {
            state: FairMutex::new(state),
            channels,
        })
    }

    /// A snapshot of every agent's state.
    pub fn states(&self) -> Vec<AgentState> {
        let state = self.state.lock();
        state.seating.states().to_vec()
    }

    /// How many times a release granted `agent` its resources and signalled its channel.
    pub fn signals(&self, agent: usize) -> u64 {
        let state = self.state.lock();
        state.signals[agent]
    }

    // Call with the lock held.  Returns true iff `agent` was moved to eating.
    fn test(&self, state: &mut FairLockState, agent: usize) -> bool {
        if state.seating.can_eat(agent) {
            state.seating.eat(agent);
            true
        } else {
            false
        }
    }

    // Call with the lock held.
    fn grant(&self, state: &mut FairLockState, agent: usize) {
        if self.test(state, agent) {
            SIGNAL.click();
            state.signals[agent] += 1;
            self.channels[agent].notify_all();
        }
    }
}

impl ResourceTable for FairLockTable {
    fn agents(&self) -> usize {
        self.channels.len()
    }

    fn strategy(&self) -> Strategy {
        Strategy::FairLock
    }

    fn acquire(&self, agent: usize) -> Result<(), Error> {
        ACQUIRE.click();
        let mut state = self.state.lock();
        if std::mem::replace(&mut state.interrupted[agent], false) {
            return Err(Error::interrupted(agent));
        }
        state.seating.hunger(agent);
        if self.test(&mut state, agent) {
            ACQUIRE_IMMEDIATE.click();
            return Ok(());
        }
        ACQUIRE_WAITED.click();
        // A neighbor's release moves us to eating before it signals.
        while state.seating.state(agent) == AgentState::Hungry {
            state = self.channels[agent].wait(state);
            WAKEUP.click();
            if state.seating.state(agent) == AgentState::Hungry
                && std::mem::replace(&mut state.interrupted[agent], false)
            {
                state.seating.think(agent);
                return Err(Error::interrupted(agent));
            }
        }
        Ok(())
    }

    fn release(&self, agent: usize) {
        RELEASE.click();
        let agents = self.channels.len();
        let mut state = self.state.lock();
        assert_eq!(AgentState::Eating, state.seating.state(agent));
        state.seating.think(agent);
        self.grant(&mut state, left_neighbor(agent, agents));
        self.grant(&mut state, right_neighbor(agent, agents));
    }

    fn interrupt(&self, agent: usize) {
        let mut state = self.state.lock();
        state.interrupted[agent] = true;
        self.channels[agent].notify_all();
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn wait_until_hungry(table: &FairLockTable, agent: usize) {
        while table.states()[agent] != AgentState::Hungry {
            std::thread::yield_now();
        }
    }

    #[test]
    fn eligible_agent_does_not_wait() {
        let table = FairLockTable::new(5).unwrap();
        table.acquire(0).unwrap();
        table.acquire(2).unwrap();
        assert_eq!(
            vec![
                AgentState::Eating,
                AgentState::Thinking,
                AgentState::Eating,
                AgentState::Thinking,
                AgentState::Thinking,
            ],
            table.states()
        );
        table.release(0);
        table.release(2);
        assert_eq!(vec![AgentState::Thinking; 5], table.states());
        for agent in 0..5 {
            assert_eq!(0, table.signals(agent));
        }
    }

    #[test]
    fn release_grants_neighbor() {
        let table = Arc::new(FairLockTable::new(5).unwrap());
        table.acquire(1).unwrap();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.acquire(2));
        wait_until_hungry(&table, 2);
        table.release(1);
        // The grant happens under the releaser's lock, before the waiter runs.
        assert_eq!(AgentState::Eating, table.states()[2]);
        assert_eq!(1, table.signals(2));
        assert_eq!(Ok(()), waiter.join().unwrap());
        table.release(2);
    }

    #[test]
    fn release_skips_neighbor_blocked_elsewhere() {
        let table = Arc::new(FairLockTable::new(5).unwrap());
        table.acquire(1).unwrap();
        table.acquire(3).unwrap();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.acquire(2));
        wait_until_hungry(&table, 2);
        table.release(1);
        assert_eq!(AgentState::Hungry, table.states()[2]);
        assert_eq!(0, table.signals(2));
        table.release(3);
        assert_eq!(1, table.signals(2));
        assert_eq!(Ok(()), waiter.join().unwrap());
        table.release(2);
    }

    #[test]
    fn interrupt_while_waiting() {
        let table = Arc::new(FairLockTable::new(5).unwrap());
        table.acquire(4).unwrap();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.acquire(0));
        wait_until_hungry(&table, 0);
        table.interrupt(0);
        assert_eq!(Err(Error::Interrupted { agent: 0 }), waiter.join().unwrap());
        assert_eq!(AgentState::Thinking, table.states()[0]);
        table.release(4);
        assert_eq!(0, table.signals(0));
    }

    #[test]
    fn grant_beats_interrupt() {
        let table = Arc::new(FairLockTable::new(5).unwrap());
        table.acquire(1).unwrap();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.acquire(2));
        wait_until_hungry(&table, 2);
        table.release(1);
        table.interrupt(2);
        assert_eq!(Ok(()), waiter.join().unwrap());
        table.release(2);
        // The interrupt is still pending and cancels the next acquire.
        assert_eq!(Err(Error::Interrupted { agent: 2 }), table.acquire(2));
    }
}
