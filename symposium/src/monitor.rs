//! A monitor in the classic wait/notify-all style.
//!
//! [MonitorTable] keeps a [Seating] under one mutex and one condition variable.  An agent that
//! cannot eat waits on the shared condition; every release wakes every waiter, and each waiter
//! re-checks its own predicate before going back to sleep.  Most of those wake-ups find the agent
//! still ineligible.  The `symposium.monitor.ineligible_wakeup` counter makes that visible.

use std::sync::{Condvar, Mutex, MutexGuard};

use biometrics::Counter;

use super::{check_agents, AgentState, Error, ResourceTable, Seating, Strategy};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static ACQUIRE: Counter = Counter::new("symposium.monitor.acquire");
static ACQUIRE_WAITED: Counter = Counter::new("symposium.monitor.acquire_waited");
static RELEASE: Counter = Counter::new("symposium.monitor.release");
static BROADCAST: Counter = Counter::new("symposium.monitor.broadcast");
static WAKEUP: Counter = Counter::new("symposium.monitor.wakeup");
static INELIGIBLE_WAKEUP: Counter = Counter::new("symposium.monitor.ineligible_wakeup");

/// Register biometrics for the monitor table.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&ACQUIRE);
    collector.register_counter(&ACQUIRE_WAITED);
    collector.register_counter(&RELEASE);
    collector.register_counter(&BROADCAST);
    collector.register_counter(&WAKEUP);
    collector.register_counter(&INELIGIBLE_WAKEUP);
}

/////////////////////////////////////////// MonitorState ///////////////////////////////////////////

#[derive(Debug)]
struct MonitorState {
    seating: Seating,
    interrupted: Vec<bool>,
    wakeups: Vec<u64>,
    broadcasts: u64,
}

/////////////////////////////////////////// MonitorTable ///////////////////////////////////////////

/// A [ResourceTable] that broadcasts to every waiter on each release.
#[derive(Debug)]
pub struct MonitorTable {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl MonitorTable {
    /// Seat `agents` agents, all thinking.
    pub fn new(agents: usize) -> Result<Self, Error> {
        check_agents(agents)?;
        let state = MonitorState {
            seating: Seating::new(agents),
            interrupted: vec![false; agents],
            wakeups: vec![0; agents],
            broadcasts: 0,
        };
        Ok(Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        })
    }

    /// A snapshot of every agent's state.
    pub fn states(&self) -> Vec<AgentState> {
        let state = self.state.lock().unwrap();
        state.seating.states().to_vec()
    }

    /// How many times `agent` woke from the shared condition, eligible or not.
    pub fn wakeups(&self, agent: usize) -> u64 {
        let state = self.state.lock().unwrap();
        state.wakeups[agent]
    }

    /// How many times a release woke every waiter.
    pub fn broadcasts(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.broadcasts
    }

    // Call with the lock held.  Consumes the interrupt if there is one.
    fn take_interrupt(state: &mut MutexGuard<'_, MonitorState>, agent: usize) -> bool {
        std::mem::replace(&mut state.interrupted[agent], false)
    }
}

impl ResourceTable for MonitorTable {
    fn agents(&self) -> usize {
        self.state.lock().unwrap().seating.agents()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Monitor
    }

    fn acquire(&self, agent: usize) -> Result<(), Error> {
        ACQUIRE.click();
        let mut state = self.state.lock().unwrap();
        if Self::take_interrupt(&mut state, agent) {
            return Err(Error::interrupted(agent));
        }
        state.seating.hunger(agent);
        if !state.seating.can_eat(agent) {
            ACQUIRE_WAITED.click();
        }
        while !state.seating.can_eat(agent) {
            state = self.changed.wait(state).unwrap();
            WAKEUP.click();
            state.wakeups[agent] += 1;
            if Self::take_interrupt(&mut state, agent) {
                // Hungry agents block nobody, so going back to thinking needs no notify.
                state.seating.think(agent);
                return Err(Error::interrupted(agent));
            }
            if !state.seating.can_eat(agent) {
                INELIGIBLE_WAKEUP.click();
            }
        }
        state.seating.eat(agent);
        Ok(())
    }

    fn release(&self, agent: usize) {
        RELEASE.click();
        let mut state = self.state.lock().unwrap();
        assert_eq!(AgentState::Eating, state.seating.state(agent));
        state.seating.think(agent);
        state.broadcasts += 1;
        BROADCAST.click();
        self.changed.notify_all();
    }

    fn interrupt(&self, agent: usize) {
        let mut state = self.state.lock().unwrap();
        state.interrupted[agent] = true;
        self.changed.notify_all();
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn wait_until_hungry(table: &MonitorTable, agent: usize) {
        while table.states()[agent] != AgentState::Hungry {
            std::thread::yield_now();
        }
    }

    #[test]
    fn acquire_release() {
        let table = MonitorTable::new(5).unwrap();
        table.acquire(1).unwrap();
        assert_eq!(
            vec![
                AgentState::Thinking,
                AgentState::Eating,
                AgentState::Thinking,
                AgentState::Thinking,
                AgentState::Thinking,
            ],
            table.states()
        );
        table.release(1);
        assert_eq!(vec![AgentState::Thinking; 5], table.states());
        assert_eq!(1, table.broadcasts());
    }

    #[test]
    fn release_wakes_everyone() {
        let table = Arc::new(MonitorTable::new(5).unwrap());
        table.acquire(2).unwrap();
        let (tx, rx) = channel();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || {
            t.acquire(3).unwrap();
            tx.send(()).unwrap();
            t.release(3);
        });
        wait_until_hungry(&table, 3);
        // Agent 0 is nowhere near agent 3, but the broadcast wakes 3 anyway.
        table.acquire(0).unwrap();
        table.release(0);
        while table.wakeups(3) == 0 {
            std::thread::yield_now();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        table.release(2);
        rx.recv().unwrap();
        waiter.join().unwrap();
        assert!(table.wakeups(3) >= 2);
    }

    #[test]
    fn interrupt_while_waiting() {
        let table = Arc::new(MonitorTable::new(5).unwrap());
        table.acquire(0).unwrap();
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.acquire(1));
        wait_until_hungry(&table, 1);
        table.interrupt(1);
        assert_eq!(Err(Error::Interrupted { agent: 1 }), waiter.join().unwrap());
        assert_eq!(AgentState::Thinking, table.states()[1]);
        table.release(0);
        table.acquire(1).unwrap();
        table.release(1);
    }

    #[test]
    fn interrupt_before_acquire() {
        let table = MonitorTable::new(3).unwrap();
        table.interrupt(2);
        assert_eq!(Err(Error::Interrupted { agent: 2 }), table.acquire(2));
        assert_eq!(vec![AgentState::Thinking; 3], table.states());
        table.acquire(2).unwrap();
        table.release(2);
    }
}
