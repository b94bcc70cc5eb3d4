//! The per-agent state shared by [crate::MonitorTable] and [crate::FairLockTable].
//!
//! A [Seating] is plain data.  Callers own the lock that guards it.

use super::{left_neighbor, right_neighbor};

//////////////////////////////////////////// AgentState ////////////////////////////////////////////

/// What an agent is doing right now.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AgentState {
    #[default]
    Thinking,
    Hungry,
    Eating,
}

////////////////////////////////////////////// Seating /////////////////////////////////////////////

/// The state of every agent at the table, indexed by agent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Seating {
    states: Vec<AgentState>,
}

impl Seating {
    /// Seat `agents` agents, all of them thinking.
    pub fn new(agents: usize) -> Self {
        Self {
            states: vec![AgentState::Thinking; agents],
        }
    }

    pub fn agents(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, agent: usize) -> AgentState {
        self.states[agent]
    }

    pub fn states(&self) -> &[AgentState] {
        &self.states
    }

    /// True iff `agent` is hungry and neither neighbor is eating.
    pub fn can_eat(&self, agent: usize) -> bool {
        let agents = self.agents();
        self.states[agent] == AgentState::Hungry
            && self.states[left_neighbor(agent, agents)] != AgentState::Eating
            && self.states[right_neighbor(agent, agents)] != AgentState::Eating
    }

    /// Mark `agent` as wanting its resources.
    pub fn hunger(&mut self, agent: usize) {
        assert_eq!(AgentState::Thinking, self.states[agent], "agent {agent} asked twice");
        self.states[agent] = AgentState::Hungry;
    }

    /// Move `agent` into its exclusive-use phase.  Panics unless [Seating::can_eat] holds.
    pub fn eat(&mut self, agent: usize) {
        assert!(self.can_eat(agent), "agent {agent} cannot eat: {:?}", self.states);
        self.states[agent] = AgentState::Eating;
        self.assert_invariants(agent);
    }

    /// Return `agent` to thinking, whether it was eating or gave up while hungry.
    pub fn think(&mut self, agent: usize) {
        self.states[agent] = AgentState::Thinking;
    }

    fn assert_invariants(&self, agent: usize) {
        let agents = self.agents();
        assert!(self.states[left_neighbor(agent, agents)] != AgentState::Eating);
        assert!(self.states[right_neighbor(agent, agents)] != AgentState::Eating);
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_thinking() {
        let seating = Seating::new(5);
        assert_eq!(5, seating.agents());
        assert!(seating.states().iter().all(|s| *s == AgentState::Thinking));
        for agent in 0..5 {
            assert!(!seating.can_eat(agent));
        }
    }

    #[test]
    fn hungry_with_idle_neighbors_can_eat() {
        let mut seating = Seating::new(5);
        seating.hunger(2);
        assert!(seating.can_eat(2));
        seating.eat(2);
        assert_eq!(AgentState::Eating, seating.state(2));
        assert!(!seating.can_eat(2));
    }

    #[test]
    fn eating_neighbor_blocks() {
        let mut seating = Seating::new(5);
        seating.hunger(0);
        seating.eat(0);
        seating.hunger(1);
        seating.hunger(4);
        seating.hunger(2);
        assert!(!seating.can_eat(1));
        assert!(!seating.can_eat(4));
        assert!(seating.can_eat(2));
        seating.think(0);
        assert!(seating.can_eat(1));
        assert!(seating.can_eat(4));
    }

    #[test]
    fn hungry_neighbor_does_not_block() {
        let mut seating = Seating::new(5);
        seating.hunger(0);
        seating.hunger(1);
        assert!(seating.can_eat(0));
        assert!(seating.can_eat(1));
        seating.eat(0);
        assert!(!seating.can_eat(1));
    }

    #[test]
    fn two_agents_share_both_sides() {
        let mut seating = Seating::new(2);
        seating.hunger(0);
        seating.hunger(1);
        seating.eat(1);
        assert!(!seating.can_eat(0));
        seating.think(1);
        assert!(seating.can_eat(0));
    }

    #[test]
    #[should_panic]
    fn eat_without_hunger() {
        let mut seating = Seating::new(5);
        seating.eat(3);
    }

    #[test]
    #[should_panic]
    fn eat_beside_eater() {
        let mut seating = Seating::new(5);
        seating.hunger(3);
        seating.eat(3);
        seating.hunger(4);
        seating.eat(4);
    }
}
