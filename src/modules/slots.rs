use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::modules::action::Direction;
use crate::modules::bitset::BitSet;
use crate::modules::config::MAX_SATIATION;

/// Agent slot identifier, recycled after death.
pub type Pid = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub r: usize,
    pub c: usize,
    pub facing: Direction,
    pub hp: i32,
    pub hp_max: i32,
    pub satiation: i32,
    pub max_satiation: i32,
    pub age: i32,
    pub food_carried: i32,
    pub stone_carried: i32,
    pub role: u8,
}

impl Agent {
    fn newborn(r: usize, c: usize, facing: Direction) -> Self {
        Self {
            r,
            c,
            facing,
            hp: 1,
            hp_max: 1,
            satiation: MAX_SATIATION,
            max_satiation: MAX_SATIATION,
            age: 0,
            food_carried: 0,
            stone_carried: 0,
            role: 0,
        }
    }

    pub fn is_dying(&self) -> bool {
        self.satiation <= 0 || self.hp <= 0
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::newborn(0, 0, Direction::Up)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    pub agents: Vec<Agent>,
    pub alive_mask: Vec<u8>,
    pub free: Vec<Pid>,
    pub next_pid: usize,
    pub lifespan_total: u64,
    pub lifespan_samples: u64,
}

/// Fixed-capacity agent pool that hands out and recycles PIDs.
///
/// Spawns and kills only touch the bitset and the counters. The ordered
/// alive list is rebuilt by [`SlotAllocator::refresh`], which callers run
/// after each batch of changes and before enumerating.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    agents: Vec<Agent>,
    alive: BitSet,
    alive_mask: Vec<u8>,
    free: Vec<Pid>,
    alive_pids: Vec<Pid>,
    alive_count: usize,
    next_pid: usize,
    lifespan_total: u64,
    lifespan_samples: u64,
}

impl SlotAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            agents: vec![Agent::default(); capacity],
            alive: BitSet::new(capacity),
            alive_mask: vec![0; capacity],
            free: Vec::with_capacity(capacity),
            alive_pids: Vec::with_capacity(capacity),
            alive_count: 0,
            next_pid: 0,
            lifespan_total: 0,
            lifespan_samples: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.agents.len()
    }

    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    pub fn is_full(&self) -> bool {
        self.alive_count >= self.capacity()
    }

    pub fn alive_pids(&self) -> &[Pid] {
        &self.alive_pids
    }

    pub fn alive_mask(&self) -> &[u8] {
        &self.alive_mask
    }

    #[inline]
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.alive_mask[pid as usize] != 0
    }

    #[inline]
    pub fn agent(&self, pid: Pid) -> &Agent {
        &self.agents[pid as usize]
    }

    #[inline]
    pub fn agent_mut(&mut self, pid: Pid) -> &mut Agent {
        &mut self.agents[pid as usize]
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn free_pids(&self) -> &[Pid] {
        &self.free
    }

    /// PIDs at or above this value have never been handed out.
    pub fn next_pid(&self) -> usize {
        self.next_pid
    }

    /// Claims a slot and places a newborn at `(r, c)`. Returns `None` when
    /// every slot is alive.
    pub fn spawn<R: Rng + ?Sized>(&mut self, r: usize, c: usize, rng: &mut R) -> Option<Pid> {
        if self.is_full() {
            return None;
        }
        let pid = match self.free.pop() {
            Some(pid) => pid,
            None => {
                let pid = self.next_pid as Pid;
                self.next_pid += 1;
                pid
            }
        };

        self.alive_mask[pid as usize] = 1;
        self.alive.insert(pid as usize);
        self.alive_count += 1;

        let facing = Direction::from_index(rng.gen_range(0..4));
        self.agents[pid as usize] = Agent::newborn(r, c, facing);
        Some(pid)
    }

    pub fn kill(&mut self, pid: Pid) {
        if !self.is_alive(pid) {
            return;
        }
        self.alive_mask[pid as usize] = 0;
        self.alive.remove(pid as usize);
        self.free.push(pid);
        self.alive_count -= 1;

        self.lifespan_total += self.agents[pid as usize].age.max(0) as u64;
        self.lifespan_samples += 1;
    }

    /// Rebuilds the ordered alive list from the bitset.
    ///
    /// # Panics
    ///
    /// If the bitset disagrees with the tracked alive count.
    pub fn refresh(&mut self) {
        let members = self.alive.fill_members(&mut self.alive_pids);
        assert_eq!(
            members, self.alive_count,
            "alive index out of sync: bitset holds {} agents, counter says {}",
            members, self.alive_count
        );
    }

    pub fn clear(&mut self) {
        self.alive.clear();
        self.alive_mask.iter_mut().for_each(|m| *m = 0);
        self.free.clear();
        self.alive_pids.clear();
        self.alive_count = 0;
        self.next_pid = 0;
    }

    /// Adds the ages of the currently listed agents to the lifespan
    /// accumulator, for agents still alive when an episode ends.
    pub fn record_survivor_ages(&mut self) {
        for &pid in &self.alive_pids {
            self.lifespan_total += self.agents[pid as usize].age.max(0) as u64;
            self.lifespan_samples += 1;
        }
    }

    pub fn take_life_expectancy(&mut self) -> f32 {
        let mean = if self.lifespan_samples > 0 {
            self.lifespan_total as f32 / self.lifespan_samples as f32
        } else {
            0.0
        };
        self.lifespan_total = 0;
        self.lifespan_samples = 0;
        mean
    }

    pub fn state(&self) -> SlotState {
        SlotState {
            agents: self.agents.clone(),
            alive_mask: self.alive_mask.clone(),
            free: self.free.clone(),
            next_pid: self.next_pid,
            lifespan_total: self.lifespan_total,
            lifespan_samples: self.lifespan_samples,
        }
    }

    /// Replaces the pool with a saved image. The caller has already checked
    /// that the vectors match this pool's capacity.
    pub fn restore(&mut self, state: SlotState) {
        self.alive.clear();
        for (pid, &mask) in state.alive_mask.iter().enumerate() {
            if mask != 0 {
                self.alive.insert(pid);
            }
        }
        self.alive_count = self.alive.count();
        self.agents = state.agents;
        self.alive_mask = state.alive_mask;
        self.free = state.free;
        self.next_pid = state.next_pid;
        self.lifespan_total = state.lifespan_total;
        self.lifespan_samples = state.lifespan_samples;
        self.refresh();
    }
}
