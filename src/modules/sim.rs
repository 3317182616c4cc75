use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::modules::action::{Action, Direction};
use crate::modules::config::{
    ConfigError, MAX_FOOD_CARRIED, MAX_FOOD_STORED, MAX_HP, MAX_SATIATION, MAX_STONE_CARRIED,
    METABOLISM_RATE, REPRODUCTION_AGE, SimConfig,
};
use crate::modules::genetics::Genetics;
use crate::modules::grid::{World, crop_yield, is_summer_day};
use crate::modules::observation::{encode_all, record_size};
use crate::modules::reward::compute_rewards;
use crate::modules::slots::{Agent, Pid, SlotAllocator};
use crate::modules::snapshot::SnapshotError;
use crate::modules::stats::{EpisodeLog, EpisodeStats};
use crate::modules::terrain::{TerrainError, TerrainProvider};

/// Founding pairs are placed by rejection sampling; this many draws per cell
/// before giving up.
const PLACEMENT_ATTEMPTS_PER_CELL: usize = 64;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Terrain(#[from] TerrainError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("terrain is {actual_width}x{actual_height}, world is {width}x{height}")]
    TerrainShape {
        width: usize,
        height: usize,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("expected one action per agent slot ({expected}), got {actual}")]
    ActionCount { expected: usize, actual: usize },
}

/// What happened during one call to [`Territories::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u32,
    pub births: usize,
    pub deaths: usize,
    pub alive: usize,
    /// The call started a new episode instead of advancing the old one.
    pub reset: bool,
}

/// The territories simulation: world, agents, genetics and the per-tick
/// output buffers handed to the policy loop.
#[derive(Debug, Clone)]
pub struct Territories {
    pub(crate) config: SimConfig,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) world: World,
    pub(crate) slots: SlotAllocator,
    pub(crate) genetics: Genetics,
    pub(crate) stats: EpisodeStats,
    pub(crate) log: EpisodeLog,
    /// Tick at which the current episode is truncated.
    pub(crate) episode_length: u32,
    pub(crate) observations: Vec<u8>,
    pub(crate) rewards: Vec<f32>,
    pub(crate) terminals: Vec<u8>,
    pub(crate) truncations: Vec<u8>,
    actions: Vec<Action>,
    order: Vec<Pid>,
}

impl Territories {
    pub fn new(config: SimConfig, terrain: &dyn TerrainProvider) -> Result<Self, SimError> {
        config.validate()?;
        let terrain = terrain.load(config.map(), config.width, config.height)?;
        if terrain.width() != config.width || terrain.height() != config.height {
            return Err(SimError::TerrainShape {
                width: config.width,
                height: config.height,
                actual_width: terrain.width(),
                actual_height: terrain.height(),
            });
        }

        let n = config.max_agents;
        let mut sim = Self {
            rng: config.seeded_rng(),
            world: World::new(terrain),
            slots: SlotAllocator::new(n),
            genetics: Genetics::new(n, config.gene_count, config.allele_count),
            stats: EpisodeStats::default(),
            log: EpisodeLog::default(),
            episode_length: config.min_episode_length,
            observations: vec![0; n * record_size(config.gene_count)],
            rewards: vec![0.0; n],
            terminals: vec![0; n],
            truncations: vec![0; n],
            actions: vec![Action::Noop; n],
            order: Vec::with_capacity(n),
            config,
        };
        sim.reset();
        info!(
            width = sim.config.width,
            height = sim.config.height,
            max_agents = n,
            soil = sim.world.terrain().soil_fraction(),
            "territories initialised"
        );
        Ok(sim)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn genetics(&self) -> &Genetics {
        &self.genetics
    }

    pub fn agent(&self, pid: Pid) -> &Agent {
        self.slots.agent(pid)
    }

    pub fn tick(&self) -> u32 {
        self.world.tick()
    }

    pub fn episode_length(&self) -> u32 {
        self.episode_length
    }

    pub fn alive_count(&self) -> usize {
        self.slots.alive_count()
    }

    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    pub fn record_size(&self) -> usize {
        record_size(self.config.gene_count)
    }

    /// `max_agents x record_size` bytes; dead slots hold stale records.
    pub fn observations(&self) -> &[u8] {
        &self.observations
    }

    pub fn observation(&self, pid: Pid) -> &[u8] {
        let size = self.record_size();
        &self.observations[pid as usize * size..][..size]
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn terminals(&self) -> &[u8] {
        &self.terminals
    }

    pub fn truncations(&self) -> &[u8] {
        &self.truncations
    }

    pub fn alive_mask(&self) -> &[u8] {
        self.slots.alive_mask()
    }

    pub fn kinship_matrix(&self) -> &[u8] {
        self.genetics.kinship_matrix()
    }

    pub fn genomes(&self) -> &[u8] {
        self.genetics.genomes()
    }

    pub fn family_sizes(&self) -> &[u16] {
        self.genetics.family_sizes()
    }

    pub fn drain_log(&mut self) -> EpisodeLog {
        self.log.drain()
    }

    /// Starts a new episode: empty world, fresh founding pairs, initial
    /// rewards and observations. No actions are taken.
    pub fn reset(&mut self) {
        self.truncations.fill(0);
        self.genetics.reset();
        let spread = self.config.max_episode_length - self.config.min_episode_length;
        self.episode_length = self.config.min_episode_length + self.rng.gen_range(0..spread);

        self.slots.clear();
        self.world.reset();
        for _ in 0..self.config.initial_kin_pairs {
            self.seed_kin_pair();
        }
        self.slots.refresh();

        self.finish_tick();
        debug!(
            episode_length = self.episode_length,
            founders = self.slots.alive_count(),
            "episode reset"
        );
    }

    /// Advances one tick using one action code per agent slot. Codes of dead
    /// slots are ignored. When the population is extinct or the episode is
    /// over, the finished episode is logged and a new one starts instead.
    pub fn step(&mut self, actions: &[i32]) -> Result<TickSummary, SimError> {
        if actions.len() != self.config.max_agents {
            return Err(SimError::ActionCount {
                expected: self.config.max_agents,
                actual: actions.len(),
            });
        }
        self.terminals.fill(0);

        if self.slots.alive_count() == 0 || self.world.tick >= self.episode_length {
            self.flush_episode();
            self.reset();
            return Ok(TickSummary {
                tick: self.world.tick,
                births: 0,
                deaths: 0,
                alive: self.slots.alive_count(),
                reset: true,
            });
        }

        for (slot, &code) in self.actions.iter_mut().zip(actions) {
            *slot = Action::from_code(code);
        }

        let day = self.world.day();
        if !self.world.is_winter && !is_summer_day(day) {
            self.world.is_winter = true;
            debug!(tick = self.world.tick, "winter begins");
        } else if self.world.is_winter && is_summer_day(day) {
            self.world.is_winter = false;
            self.world.start_crop_growth();
            debug!(tick = self.world.tick, "summer begins");
        }

        self.world.tick += 1;
        if self.sampling() {
            self.stats.sample_population(self.slots.alive_count());
        }

        self.order.clear();
        self.order.extend_from_slice(self.slots.alive_pids());
        self.order.shuffle(&mut self.rng);

        let alive_before = self.slots.alive_count();
        for i in 0..self.order.len() {
            let pid = self.order[i];
            self.act(pid, day as u16);
        }
        let births = self.slots.alive_count() - alive_before;
        self.slots.refresh();

        let deaths = self.sweep_dead();
        self.slots.refresh();

        if self.world.tick >= self.episode_length {
            self.truncations.fill(1);
        }
        self.finish_tick();

        Ok(TickSummary {
            tick: self.world.tick,
            births,
            deaths,
            alive: self.slots.alive_count(),
            reset: false,
        })
    }

    fn sampling(&self) -> bool {
        self.world.tick < self.config.min_episode_length
    }

    fn finish_tick(&mut self) {
        let total = compute_rewards(
            &self.config,
            &mut self.genetics,
            self.slots.alive_mask(),
            self.slots.alive_pids(),
            &self.terminals,
            &mut self.rewards,
        );
        if self.sampling() {
            self.stats.total_reward += total;
        }
        encode_all(&self.world, &self.slots, &self.genetics, &mut self.observations);
    }

    fn flush_episode(&mut self) {
        self.slots.record_survivor_ages();
        let life_expectancy = self.slots.take_life_expectancy();
        let diversity = self.genetics.genetic_diversity(self.slots.alive_pids());
        info!(
            tick = self.world.tick,
            survivors = self.slots.alive_count(),
            births = self.stats.births,
            murders = self.stats.murders,
            starvations = self.stats.starvations,
            life_expectancy,
            "episode finished"
        );
        self.log.record(&mut self.stats, self.world.tick, life_expectancy, diversity);
    }

    /// # Panics
    ///
    /// If no free cell with a free neighbour is found.
    fn seed_kin_pair(&mut self) {
        let (w, h) = (self.world.width(), self.world.height());
        let attempts = PLACEMENT_ATTEMPTS_PER_CELL * w * h;
        for _ in 0..attempts {
            let cell = self.rng.gen_range(0..w * h);
            let (r, c) = (cell / w, cell % w);
            if self.world.is_blocked(r, c) {
                continue;
            }
            let Some((r2, c2)) = self.world.find_empty_neighbour(r, c) else {
                continue;
            };
            let (Some(a), Some(b)) = (
                self.slots.spawn(r, c, &mut self.rng),
                self.slots.spawn(r2, c2, &mut self.rng),
            ) else {
                panic!("no free slot for a founding pair");
            };
            self.world.set_occupant(r, c, Some(a));
            self.world.set_occupant(r2, c2, Some(b));
            self.genetics.randomize_genome(a, &mut self.rng);
            self.genetics.copy_genome(a, b);
            self.slots.agent_mut(a).role = 0;
            self.slots.agent_mut(b).role = 0;
            self.genetics.register(a, self.slots.alive_mask());
            self.genetics.register(b, self.slots.alive_mask());
            return;
        }
        panic!(
            "could not place a founding pair on a {}x{} world after {} attempts",
            w, h, attempts
        );
    }

    fn act(&mut self, pid: Pid, day: u16) {
        let sampling = self.sampling();
        let agent = self.slots.agent_mut(pid);
        if agent.hp <= 0 {
            return;
        }
        assert!(
            agent.satiation > 0,
            "agent {} starts its turn with satiation {}",
            pid,
            agent.satiation
        );
        agent.age += 1;
        if agent.age == REPRODUCTION_AGE {
            agent.hp_max = MAX_HP;
            agent.hp = MAX_HP;
        }
        agent.satiation -= METABOLISM_RATE;
        if agent.food_carried > 0 {
            let eaten = (MAX_SATIATION - agent.satiation).min(agent.food_carried);
            agent.food_carried -= eaten;
            agent.satiation += eaten;
            if sampling {
                self.stats.food_eaten += eaten as u64;
            }
        }

        let action = self.actions[pid as usize];
        trace!(pid, action = action.label(), "resolving action");
        match action {
            Action::Move(dir) => self.move_or_turn(pid, dir),
            Action::Noop => {}
            Action::Pickup => self.pickup(pid, day),
            Action::Mine => self.mine(pid),
            Action::PackageFood => self.package_food(pid, day),
            Action::BuildWall => self.build_wall(pid),
            Action::Attack => self.attack(pid),
            Action::Reproduce => self.reproduce(pid),
        }

        if sampling && self.slots.agent(pid).satiation <= 0 {
            self.stats.starvations += 1;
        }
    }

    fn move_or_turn(&mut self, pid: Pid, dir: Direction) {
        let agent = *self.slots.agent(pid);
        if agent.facing == dir {
            let (r, c) = self.world.step(agent.r, agent.c, dir);
            if !self.world.is_blocked(r, c) {
                self.world.set_occupant(agent.r, agent.c, None);
                self.world.set_occupant(r, c, Some(pid));
                let agent = self.slots.agent_mut(pid);
                agent.r = r;
                agent.c = c;
            }
        }
        self.slots.agent_mut(pid).facing = dir;
    }

    fn pickup(&mut self, pid: Pid, day: u16) {
        let (r, c) = position(self.slots.agent(pid));
        let capacity = MAX_FOOD_CARRIED - self.slots.agent(pid).food_carried;
        let stored = self.world.tile(r, c).stored_food as i32;

        if stored > 0 {
            let taken = stored.min(capacity);
            let regrow = taken == stored && !self.world.is_winter() && self.world.is_soil(r, c);
            let tile = self.world.tile_mut(r, c);
            tile.stored_food -= taken as u16;
            if regrow {
                tile.last_harvest = day;
            }
            self.slots.agent_mut(pid).food_carried += taken;
        } else {
            let days = self.world.growth_days(r, c);
            if days <= 0 {
                return;
            }
            let crop = crop_yield(days);
            let taken = crop.min(capacity);
            let tile = self.world.tile_mut(r, c);
            tile.last_harvest = day;
            if taken < crop {
                tile.stored_food = (crop - taken) as u16;
            }
            self.slots.agent_mut(pid).food_carried += taken;
        }
    }

    fn mine(&mut self, pid: Pid) {
        let agent = *self.slots.agent(pid);
        if agent.stone_carried >= MAX_STONE_CARRIED {
            return;
        }
        let deposit = Direction::ALL.into_iter().find_map(|dir| {
            let (r, c) = self.world.step(agent.r, agent.c, dir);
            (self.world.tile(r, c).stone > 0).then_some((dir, r, c))
        });
        let Some((dir, r, c)) = deposit else {
            return;
        };
        self.world.tile_mut(r, c).stone -= 1;
        let agent = self.slots.agent_mut(pid);
        agent.stone_carried += 1;
        agent.facing = dir;
        if self.sampling() {
            self.stats.stone_mined += 1;
        }
    }

    fn package_food(&mut self, pid: Pid, day: u16) {
        let sampling = self.sampling();
        let (r, c) = position(self.slots.agent(pid));
        let days = self.world.growth_days(r, c);
        if days > 0 {
            let crop = crop_yield(days);
            let tile = self.world.tile_mut(r, c);
            tile.last_harvest = day;
            tile.stored_food += crop as u16;
            if sampling {
                self.stats.food_stored += crop as u64;
            }
        }

        let carried = self.slots.agent(pid).food_carried;
        if carried > 0 {
            let room = MAX_FOOD_STORED - self.world.tile(r, c).stored_food as i32;
            let dropped = carried.min(room).max(0);
            self.world.tile_mut(r, c).stored_food += dropped as u16;
            self.slots.agent_mut(pid).food_carried -= dropped;
            if sampling {
                self.stats.food_stored += dropped as u64;
            }
        }
    }

    fn build_wall(&mut self, pid: Pid) {
        let agent = *self.slots.agent(pid);
        if agent.stone_carried <= 0 {
            return;
        }
        let (r, c) = self.world.step(agent.r, agent.c, agent.facing);
        if self.world.is_blocked(r, c) {
            return;
        }
        self.world.place_wall(r, c);
        self.slots.agent_mut(pid).stone_carried -= 1;
        if self.sampling() {
            self.stats.walls_built += 1;
        }
    }

    /// Hits the first wall or agent found scanning the four neighbours
    /// clockwise from the current facing. A victim brought to zero hp is
    /// looted but stays on its cell until the end-of-tick sweep, so it can be
    /// hit and looted again in the same tick.
    fn attack(&mut self, pid: Pid) {
        let agent = *self.slots.agent(pid);
        let target = (0..4).map(|k| agent.facing.rotated(k)).find_map(|dir| {
            let (r, c) = self.world.step(agent.r, agent.c, dir);
            if self.world.tile(r, c).wall_hp > 0 {
                Some((dir, r, c, None))
            } else {
                self.world.occupant(r, c).map(|other| (dir, r, c, Some(other)))
            }
        });
        let Some((dir, r, c, victim)) = target else {
            return;
        };
        self.slots.agent_mut(pid).facing = dir;
        let sampling = self.sampling();

        match victim {
            None => {
                if self.world.tile(r, c).wall_hp == 1 {
                    // Goes through destroy_wall so the crop under it restarts today.
                    self.world.destroy_wall(r, c);
                    if sampling {
                        self.stats.walls_destroyed += 1;
                    }
                } else {
                    self.world.tile_mut(r, c).wall_hp -= 1;
                }
            }
            Some(victim) => {
                let target = self.slots.agent_mut(victim);
                target.hp -= 1;
                if target.hp > 0 {
                    return;
                }
                let loot = *target;
                if sampling {
                    self.stats.murders += 1;
                }
                let attacker = self.slots.agent_mut(pid);
                attacker.satiation = (attacker.satiation + loot.satiation / 2).min(MAX_SATIATION);
                attacker.stone_carried =
                    (attacker.stone_carried + loot.stone_carried).min(MAX_STONE_CARRIED);
                attacker.food_carried =
                    (attacker.food_carried + loot.food_carried).min(MAX_FOOD_CARRIED);
                debug!(attacker = pid, victim, "agent killed");
            }
        }
    }

    fn can_reproduce(agent: &Agent) -> bool {
        agent.age >= REPRODUCTION_AGE && agent.satiation > MAX_SATIATION / 2
    }

    /// First neighbour, scanned row by row, that also chose to reproduce and
    /// is able to.
    fn find_mate(&self, pid: Pid) -> Option<Pid> {
        let agent = self.slots.agent(pid);
        for dr in -1..=1 {
            for dc in -1..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (r, c) = self.world.tiles().offset(agent.r, agent.c, dr, dc);
                let Some(other) = self.world.occupant(r, c) else {
                    continue;
                };
                if other != pid
                    && self.actions[other as usize] == Action::Reproduce
                    && Self::can_reproduce(self.slots.agent(other))
                {
                    return Some(other);
                }
            }
        }
        None
    }

    fn reproduce(&mut self, pid: Pid) {
        let agent = *self.slots.agent(pid);
        if !Self::can_reproduce(&agent) || self.slots.is_full() {
            return;
        }
        let Some(mate) = self.find_mate(pid) else {
            return;
        };
        let Some((r, c)) = self.world.find_empty_neighbour(agent.r, agent.c) else {
            return;
        };

        self.slots.agent_mut(pid).satiation -= MAX_SATIATION / 2;
        self.slots.agent_mut(mate).satiation -= MAX_SATIATION / 2;

        let Some(child) = self.slots.spawn(r, c, &mut self.rng) else {
            panic!("slot pool full after capacity check");
        };
        self.world.set_occupant(r, c, Some(child));
        self.genetics
            .on_birth(child, pid, mate, self.slots.alive_mask(), &mut self.rng);
        let role = self.rng.gen_range(0..self.config.role_count) as u8;
        self.slots.agent_mut(child).role = role;

        if self.sampling() {
            self.stats.births += 1;
        }
        debug!(parent = pid, mate, child, "agent born");
    }

    /// Removes every starved or killed agent from the grid and flags it
    /// terminal. The kinship matrix keeps their entries so this tick's reward
    /// still sees their family.
    fn sweep_dead(&mut self) -> usize {
        let mut deaths = 0;
        for i in 0..self.slots.alive_pids().len() {
            let pid = self.slots.alive_pids()[i];
            let agent = *self.slots.agent(pid);
            if !agent.is_dying() {
                continue;
            }
            self.slots.kill(pid);
            self.world.set_occupant(agent.r, agent.c, None);
            self.terminals[pid as usize] = 1;
            deaths += 1;
            trace!(pid, age = agent.age, hp = agent.hp, "agent removed");
        }
        deaths
    }
}

fn position(agent: &Agent) -> (usize, usize) {
    (agent.r, agent.c)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::modules::config::{RewardMode, WALL_HP_MAX};
    use crate::modules::terrain::{Terrain, UniformTerrain};

    const NOOP: i32 = 4;

    fn small_config() -> SimConfig {
        SimConfig {
            width: 16,
            height: 16,
            max_agents: 32,
            gene_count: 3,
            allele_count: 4,
            min_episode_length: 50,
            max_episode_length: 60,
            initial_kin_pairs: 1,
            seed: Some(42),
            ..SimConfig::default()
        }
    }

    fn build(config: SimConfig, soil: bool) -> Territories {
        Territories::new(config, &UniformTerrain { soil }).unwrap()
    }

    /// Empties the population and grid but keeps the stone deposits.
    fn empty(sim: &mut Territories) {
        sim.slots.clear();
        sim.world.reset();
        sim.genetics.reset();
        sim.slots.refresh();
    }

    fn place(sim: &mut Territories, r: usize, c: usize, genome: &[u8]) -> Pid {
        let pid = sim.slots.spawn(r, c, &mut sim.rng).unwrap();
        sim.world.set_occupant(r, c, Some(pid));
        sim.slots.agent_mut(pid).facing = Direction::Up;
        sim.genetics.genome_mut(pid).copy_from_slice(genome);
        sim.genetics.register(pid, sim.slots.alive_mask());
        sim.slots.refresh();
        pid
    }

    fn actions(sim: &Territories, chosen: &[(Pid, Action)]) -> Vec<i32> {
        let mut codes = vec![NOOP; sim.config.max_agents];
        for &(pid, action) in chosen {
            codes[pid as usize] = action.code();
        }
        codes
    }

    fn assert_consistent(sim: &Territories) {
        let n = sim.config.max_agents as Pid;
        let g = sim.config.gene_count as u8;
        for a in 0..n {
            assert_eq!(sim.genetics.kinship_entry(a, a), g);
            for b in 0..n {
                assert_eq!(sim.genetics.kinship_entry(a, b), sim.genetics.kinship_entry(b, a));
            }
        }
        assert_eq!(sim.slots.alive_pids().len(), sim.slots.alive_count());
        for &pid in sim.slots.alive_pids() {
            let agent = sim.slots.agent(pid);
            assert_eq!(sim.world.occupant(agent.r, agent.c), Some(pid));
        }
        let occupied = sim
            .world
            .occupants()
            .cells()
            .iter()
            .filter(|cell| cell.is_some())
            .count();
        assert_eq!(occupied, sim.slots.alive_count());
    }

    #[test]
    fn new_rejects_invalid_config_and_terrain() {
        let bad = SimConfig {
            max_agents: 0,
            ..small_config()
        };
        assert!(matches!(
            Territories::new(bad, &UniformTerrain::default()),
            Err(SimError::Config(ConfigError::NoAgents))
        ));

        struct Wrong;
        impl TerrainProvider for Wrong {
            fn load(
                &self,
                _map_name: Option<&str>,
                _width: usize,
                _height: usize,
            ) -> Result<Terrain, TerrainError> {
                Ok(Terrain::uniform(3, 3, true))
            }
        }
        assert!(matches!(
            Territories::new(small_config(), &Wrong),
            Err(SimError::TerrainShape { actual_width: 3, .. })
        ));
    }

    #[test]
    fn step_rejects_wrong_action_count() {
        let mut sim = build(small_config(), true);
        assert!(matches!(
            sim.step(&[NOOP; 3]),
            Err(SimError::ActionCount { expected: 32, actual: 3 })
        ));
        assert_eq!(sim.tick(), 0);
    }

    #[test]
    fn reset_places_founding_siblings() {
        let sim = build(small_config(), true);
        assert_eq!(sim.alive_count(), 2);
        let (a, b) = (sim.slots.alive_pids()[0], sim.slots.alive_pids()[1]);
        assert_eq!(sim.genetics.genome(a), sim.genetics.genome(b));
        assert_eq!(sim.genetics.kinship_entry(a, b), 3);
        assert_eq!(sim.family_sizes()[a as usize], 6);
        assert_eq!(sim.family_sizes()[b as usize], 6);
        assert_eq!(sim.rewards()[a as usize], 0.0);
        assert_eq!(sim.agent(a).role, 0);

        let (pa, pb) = (sim.agent(a), sim.agent(b));
        let dr = (pa.r as i32 - pb.r as i32).rem_euclid(16);
        let dc = (pa.c as i32 - pb.c as i32).rem_euclid(16);
        assert!(matches!(dr, 0 | 1 | 15) && matches!(dc, 0 | 1 | 15));
        assert!((50..60).contains(&sim.episode_length()));
        assert_consistent(&sim);
    }

    #[test]
    fn satiation_of_one_survives_and_zero_starves() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let survivor = place(&mut sim, 1, 1, &[0, 0, 0]);
        let starving = place(&mut sim, 1, 8, &[1, 1, 1]);
        sim.slots.agent_mut(survivor).satiation = METABOLISM_RATE + 1;
        sim.slots.agent_mut(starving).satiation = METABOLISM_RATE;

        let summary = sim.step(&actions(&sim, &[])).unwrap();
        assert_eq!(summary.deaths, 1);
        assert_eq!(sim.agent(survivor).satiation, 1);
        assert_eq!(sim.alive_mask()[survivor as usize], 1);
        assert_eq!(sim.alive_mask()[starving as usize], 0);
        assert_eq!(sim.terminals()[starving as usize], 1);
        assert_eq!(sim.world.occupant(1, 8), None);
        assert_eq!(sim.stats.starvations, 1);
        assert_consistent(&sim);
    }

    #[test]
    fn carried_food_is_eaten_up_to_full() {
        let mut sim = build(small_config(), false);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        sim.slots.agent_mut(pid).satiation = 50;
        sim.slots.agent_mut(pid).food_carried = 30;

        sim.step(&actions(&sim, &[])).unwrap();
        assert_eq!(sim.agent(pid).satiation, 75);
        assert_eq!(sim.agent(pid).food_carried, 0);
        assert_eq!(sim.stats.food_eaten, 30);
    }

    #[test]
    fn moving_requires_facing_the_destination() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        let right = Action::Move(Direction::Right);

        sim.step(&actions(&sim, &[(pid, right)])).unwrap();
        assert_eq!(position(sim.agent(pid)), (1, 1));
        assert_eq!(sim.agent(pid).facing, Direction::Right);

        sim.step(&actions(&sim, &[(pid, right)])).unwrap();
        assert_eq!(position(sim.agent(pid)), (1, 2));
        assert_eq!(sim.world.occupant(1, 1), None);
        assert_eq!(sim.world.occupant(1, 2), Some(pid));

        // Walls block; the agent stays put.
        sim.world.place_wall(1, 3);
        sim.step(&actions(&sim, &[(pid, right)])).unwrap();
        assert_eq!(position(sim.agent(pid)), (1, 2));
        assert_consistent(&sim);
    }

    #[test]
    fn moves_wrap_around_the_edges() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 0, 1, &[0, 0, 0]);
        sim.step(&actions(&sim, &[(pid, Action::Move(Direction::Up))])).unwrap();
        assert_eq!(position(sim.agent(pid)), (15, 1));
    }

    #[test]
    fn package_moves_all_carried_food_onto_empty_grass() {
        let mut sim = build(small_config(), false);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        // Still full after metabolism, so nothing is eaten.
        sim.slots.agent_mut(pid).satiation = MAX_SATIATION + METABOLISM_RATE;
        sim.slots.agent_mut(pid).food_carried = MAX_FOOD_CARRIED;

        sim.step(&actions(&sim, &[(pid, Action::PackageFood)])).unwrap();
        assert_eq!(sim.world.tile(1, 1).stored_food, 150);
        assert_eq!(sim.agent(pid).food_carried, 0);
        assert_eq!(sim.stats.food_stored, 150);
    }

    #[test]
    fn package_stores_standing_crop_before_carried_food() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        sim.slots.agent_mut(pid).satiation = MAX_SATIATION + METABOLISM_RATE;
        sim.slots.agent_mut(pid).food_carried = 140;
        // Day 56 after the tick, crop growing since day 0.
        let crop = crop_yield(56);

        sim.step(&actions(&sim, &[(pid, Action::PackageFood)])).unwrap();
        let tile = *sim.world.tile(1, 1);
        assert_eq!(tile.stored_food, 150);
        assert_eq!(tile.last_harvest, 55);
        assert_eq!(sim.agent(pid).food_carried, 140 - (150 - crop));
    }

    #[test]
    fn pickup_harvests_crop_and_leaves_the_remainder() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        sim.slots.agent_mut(pid).satiation = MAX_SATIATION + METABOLISM_RATE;
        sim.slots.agent_mut(pid).food_carried = 140;
        let crop = crop_yield(56);
        assert!(crop > 10);

        sim.step(&actions(&sim, &[(pid, Action::Pickup)])).unwrap();
        assert_eq!(sim.agent(pid).food_carried, 150);
        let tile = *sim.world.tile(1, 1);
        assert_eq!(tile.stored_food as i32, crop - 10);
        assert_eq!(tile.last_harvest, 55);

        // Emptying the store restarts growth.
        sim.slots.agent_mut(pid).food_carried = 0;
        sim.step(&actions(&sim, &[(pid, Action::Pickup)])).unwrap();
        assert_eq!(sim.world.tile(1, 1).stored_food, 0);
        assert_eq!(sim.world.tile(1, 1).last_harvest, 56);
    }

    #[test]
    fn mining_takes_one_stone_and_faces_the_deposit() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        // Deposit at (4, 4) is below.
        let pid = place(&mut sim, 3, 4, &[0, 0, 0]);

        sim.step(&actions(&sim, &[(pid, Action::Mine)])).unwrap();
        assert_eq!(sim.agent(pid).stone_carried, 1);
        assert_eq!(sim.agent(pid).facing, Direction::Down);
        assert_eq!(sim.world.tile(4, 4).stone, 599);

        sim.slots.agent_mut(pid).stone_carried = MAX_STONE_CARRIED;
        sim.step(&actions(&sim, &[(pid, Action::Mine)])).unwrap();
        assert_eq!(sim.world.tile(4, 4).stone, 599);
    }

    #[test]
    fn walls_are_built_ahead_on_free_cells_only() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 2, 2, &[0, 0, 0]);
        sim.slots.agent_mut(pid).stone_carried = 2;

        sim.step(&actions(&sim, &[(pid, Action::BuildWall)])).unwrap();
        assert_eq!(sim.world.tile(1, 2).wall_hp, WALL_HP_MAX);
        assert_eq!(sim.agent(pid).stone_carried, 1);

        sim.step(&actions(&sim, &[(pid, Action::BuildWall)])).unwrap();
        assert_eq!(sim.agent(pid).stone_carried, 1);
        assert_eq!(sim.stats.walls_built, 1);
    }

    #[test]
    fn attack_scan_hits_the_wall_ahead_before_the_agent_to_the_right() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let attacker = place(&mut sim, 2, 2, &[0, 0, 0]);
        let bystander = place(&mut sim, 2, 3, &[1, 1, 1]);
        sim.slots.agent_mut(bystander).hp = 3;
        sim.world.place_wall(1, 2);

        sim.step(&actions(&sim, &[(attacker, Action::Attack)])).unwrap();
        assert_eq!(sim.world.tile(1, 2).wall_hp, WALL_HP_MAX - 1);
        assert_eq!(sim.agent(bystander).hp, 3);
        assert_eq!(sim.agent(attacker).facing, Direction::Up);
    }

    #[test]
    fn last_blow_destroys_a_wall_and_restarts_the_crop() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let attacker = place(&mut sim, 2, 2, &[0, 0, 0]);
        sim.world.place_wall(1, 2);
        sim.world.tile_mut(1, 2).wall_hp = 1;

        sim.step(&actions(&sim, &[(attacker, Action::Attack)])).unwrap();
        let tile = *sim.world.tile(1, 2);
        assert_eq!(tile.wall_hp, 0);
        assert_eq!(tile.last_harvest as u32, sim.world.day());
        assert_eq!(sim.stats.walls_destroyed, 1);
    }

    #[test]
    fn killing_blow_loots_the_victim() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let attacker = place(&mut sim, 2, 2, &[0, 0, 0]);
        let victim = place(&mut sim, 2, 3, &[1, 1, 1]);
        sim.slots.agent_mut(attacker).satiation = 50;
        {
            let v = sim.slots.agent_mut(victim);
            v.satiation = MAX_SATIATION + METABOLISM_RATE;
            v.food_carried = 30;
            v.stone_carried = 4;
        }

        let summary = sim.step(&actions(&sim, &[(attacker, Action::Attack)])).unwrap();
        let a = sim.agent(attacker);
        assert_eq!(a.facing, Direction::Right);
        assert_eq!(a.food_carried, 30);
        assert_eq!(a.stone_carried, 4);
        assert!(a.satiation >= 95);
        assert_eq!(summary.deaths, 1);
        assert_eq!(sim.terminals()[victim as usize], 1);
        assert_eq!(sim.world.occupant(2, 3), None);
        assert_eq!(sim.stats.murders, 1);
        assert_consistent(&sim);
    }

    #[test]
    fn willing_adults_produce_one_related_child() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let a = place(&mut sim, 2, 2, &[1, 2, 3]);
        let b = place(&mut sim, 2, 3, &[1, 2, 3]);
        for pid in [a, b] {
            sim.slots.agent_mut(pid).age = REPRODUCTION_AGE;
        }

        let summary = sim
            .step(&actions(&sim, &[(a, Action::Reproduce), (b, Action::Reproduce)]))
            .unwrap();
        assert_eq!(summary.births, 1);
        assert_eq!(sim.alive_count(), 3);
        let child = *sim
            .slots
            .alive_pids()
            .iter()
            .find(|&&p| p != a && p != b)
            .unwrap();
        assert_eq!(sim.genetics.genome(child), &[1, 2, 3]);
        assert_eq!(sim.genetics.kinship_entry(child, a), 3);
        assert_eq!(sim.family_sizes()[child as usize], 9);
        assert!((sim.agent(child).role as usize) < sim.config.role_count);
        assert_eq!(sim.agent(child).age, 0);
        assert_eq!(sim.agent(a).satiation, 45);
        assert_eq!(sim.agent(b).satiation, 45);
        assert_eq!(sim.stats.births, 1);
        assert_consistent(&sim);
    }

    #[test]
    fn reproduction_without_a_willing_mate_costs_nothing() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let a = place(&mut sim, 2, 2, &[1, 2, 3]);
        let b = place(&mut sim, 2, 3, &[1, 2, 3]);
        for pid in [a, b] {
            sim.slots.agent_mut(pid).age = REPRODUCTION_AGE;
        }

        let summary = sim.step(&actions(&sim, &[(a, Action::Reproduce)])).unwrap();
        assert_eq!(summary.births, 0);
        assert_eq!(sim.agent(a).satiation, 95);
        assert_eq!(sim.agent(b).satiation, 95);
    }

    #[test]
    fn walled_in_parents_cannot_reproduce() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let a = place(&mut sim, 5, 5, &[1, 2, 3]);
        let b = place(&mut sim, 5, 6, &[1, 2, 3]);
        for pid in [a, b] {
            sim.slots.agent_mut(pid).age = REPRODUCTION_AGE;
        }
        for c in 4..=7 {
            sim.world.place_wall(4, c);
            sim.world.place_wall(6, c);
        }
        sim.world.place_wall(5, 4);
        sim.world.place_wall(5, 7);

        let summary = sim
            .step(&actions(&sim, &[(a, Action::Reproduce), (b, Action::Reproduce)]))
            .unwrap();
        assert_eq!(summary.births, 0);
        assert_eq!(sim.agent(a).satiation, 95);
        assert_eq!(sim.agent(b).satiation, 95);
        assert_consistent(&sim);
    }

    #[test]
    fn full_population_cannot_reproduce() {
        let mut sim = build(
            SimConfig {
                max_agents: 2,
                ..small_config()
            },
            true,
        );
        empty(&mut sim);
        let a = place(&mut sim, 5, 5, &[1, 2, 3]);
        let b = place(&mut sim, 5, 6, &[1, 2, 3]);
        for pid in [a, b] {
            sim.slots.agent_mut(pid).age = REPRODUCTION_AGE;
        }
        assert!(sim.slots.is_full());

        let summary = sim
            .step(&actions(&sim, &[(a, Action::Reproduce), (b, Action::Reproduce)]))
            .unwrap();
        assert_eq!(summary.births, 0);
        assert_eq!(sim.alive_count(), 2);
        assert_eq!(sim.agent(a).satiation, 95);
        assert_eq!(sim.agent(b).satiation, 95);
    }

    #[test]
    fn newborn_can_be_killed_in_its_birth_tick() {
        // The child always lands on (4, 5). The attacker above it only
        // reaches it when it acts after the birth, which depends on the
        // shuffled turn order.
        let mut killed_newborn = false;
        for seed in 0..32 {
            let mut sim = build(
                SimConfig {
                    seed: Some(seed),
                    ..small_config()
                },
                true,
            );
            empty(&mut sim);
            let a = place(&mut sim, 5, 5, &[1, 2, 3]);
            let b = place(&mut sim, 5, 6, &[1, 2, 3]);
            let hunter = place(&mut sim, 3, 5, &[0, 0, 0]);
            for pid in [a, b] {
                sim.slots.agent_mut(pid).age = REPRODUCTION_AGE;
            }
            sim.world.place_wall(4, 4);

            let summary = sim
                .step(&actions(
                    &sim,
                    &[
                        (a, Action::Reproduce),
                        (b, Action::Reproduce),
                        (hunter, Action::Attack),
                    ],
                ))
                .unwrap();
            assert_eq!(summary.births, 1);
            if summary.deaths == 1 {
                assert_eq!(sim.world.occupant(4, 5), None);
                assert_eq!(sim.alive_count(), 3);
                assert_eq!(sim.terminals().iter().filter(|&&t| t == 1).count(), 1);
                assert!(
                    [a, b, hunter]
                        .iter()
                        .all(|&pid| sim.terminals()[pid as usize] == 0)
                );
                killed_newborn = true;
            } else {
                assert_eq!(summary.deaths, 0);
                assert!(sim.world.occupant(4, 5).is_some());
            }
            assert_consistent(&sim);
        }
        assert!(killed_newborn);
    }

    #[test]
    fn dead_victim_is_looted_by_every_attacker_until_swept() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let left = place(&mut sim, 2, 2, &[0, 0, 0]);
        let victim = place(&mut sim, 2, 3, &[1, 1, 1]);
        let right = place(&mut sim, 2, 4, &[2, 2, 2]);
        for pid in [left, right] {
            sim.slots.agent_mut(pid).satiation = 50;
        }
        {
            let v = sim.slots.agent_mut(victim);
            v.satiation = MAX_SATIATION + METABOLISM_RATE;
            v.food_carried = 30;
            v.stone_carried = 4;
        }

        let summary = sim
            .step(&actions(
                &sim,
                &[(left, Action::Attack), (right, Action::Attack)],
            ))
            .unwrap();
        assert_eq!(sim.agent(left).facing, Direction::Right);
        assert_eq!(sim.agent(right).facing, Direction::Left);
        for pid in [left, right] {
            assert_eq!(sim.agent(pid).food_carried, 30);
            assert_eq!(sim.agent(pid).stone_carried, 4);
        }
        assert_eq!(sim.agent(victim).hp, -1);
        assert_eq!(summary.deaths, 1);
        assert_eq!(sim.stats.murders, 2);
        assert_eq!(sim.world.occupant(2, 3), None);
        assert_consistent(&sim);
    }

    #[test]
    fn coming_of_age_restores_full_hp() {
        let mut sim = build(small_config(), true);
        empty(&mut sim);
        let pid = place(&mut sim, 1, 1, &[0, 0, 0]);
        sim.slots.agent_mut(pid).age = REPRODUCTION_AGE - 1;
        sim.step(&actions(&sim, &[])).unwrap();
        assert_eq!(sim.agent(pid).hp, MAX_HP);
        assert_eq!(sim.agent(pid).hp_max, MAX_HP);
    }

    #[test]
    fn seasons_turn_and_summer_restarts_growth() {
        let mut sim = build(small_config(), true);
        sim.episode_length = 1_000;
        sim.world.tick = 45; // day 100
        sim.step(&vec![NOOP; 32]).unwrap();
        assert!(sim.world.is_winter());
        assert_eq!(sim.world.crop_available(1, 1), 0);

        sim.world.tick = 55; // day 0
        sim.world.tile_mut(1, 1).last_harvest = 7;
        sim.step(&vec![NOOP; 32]).unwrap();
        assert!(!sim.world.is_winter());
        assert_eq!(sim.world.tile(1, 1).last_harvest, 0);
    }

    #[test]
    fn growth_rate_extinction_scores_penalty_plus_lost_family() {
        let config = SimConfig {
            gene_count: 2,
            reward_mode: RewardMode::GrowthRate,
            ..small_config()
        };
        let mut sim = build(config, true);
        let pids = sim.slots.alive_pids().to_vec();
        for &pid in &pids {
            sim.slots.agent_mut(pid).satiation = METABOLISM_RATE;
        }

        let summary = sim.step(&vec![NOOP; 32]).unwrap();
        assert_eq!(summary.alive, 0);
        let expected = -2.0 + (0.25f64).ln() as f32;
        for &pid in &pids {
            assert_eq!(sim.terminals()[pid as usize], 1);
            assert!((sim.rewards()[pid as usize] - expected).abs() < 1e-6);
        }

        // The next call starts over.
        let summary = sim.step(&vec![NOOP; 32]).unwrap();
        assert!(summary.reset);
        assert_eq!(summary.alive, 2);
        assert_eq!(sim.tick(), 0);
        assert!(sim.terminals().iter().all(|&t| t == 0));
        let log = sim.drain_log();
        assert_eq!(log.n, 1.0);
        assert_eq!(log.episode_length, 1.0);
        assert_eq!(log.starvations, 2.0);
    }

    #[test]
    fn episodes_truncate_at_their_target_length() {
        let config = SimConfig {
            min_episode_length: 5,
            max_episode_length: 6,
            ..small_config()
        };
        let mut sim = build(config, true);
        assert_eq!(sim.episode_length(), 5);
        for tick in 1..=5 {
            let summary = sim.step(&vec![NOOP; 32]).unwrap();
            assert_eq!(summary.tick, tick);
            let truncated = sim.truncations().iter().all(|&t| t == 1);
            assert_eq!(truncated, tick == 5);
        }
        let summary = sim.step(&vec![NOOP; 32]).unwrap();
        assert!(summary.reset);
        assert!(sim.truncations().iter().all(|&t| t == 0));

        let log = sim.drain_log();
        assert_eq!(log.episode_length, 5.0);
        assert_eq!(log.max_population, 2.0);
        assert_eq!(log.min_population, 2.0);
        assert_eq!(log.avg_population, 2.0);
        assert_eq!(log.life_expectancy, 5.0);
    }

    #[test]
    fn random_play_preserves_invariants() {
        let config = SimConfig {
            initial_kin_pairs: 4,
            ..small_config()
        };
        let mut sim = build(config, true);
        let mut policy = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..300 {
            let codes: Vec<i32> = (0..32).map(|_| policy.gen_range(0..11)).collect();
            sim.step(&codes).unwrap();
            assert_consistent(&sim);
            for &pid in sim.slots.alive_pids() {
                let agent = sim.agent(pid);
                assert!(agent.satiation > 0 && agent.hp > 0);
                assert!(agent.food_carried <= MAX_FOOD_CARRIED);
                assert!(agent.stone_carried <= MAX_STONE_CARRIED);
            }
        }
    }
}
