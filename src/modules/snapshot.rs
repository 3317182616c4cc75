use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::action::Direction;
use crate::modules::config::{ConfigError, SimConfig};
use crate::modules::grid::{Grid, Tile, day_of_year};
use crate::modules::observation::record_size;
use crate::modules::sim::Territories;
use crate::modules::slots::{Pid, SlotState};
use crate::modules::stats::{EpisodeLog, EpisodeStats};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {field} differs: simulation has {expected}, snapshot has {actual}")]
    Mismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("snapshot holds agent slot {pid} but capacity is {capacity}")]
    SlotOutOfRange { pid: usize, capacity: usize },
    #[error("snapshot config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("agent {pid} at ({row}, {col}) is not on its grid cell")]
    Misplaced { pid: Pid, row: usize, col: usize },
    #[error("occupant grid holds {occupied} agents, alive mask holds {alive}")]
    Occupancy { occupied: usize, alive: usize },
    #[error("failed to access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Full mutable state of a simulation, including the PRNG and the output
/// buffers. The terrain is static and not part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub config: SimConfig,
    pub tick: u32,
    pub is_winter: bool,
    pub episode_length: u32,
    pub tiles: Grid<Tile>,
    pub occupants: Grid<Option<Pid>>,
    pub slots: SlotState,
    pub genomes: Vec<u8>,
    pub kinship: Vec<u8>,
    pub family_sizes: Vec<u16>,
    pub prev_family_sizes: Vec<u16>,
    pub stats: EpisodeStats,
    pub log: EpisodeLog,
    pub rng: ChaCha8Rng,
    pub observations: Vec<u8>,
    pub rewards: Vec<f32>,
    pub terminals: Vec<u8>,
    pub truncations: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub pid: Pid,
    pub row: usize,
    pub col: usize,
    pub facing: Direction,
    pub hp: i32,
    pub satiation: i32,
    pub age: i32,
    pub food_carried: i32,
    pub stone_carried: i32,
    pub role: u8,
    pub genome: Vec<u8>,
    pub family_size: u16,
}

/// Human-oriented digest of a snapshot, printed by `territories snapshot inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub tick: u32,
    pub day: u32,
    pub is_winter: bool,
    pub episode_length: u32,
    pub alive: usize,
    pub walls: usize,
    pub stone_left: u64,
    pub stored_food: u64,
    pub mean_age: f32,
    pub distinct_genomes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub agents: Vec<AgentView>,
}

impl SimSnapshot {
    pub fn alive_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots
            .alive_mask
            .iter()
            .enumerate()
            .filter(|&(_, &alive)| alive != 0)
            .map(|(pid, _)| pid as Pid)
    }

    pub fn genome(&self, pid: Pid) -> &[u8] {
        let g = self.config.gene_count;
        &self.genomes[pid as usize * g..][..g]
    }

    pub fn summary(&self, with_agents: bool) -> SnapshotSummary {
        let tiles = self.tiles.cells();
        let alive: Vec<Pid> = self.alive_pids().collect();
        let total_age: i64 = alive
            .iter()
            .map(|&pid| self.slots.agents[pid as usize].age as i64)
            .sum();
        let mut genomes: Vec<&[u8]> = alive.iter().map(|&pid| self.genome(pid)).collect();
        genomes.sort_unstable();
        genomes.dedup();

        let agents = if with_agents {
            alive
                .iter()
                .map(|&pid| {
                    let agent = &self.slots.agents[pid as usize];
                    AgentView {
                        pid,
                        row: agent.r,
                        col: agent.c,
                        facing: agent.facing,
                        hp: agent.hp,
                        satiation: agent.satiation,
                        age: agent.age,
                        food_carried: agent.food_carried,
                        stone_carried: agent.stone_carried,
                        role: agent.role,
                        genome: self.genome(pid).to_vec(),
                        family_size: self.family_sizes[pid as usize],
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        SnapshotSummary {
            tick: self.tick,
            day: day_of_year(self.tick),
            is_winter: self.is_winter,
            episode_length: self.episode_length,
            alive: alive.len(),
            walls: tiles.iter().filter(|t| t.wall_hp > 0).count(),
            stone_left: tiles.iter().map(|t| t.stone as u64).sum(),
            stored_food: tiles.iter().map(|t| t.stored_food as u64).sum(),
            mean_age: if alive.is_empty() {
                0.0
            } else {
                total_age as f32 / alive.len() as f32
            },
            distinct_genomes: genomes.len(),
            agents,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let io_err = |source: io::Error| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn expect_len(field: &'static str, expected: usize, actual: usize) -> Result<(), SnapshotError> {
    if expected == actual {
        Ok(())
    } else {
        Err(SnapshotError::Mismatch {
            field,
            expected,
            actual,
        })
    }
}

impl Territories {
    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            config: self.config.clone(),
            tick: self.world.tick,
            is_winter: self.world.is_winter,
            episode_length: self.episode_length,
            tiles: self.world.tiles().clone(),
            occupants: self.world.occupants().clone(),
            slots: self.slots.state(),
            genomes: self.genetics.genomes().to_vec(),
            kinship: self.genetics.kinship_matrix().to_vec(),
            family_sizes: self.genetics.family_sizes().to_vec(),
            prev_family_sizes: self.genetics.prev_family_sizes().to_vec(),
            stats: self.stats.clone(),
            log: self.log.clone(),
            rng: self.rng.clone(),
            observations: self.observations.clone(),
            rewards: self.rewards.clone(),
            terminals: self.terminals.clone(),
            truncations: self.truncations.clone(),
        }
    }

    /// Replaces the whole mutable state with `snapshot`. The snapshot must
    /// come from a simulation with the same world size, agent capacity, gene
    /// count and allele count; nothing is changed when it does not.
    pub fn load_snapshot(&mut self, snapshot: SimSnapshot) -> Result<(), SnapshotError> {
        snapshot.config.validate()?;
        let (cfg, other) = (&self.config, &snapshot.config);
        expect_len("width", cfg.width, other.width)?;
        expect_len("height", cfg.height, other.height)?;
        expect_len("max_agents", cfg.max_agents, other.max_agents)?;
        expect_len("gene_count", cfg.gene_count, other.gene_count)?;
        expect_len("allele_count", cfg.allele_count, other.allele_count)?;

        let n = cfg.max_agents;
        let cells = cfg.width * cfg.height;
        expect_len("tiles.width", cfg.width, snapshot.tiles.width())?;
        expect_len("tiles.height", cfg.height, snapshot.tiles.height())?;
        expect_len("occupants.width", cfg.width, snapshot.occupants.width())?;
        expect_len("occupants.height", cfg.height, snapshot.occupants.height())?;
        expect_len("tiles", cells, snapshot.tiles.cells().len())?;
        expect_len("occupants", cells, snapshot.occupants.cells().len())?;
        expect_len("agents", n, snapshot.slots.agents.len())?;
        expect_len("alive_mask", n, snapshot.slots.alive_mask.len())?;
        expect_len("genomes", n * cfg.gene_count, snapshot.genomes.len())?;
        expect_len("kinship", n * n, snapshot.kinship.len())?;
        expect_len("family_sizes", n, snapshot.family_sizes.len())?;
        expect_len("prev_family_sizes", n, snapshot.prev_family_sizes.len())?;
        expect_len("observations", n * record_size(cfg.gene_count), snapshot.observations.len())?;
        expect_len("rewards", n, snapshot.rewards.len())?;
        expect_len("terminals", n, snapshot.terminals.len())?;
        expect_len("truncations", n, snapshot.truncations.len())?;

        let out_of_range = snapshot
            .slots
            .free
            .iter()
            .map(|&pid| pid as usize)
            .chain(snapshot.occupants.cells().iter().flatten().map(|&pid| pid as usize))
            .chain(std::iter::once(snapshot.slots.next_pid.saturating_sub(1)))
            .find(|&pid| pid >= n);
        if let Some(pid) = out_of_range {
            return Err(SnapshotError::SlotOutOfRange { pid, capacity: n });
        }

        let mut alive = 0;
        for pid in snapshot.alive_pids() {
            let agent = &snapshot.slots.agents[pid as usize];
            let placed = agent.r < cfg.height
                && agent.c < cfg.width
                && *snapshot.occupants.get(agent.r, agent.c) == Some(pid);
            if !placed {
                return Err(SnapshotError::Misplaced {
                    pid,
                    row: agent.r,
                    col: agent.c,
                });
            }
            alive += 1;
        }
        let occupied = snapshot.occupants.cells().iter().flatten().count();
        if occupied != alive {
            return Err(SnapshotError::Occupancy { occupied, alive });
        }

        let restored = self.genetics.restore(
            snapshot.genomes,
            snapshot.kinship,
            snapshot.family_sizes,
            snapshot.prev_family_sizes,
        );
        debug_assert!(restored, "genetics buffers were validated above");

        self.world.tick = snapshot.tick;
        self.world.is_winter = snapshot.is_winter;
        self.world.restore(snapshot.tiles, snapshot.occupants);
        self.slots.restore(snapshot.slots);
        self.config = snapshot.config;
        self.episode_length = snapshot.episode_length;
        self.stats = snapshot.stats;
        self.log = snapshot.log;
        self.rng = snapshot.rng;
        self.observations = snapshot.observations;
        self.rewards = snapshot.rewards;
        self.terminals = snapshot.terminals;
        self.truncations = snapshot.truncations;
        Ok(())
    }
}
