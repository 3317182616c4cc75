use std::fs;
use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crop growth rate: yield after `d` growth days is `floor(e^(K*d)) - 1`.
pub const CROP_GROWTH_K: f64 = 0.07167543;
/// Crop stops growing after this many days.
pub const MAX_GROWTH_DURATION: i32 = 70;
/// Day of the year an episode starts on.
pub const STARTING_DAY: u32 = 55;
pub const SUMMER_DURATION: u32 = 100;
pub const WINTER_DURATION: u32 = 10;
pub const YEAR_LENGTH: u32 = SUMMER_DURATION + WINTER_DURATION;
pub const WALL_HP_MAX: u16 = 8;
pub const MAX_SATIATION: i32 = 100;
pub const MAX_HP: i32 = 3;
pub const MAX_FOOD_CARRIED: i32 = 150;
pub const MAX_STONE_CARRIED: i32 = 10;
pub const MAX_FOOD_STORED: i32 = 150;
/// Stone units in a freshly seeded deposit.
pub const STONE_PER_DEPOSIT: u16 = 600;
pub const VISION_RADIUS: i32 = 4;
/// Satiation burned by every agent each tick.
pub const METABOLISM_RATE: i32 = 5;
/// Age at which an agent becomes an adult (full hp, may reproduce).
pub const REPRODUCTION_AGE: i32 = 10;
/// Age that maps to 255 in observations.
pub const OBSERVED_MAX_AGE: f32 = 100.0;

/// Largest gene count the observation layout supports.
pub const MAX_GENES: usize = 3;
/// Alleles are stored as bytes and observed as `allele + 1`.
pub const MAX_ALLELES: usize = 254;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Change in family size divided by the gene count.
    #[default]
    Delta,
    /// Log growth rate of family size, with an extinction penalty.
    GrowthRate,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("gene_count must be in 0..={max}, got {0}", max = MAX_GENES)]
    GeneCount(usize),
    #[error("world dimensions must be positive, got {width}x{height}")]
    WorldSize { width: usize, height: usize },
    #[error("max_agents must be positive")]
    NoAgents,
    #[error("max_agents * gene_count must fit family sizes in u16, got {0}")]
    FamilyOverflow(usize),
    #[error("role_count must be in 1..=254, got {0}")]
    RoleCount(usize),
    #[error("min_episode_length must be positive")]
    ZeroMinEpisode,
    #[error("min_episode_length ({min}) must be below max_episode_length ({max})")]
    EpisodeRange { min: u32, max: u32 },
    #[error("extinction_reward must be negative, got {0}")]
    ExtinctionReward(f32),
    #[error("allele_count must be in 1..={max}, got {0}", max = MAX_ALLELES)]
    AlleleCount(usize),
    #[error("initial_kin_pairs ({pairs}) needs {needed} slots but max_agents is {max_agents}")]
    TooManyFounders {
        pairs: usize,
        needed: usize,
        max_agents: usize,
    },
}

/// Static configuration for a territories simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub gene_count: usize,
    pub allele_count: usize,
    pub width: usize,
    pub height: usize,
    pub max_agents: usize,
    pub role_count: usize,
    pub min_episode_length: u32,
    pub max_episode_length: u32,
    /// Reward for an agent whose whole family died this tick.
    pub extinction_reward: f32,
    pub reward_mode: RewardMode,
    /// Terrain map to load; empty or `None` selects the default map.
    pub map_name: Option<String>,
    /// Number of sibling pairs placed on reset.
    pub initial_kin_pairs: usize,
    /// Optional RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gene_count: 3,
            allele_count: 4,
            width: 96,
            height: 96,
            max_agents: 512,
            role_count: 2,
            min_episode_length: 512,
            max_episode_length: 576,
            extinction_reward: -2.0,
            reward_mode: RewardMode::Delta,
            map_name: None,
            initial_kin_pairs: 2,
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gene_count > MAX_GENES {
            return Err(ConfigError::GeneCount(self.gene_count));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::WorldSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.max_agents == 0 {
            return Err(ConfigError::NoAgents);
        }
        let family_max = self.max_agents.saturating_mul(self.gene_count.max(1));
        if family_max > u16::MAX as usize {
            return Err(ConfigError::FamilyOverflow(family_max));
        }
        if self.role_count == 0 || self.role_count > 254 {
            return Err(ConfigError::RoleCount(self.role_count));
        }
        if self.min_episode_length == 0 {
            return Err(ConfigError::ZeroMinEpisode);
        }
        if self.min_episode_length >= self.max_episode_length {
            return Err(ConfigError::EpisodeRange {
                min: self.min_episode_length,
                max: self.max_episode_length,
            });
        }
        // Written as a negated comparison so NaN is rejected too.
        if !(self.extinction_reward < 0.0) {
            return Err(ConfigError::ExtinctionReward(self.extinction_reward));
        }
        if self.allele_count == 0 || self.allele_count > MAX_ALLELES {
            return Err(ConfigError::AlleleCount(self.allele_count));
        }
        let needed = self.initial_kin_pairs.saturating_mul(2);
        if needed > self.max_agents {
            return Err(ConfigError::TooManyFounders {
                pairs: self.initial_kin_pairs,
                needed,
                max_agents: self.max_agents,
            });
        }
        Ok(())
    }

    /// Map name with the empty string folded into `None`.
    pub fn map(&self) -> Option<&str> {
        self.map_name.as_deref().filter(|name| !name.is_empty())
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    pub fn seeded_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                ChaCha8Rng::seed_from_u64(seed)
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let bytes = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            format!(
                "failed to parse config {}; run `territories config` for a template: {}",
                path.display(),
                e
            )
        })
    }
}
