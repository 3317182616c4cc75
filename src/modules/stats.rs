use serde::{Deserialize, Serialize};

/// Counters for the episode in progress. Cleared every time the episode is
/// flushed into the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub births: u64,
    pub starvations: u64,
    pub murders: u64,
    pub stone_mined: u64,
    pub walls_built: u64,
    pub walls_destroyed: u64,
    pub food_stored: u64,
    pub food_eaten: u64,
    pub max_population: usize,
    /// `None` until the first population sample.
    pub min_population: Option<usize>,
    pub population_sum: u64,
    pub population_samples: u32,
    pub total_reward: f32,
}

impl EpisodeStats {
    pub fn sample_population(&mut self, alive: usize) {
        self.population_sum += alive as u64;
        self.population_samples += 1;
        self.max_population = self.max_population.max(alive);
        self.min_population = Some(self.min_population.map_or(alive, |min| min.min(alive)));
    }
}

/// Per-episode figures summed over every flushed episode since the last
/// drain. [`EpisodeLog::mean`] turns the sums into per-episode averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLog {
    pub births: f32,
    pub starvations: f32,
    pub murders: f32,
    pub stone_mined: f32,
    pub walls_built: f32,
    pub walls_destroyed: f32,
    pub food_stored: f32,
    pub food_eaten: f32,
    pub avg_population: f32,
    pub max_population: f32,
    pub min_population: f32,
    pub total_reward: f32,
    pub episode_length: f32,
    pub life_expectancy: f32,
    pub genetic_diversity: f32,
    /// Number of episodes summed.
    pub n: f32,
}

impl EpisodeLog {
    /// Adds a finished episode of `tick` ticks and clears `stats`.
    pub fn record(
        &mut self,
        stats: &mut EpisodeStats,
        tick: u32,
        life_expectancy: f32,
        genetic_diversity: f32,
    ) {
        let sampled = stats.population_samples.max(1);
        self.births += stats.births as f32;
        self.starvations += stats.starvations as f32;
        self.murders += stats.murders as f32;
        self.stone_mined += stats.stone_mined as f32;
        self.walls_built += stats.walls_built as f32;
        self.walls_destroyed += stats.walls_destroyed as f32;
        self.food_stored += stats.food_stored as f32;
        self.food_eaten += stats.food_eaten as f32;
        self.max_population += stats.max_population as f32;
        self.min_population += stats.min_population.unwrap_or(0) as f32;
        self.avg_population += stats.population_sum as f32 / sampled as f32;
        self.total_reward += stats.total_reward;
        self.episode_length += tick as f32;
        self.life_expectancy += life_expectancy;
        self.genetic_diversity += genetic_diversity;
        self.n += 1.0;
        *stats = EpisodeStats::default();
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0.0
    }

    /// Per-episode averages; `n` keeps the episode count.
    pub fn mean(&self) -> EpisodeLog {
        if self.is_empty() {
            return EpisodeLog::default();
        }
        let n = self.n;
        EpisodeLog {
            births: self.births / n,
            starvations: self.starvations / n,
            murders: self.murders / n,
            stone_mined: self.stone_mined / n,
            walls_built: self.walls_built / n,
            walls_destroyed: self.walls_destroyed / n,
            food_stored: self.food_stored / n,
            food_eaten: self.food_eaten / n,
            avg_population: self.avg_population / n,
            max_population: self.max_population / n,
            min_population: self.min_population / n,
            total_reward: self.total_reward / n,
            episode_length: self.episode_length / n,
            life_expectancy: self.life_expectancy / n,
            genetic_diversity: self.genetic_diversity / n,
            n,
        }
    }

    /// Returns the averages and starts a fresh log.
    pub fn drain(&mut self) -> EpisodeLog {
        let mean = self.mean();
        *self = EpisodeLog::default();
        mean
    }
}
