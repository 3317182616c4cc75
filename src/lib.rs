pub mod modules;

pub use modules::action::{Action, Direction};
pub use modules::bitset::BitSet;
pub use modules::config::{self, ConfigError, RewardMode, SimConfig};
pub use modules::genetics::Genetics;
pub use modules::grid::{Grid, Tile, World, crop_yield, day_of_year, is_summer_day};
pub use modules::observation::{self, record_size, to_byte};
pub use modules::reward::{compute_rewards, delta_reward, growth_rate_reward};
pub use modules::sim::{SimError, Territories, TickSummary};
pub use modules::slots::{Agent, Pid, SlotAllocator, SlotState};
pub use modules::snapshot::{AgentView, SimSnapshot, SnapshotError, SnapshotSummary};
pub use modules::stats::{EpisodeLog, EpisodeStats};
pub use modules::terrain::{FileTerrain, Terrain, TerrainError, TerrainProvider, UniformTerrain};
