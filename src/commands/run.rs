use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Args;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use territories::{
    Action, FileTerrain, RewardMode, SimConfig, SimSnapshot, Territories, TerrainProvider,
    UniformTerrain,
};
use tracing::info;

use super::SizeArg;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON config file (see `territories config`); defaults apply otherwise
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Number of ticks to run
    #[arg(short = 't', long, default_value_t = 1_000)]
    pub ticks: u64,
    /// RNG seed for both the simulation and the random policy
    #[arg(long)]
    pub seed: Option<u64>,
    /// Override the world size as <width>x<height>
    #[arg(long, value_name = "WxH")]
    pub size: Option<SizeArg>,
    /// Override the agent capacity
    #[arg(long)]
    pub max_agents: Option<usize>,
    /// Use log-growth-rate rewards instead of family-size deltas
    #[arg(long, default_value_t = false)]
    pub growth_rate: bool,
    /// Directory holding `is_soil_<w>_<h>.bin` / `<map>.bin` terrain files.
    /// Without it every cell is soil.
    #[arg(long)]
    pub map_dir: Option<PathBuf>,
    /// Resume from a snapshot instead of starting a fresh episode
    #[arg(long)]
    pub resume: Option<PathBuf>,
    /// Save a snapshot here when the run ends
    #[arg(long)]
    pub snapshot_out: Option<PathBuf>,
    /// Log a progress line every N ticks (0 disables)
    #[arg(long, default_value_t = 100)]
    pub report_every: u64,
    /// Delay between ticks in milliseconds
    #[arg(short = 'd', long, default_value_t = 0)]
    pub delay_ms: u64,
}

fn build_config(args: &RunArgs) -> Result<SimConfig, String> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(size) = args.size {
        config.width = size.width;
        config.height = size.height;
    }
    if let Some(max_agents) = args.max_agents {
        config.max_agents = max_agents;
    }
    if args.growth_rate {
        config.reward_mode = RewardMode::GrowthRate;
    }
    Ok(config)
}

fn build_sim(config: SimConfig, map_dir: Option<&PathBuf>) -> Result<Territories, String> {
    let provider: Box<dyn TerrainProvider> = match map_dir {
        Some(dir) => Box::new(FileTerrain::new(dir)),
        None => Box::new(UniformTerrain::default()),
    };
    Territories::new(config, provider.as_ref()).map_err(|e| e.to_string())
}

pub fn run_rollout(args: RunArgs) -> Result<(), String> {
    let config = build_config(&args)?;
    let policy_seed = config.seed.map(|s| s.wrapping_add(1));
    let mut sim = build_sim(config, args.map_dir.as_ref())?;

    if let Some(path) = &args.resume {
        let snapshot = SimSnapshot::load(path).map_err(|e| e.to_string())?;
        sim.load_snapshot(snapshot).map_err(|e| e.to_string())?;
        info!(path = %path.display(), tick = sim.tick(), "resumed from snapshot");
    }

    let mut policy = match policy_seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::seed_from_u64(rand::random()),
    };
    let slots = sim.config().max_agents;
    let mut actions = vec![Action::Noop.code(); slots];
    let (mut births, mut deaths, mut episodes) = (0usize, 0usize, 0usize);

    for tick in 1..=args.ticks {
        for code in actions.iter_mut() {
            *code = policy.gen_range(0..Action::COUNT as i32);
        }
        let summary = sim.step(&actions).map_err(|e| e.to_string())?;
        births += summary.births;
        deaths += summary.deaths;
        if summary.reset {
            episodes += 1;
        }

        if args.report_every > 0 && tick % args.report_every == 0 {
            info!(
                tick,
                episode_tick = summary.tick,
                alive = summary.alive,
                births,
                deaths,
                episodes,
                "rollout progress"
            );
        }
        if args.delay_ms > 0 {
            thread::sleep(Duration::from_millis(args.delay_ms));
        }
    }

    println!(
        "Ran {} ticks: {} births, {} deaths, {} episodes finished, {} agents alive",
        args.ticks,
        births,
        deaths,
        episodes,
        sim.alive_count()
    );
    let log = sim.drain_log();
    if !log.is_empty() {
        let json = serde_json::to_string_pretty(&log).map_err(|e| e.to_string())?;
        println!("{}", json);
    }

    if let Some(path) = &args.snapshot_out {
        sim.snapshot().save(path).map_err(|e| e.to_string())?;
        println!("Snapshot saved to {}", path.display());
    }
    Ok(())
}
