use std::path::PathBuf;

use clap::Subcommand;
use territories::SimSnapshot;

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Print a summary of a saved snapshot
    Inspect {
        /// Snapshot file written by `territories run --snapshot-out`
        path: PathBuf,
        /// Include one entry per living agent
        #[arg(long, default_value_t = false)]
        agents: bool,
    },
    /// Print the raw snapshot state
    Dump {
        path: PathBuf,
    },
}

pub fn run_snapshot(command: SnapshotCommand) -> Result<(), String> {
    match command {
        SnapshotCommand::Inspect { path, agents } => {
            let snapshot = SimSnapshot::load(&path).map_err(|e| e.to_string())?;
            let summary = snapshot.summary(agents);
            let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        SnapshotCommand::Dump { path } => {
            let snapshot = SimSnapshot::load(&path).map_err(|e| e.to_string())?;
            println!(
                "tick {} of {} ({}), {} alive",
                snapshot.tick,
                snapshot.episode_length,
                if snapshot.is_winter { "winter" } else { "summer" },
                snapshot.alive_pids().count()
            );
            for pid in snapshot.alive_pids() {
                let agent = &snapshot.slots.agents[pid as usize];
                println!(
                    "  #{:<4} ({:>3},{:>3}) {:?} hp={} sat={} age={} food={} stone={} genome={:?}",
                    pid,
                    agent.r,
                    agent.c,
                    agent.facing,
                    agent.hp,
                    agent.satiation,
                    agent.age,
                    agent.food_carried,
                    agent.stone_carried,
                    snapshot.genome(pid)
                );
            }
        }
    }
    Ok(())
}
