use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use territories::SimConfig;

mod run;
mod snapshot;

use run::{RunArgs, run_rollout};
use snapshot::{SnapshotCommand, run_snapshot};

#[derive(Parser)]
#[command(
    name = "territories",
    version,
    about = "Territories multi-agent grid simulation (seasons, kinship, walls)",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Roll out the simulation with a uniformly random policy
    Run(RunArgs),
    /// Inspect a saved simulation snapshot
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    /// Print the default configuration as JSON
    Config {
        /// Write the configuration to this file instead of stdout
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },
}

/// World dimensions given as `<width>x<height>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeArg {
    pub width: usize,
    pub height: usize,
}

impl FromStr for SizeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((w, h)) = s.trim().split_once(['x', 'X']) else {
            return Err("Size must be formatted as <width>x<height>".into());
        };
        let width = w
            .trim()
            .parse::<usize>()
            .map_err(|_| "width must be a positive integer")?;
        let height = h
            .trim()
            .parse::<usize>()
            .map_err(|_| "height must be a positive integer")?;
        if width == 0 || height == 0 {
            return Err("width and height must be positive".into());
        }
        Ok(SizeArg { width, height })
    }
}

pub fn run() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli.command) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Run(args) => run_rollout(args),
        Command::Snapshot { command } => run_snapshot(command),
        Command::Config { out } => run_config(out),
    }
}

fn run_config(out: Option<PathBuf>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(&SimConfig::default()).map_err(|e| e.to_string())?;
    match out {
        Some(path) => {
            fs::write(&path, json).map_err(|e| format!("{}: {}", path.display(), e))?;
            println!("Wrote default config to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
