// Dumbbell: Congestion-Control Experiments on an Emulated Dumbbell Topology
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
use std::path::PathBuf;

use clap::Parser;

use dumbbell::{
    emulator::{DryRunEmulator, Emulator, NetnsEmulator},
    experiments::{run_sweep, Algorithm, ExperimentConfig, ExperimentError, Mode, Sequencer},
    util,
};

/// Run congestion-control experiments on an emulated dumbbell topology.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// JSON file with the experiment configuration. Command-line options take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Congestion-control algorithms to evaluate.
    #[arg(short, long, value_enum, value_delimiter = ',')]
    algorithms: Vec<Algorithm>,
    /// One-way delays of the bottleneck link in ms.
    #[arg(short, long, value_delimiter = ',')]
    delays: Vec<u32>,
    /// Experiment modes to run.
    #[arg(short, long, value_enum, value_delimiter = ',')]
    modes: Vec<Mode>,
    /// Overwrite the output path for logs, series, and plots.
    #[arg(short, long)]
    results: Option<PathBuf>,
    /// Duration of the first flow in seconds.
    #[arg(long)]
    duration: Option<u64>,
    /// Seconds between starting the first and the second flow (cwnd mode).
    #[arg(long)]
    stagger: Option<u64>,
    /// Run system commands with sudo.
    #[arg(long)]
    sudo: bool,
    /// Only print what would be done, without touching the system.
    #[arg(long)]
    dry_run: bool,
    /// Also limit the queues of the host links.
    #[arg(long)]
    host_queues: bool,
    /// Do not render PNG charts with gnuplot.
    #[arg(long)]
    no_gnuplot: bool,
    /// Do not extract series and render charts after each run.
    #[arg(long)]
    no_process: bool,
    /// Remove leftovers of earlier runs and exit.
    #[arg(long)]
    clean_only: bool,
}

impl Args {
    fn config(&self) -> Result<ExperimentConfig, ExperimentError> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };
        if !self.algorithms.is_empty() {
            config.algorithms = self.algorithms.clone();
        }
        if !self.delays.is_empty() {
            config.delays = self.delays.clone();
        }
        if !self.modes.is_empty() {
            config.modes = self.modes.clone();
        }
        if let Some(results) = &self.results {
            config.results_dir = results.clone();
        }
        if let Some(duration) = self.duration {
            config.duration = duration;
        }
        if let Some(stagger) = self.stagger {
            config.stagger = stagger;
        }
        config.sudo |= self.sudo;
        config.host_queues |= self.host_queues;
        if self.no_gnuplot {
            config.render.gnuplot = None;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging()?;

    let args = Args::parse();
    let config = args.config()?;
    log::debug!("{config:?}");

    let process = !args.no_process;

    if args.dry_run {
        sweep(DryRunEmulator::new(), config, process, args.clean_only).await?;
    } else {
        let emu = NetnsEmulator::new(config.namespace_prefix.clone(), config.sudo);
        sweep(emu, config, process, args.clean_only).await?;
    }

    Ok(())
}

async fn sweep<E: Emulator>(
    emu: E,
    config: ExperimentConfig,
    process: bool,
    clean_only: bool,
) -> Result<(), ExperimentError> {
    let mut seq = Sequencer::new(emu, config);
    seq.set_processing(process);

    if clean_only {
        seq.cleanup().await;
        return Ok(());
    }

    let summary = run_sweep(&mut seq).await?;
    print!(
        "{} experiments finished, {} failed.",
        summary.records.len(),
        summary.num_failed(),
    );
    match &summary.path {
        Some(path) => println!(" Summary written to {}", path.display()),
        None => println!(),
    }
    Ok(())
}
