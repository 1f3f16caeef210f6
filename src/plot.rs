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
use rayon::prelude::*;

use dumbbell::{
    experiments::{extract_run, render_run, Algorithm, ExperimentConfig, ExperimentRun, Mode},
    util,
};

/// Extract the series from the raw logs of finished experiments and render their charts again.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Overwrite the input path for raw logs. Series and plots are written next to them.
    #[arg(short, long, default_value = "./results/")]
    results: PathBuf,
    /// JSON file with the experiment configuration, to get the durations and render options.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Only process runs with these algorithms.
    #[arg(short, long, value_enum, value_delimiter = ',')]
    algorithms: Vec<Algorithm>,
    /// Only process runs with these delays.
    #[arg(short, long, value_delimiter = ',')]
    delays: Vec<u32>,
    /// Only process runs of these modes.
    #[arg(short, long, value_enum, value_delimiter = ',')]
    modes: Vec<Mode>,
    /// Do not render PNG charts with gnuplot.
    #[arg(long)]
    no_gnuplot: bool,
}

impl Args {
    fn selects(&self, run: &ExperimentRun) -> bool {
        (self.algorithms.is_empty() || self.algorithms.contains(&run.algorithm))
            && (self.delays.is_empty() || self.delays.contains(&run.delay_ms))
            && (self.modes.is_empty() || self.modes.contains(&run.mode))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging()?;
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    config.results_dir = args.results.clone();
    if args.no_gnuplot {
        config.render.gnuplot = None;
    }

    let runs: Vec<ExperimentRun> = ExperimentRun::discover(&config.results_dir)?
        .into_iter()
        .filter(|r| args.selects(r))
        .collect();
    log::info!(
        "Found {} runs in {}",
        runs.len(),
        config.results_dir.display()
    );

    let extracted: Vec<_> = runs
        .par_iter()
        .map(|run| (run, extract_run(&config, run)))
        .collect();

    let mut failed = 0;
    for (run, series) in extracted {
        let result = match series {
            Ok(series) => render_run(&config, run, &series).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::error!("Cannot process {run}: {e}");
            failed += 1;
        }
    }
    println!("Processed {} runs, {failed} failed", runs.len());

    Ok(())
}
