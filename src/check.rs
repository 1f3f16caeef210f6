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
    experiments::{connectivity_check, CheckReport, ExperimentConfig, ExperimentError},
    util,
};

/// Bring up the dumbbell topology, check connectivity and bandwidth between the flow endpoints,
/// and tear it down again.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// JSON file with the experiment configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// One-way delays of the bottleneck link in ms. Defaults to the configured delays.
    #[arg(short, long, value_delimiter = ',')]
    delays: Vec<u32>,
    /// Run system commands with sudo.
    #[arg(long)]
    sudo: bool,
    /// Only print what would be done, without touching the system.
    #[arg(long)]
    dry_run: bool,
    /// Also limit the queues of the host links.
    #[arg(long)]
    host_queues: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging()?;
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    if !args.delays.is_empty() {
        config.delays = args.delays.clone();
    }
    config.sudo |= args.sudo;
    config.host_queues |= args.host_queues;
    config.validate()?;

    let reports = if args.dry_run {
        check_all(DryRunEmulator::new(), &config).await?
    } else {
        let emu = NetnsEmulator::new(config.namespace_prefix.clone(), config.sudo);
        check_all(emu, &config).await?
    };

    let mut ok = true;
    for report in reports {
        println!(
            "delay {} ms (expected rtt {} ms): {}",
            report.delay_ms,
            report.expected_rtt_ms,
            if report.ok() { "ok" } else { "FAILED" }
        );
        for pair in report.pairs.iter() {
            println!("  {pair}");
        }
        ok &= report.ok();
    }

    if !ok {
        return Err("Some flow endpoints cannot reach each other".into());
    }
    Ok(())
}

async fn check_all<E: Emulator>(
    mut emu: E,
    config: &ExperimentConfig,
) -> Result<Vec<CheckReport>, ExperimentError> {
    if let Err(e) = emu.cleanup().await {
        log::warn!("Cleanup failed: {e}");
    }
    let mut reports = Vec::new();
    for delay in config.delays.iter() {
        let report = connectivity_check(&mut emu, config, *delay).await;
        if report.is_err() {
            if let Err(e) = emu.cleanup().await {
                log::warn!("Cleanup failed: {e}");
            }
        }
        reports.push(report?);
    }
    Ok(reports)
}
