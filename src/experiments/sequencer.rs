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
//! Sequencing of a single experiment run: bring up the network, start servers and staggered
//! clients, wait for them, tear everything down, and process the output.

use std::{fs, time::Duration};

use itertools::Itertools;

use super::{flow_label, ExperimentConfig, ExperimentError, ExperimentRun, Mode, FLOWS};
use crate::{
    emulator::{Emulator, HostProcess, ProcessOutput},
    extract,
    series::TimeSeries,
    topology::Topology,
};

/// Executes experiment runs on an emulator.
#[derive(Debug)]
pub struct Sequencer<E> {
    emu: E,
    config: ExperimentConfig,
    process: bool,
}

impl<E: Emulator> Sequencer<E> {
    pub fn new(emu: E, config: ExperimentConfig) -> Self {
        Self {
            emu,
            config,
            process: true,
        }
    }

    /// Select whether the output of a run is extracted and plotted right after the run.
    pub fn set_processing(&mut self, process: bool) {
        self.process = process;
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn emulator(&self) -> &E {
        &self.emu
    }

    /// Remove leftovers of the emulator, only logging errors.
    pub async fn cleanup(&mut self) {
        if let Err(e) = self.emu.cleanup().await {
            log::warn!("Cleanup with {} failed: {e}", self.emu.description());
        }
    }

    /// Execute a single run. Once the network is up, it is stopped and cleaned up afterwards even
    /// if driving the traffic fails. Returns the extracted series, one per flow, or nothing if
    /// processing is disabled or the emulator writes no output. Results of earlier runs are only
    /// removed if the emulator replaces them.
    pub async fn run(&mut self, run: &ExperimentRun) -> Result<Vec<TimeSeries>, ExperimentError> {
        let writes_output = self.emu.writes_output();
        if writes_output {
            let dir = self.config.results_dir.clone();
            fs::create_dir_all(&dir)?;
            run.remove_stale(&dir)?;
        }

        let topo = Topology::dumbbell_with(run.delay_ms, self.config.host_queues);
        for link in topo.links() {
            log::debug!("{link}");
        }
        self.emu.start(&topo).await?;

        let measured = self.measure(run, &topo).await;

        log::info!("Stopping test");
        let stopped = self.emu.stop().await;
        self.cleanup().await;
        measured?;
        stopped?;

        if !(self.process && writes_output) {
            return Ok(Vec::new());
        }
        log::info!("Processing data");
        process_run(&self.config, run).await
    }

    /// Drive the traffic of a run on the running network. Servers are terminated even if driving
    /// the clients fails.
    async fn measure(
        &mut self,
        run: &ExperimentRun,
        topo: &Topology,
    ) -> Result<(), ExperimentError> {
        log::info!("Dumping host connections");
        for line in topo.dump_connections() {
            log::info!("{line}");
        }
        log::info!(
            "Host addresses: {}",
            topo.hosts()
                .filter_map(|h| topo.host_ip(h).map(|ip| format!("{h}: {ip}")))
                .join(", ")
        );

        let mut servers = Vec::new();
        let result = self.drive(run, &mut servers).await;

        log::info!("Terminating the iperf servers");
        for mut server in servers {
            if let Err(e) = server.terminate().await {
                log::warn!("Cannot terminate {}: {e}", server.name());
            }
        }
        result
    }

    async fn drive(
        &mut self,
        run: &ExperimentRun,
        servers: &mut Vec<HostProcess>,
    ) -> Result<(), ExperimentError> {
        let dir = &self.config.results_dir;
        let iperf = &self.config.iperf;
        let algorithm = run.algorithm.to_string();
        let report = run.mode == Mode::Fairness;
        let dry_run = self.emu.is_dry_run();

        for (_, server) in FLOWS {
            log::info!("Starting iperf server {server}");
            let output = if report {
                ProcessOutput::File(run.raw_log(dir, server))
            } else {
                ProcessOutput::Null
            };
            servers.push(self.emu.popen(server, &iperf.server(report), output).await?);
        }
        if dry_run {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.server_warmup()).await;
        }

        let [(c1, s1), (c2, s2)] = FLOWS;
        let (ip1, ip2) = (self.emu.host_ip(s1)?, self.emu.host_ip(s2)?);
        let grace = self.config.wait_grace();

        match run.mode {
            Mode::Cwnd => {
                let stagger = self.config.stagger;
                let second = self.config.staggered_duration();

                log::info!("Starting iperf client {c1}");
                let mut first_client = self
                    .emu
                    .popen(
                        c1,
                        &iperf.client(ip1, self.config.duration, &algorithm),
                        ProcessOutput::File(run.raw_log(dir, c1)),
                    )
                    .await?;

                wait(dry_run, stagger, &format!("before starting client {c2}")).await;

                log::info!("Starting iperf client {c2}");
                let mut second_client = self
                    .emu
                    .popen(
                        c2,
                        &iperf.client(ip2, second, &algorithm),
                        ProcessOutput::File(run.raw_log(dir, c2)),
                    )
                    .await?;

                wait(dry_run, second, "for the clients to finish").await;
                second_client.wait(grace).await?;
                first_client.wait(grace).await?;
            }
            Mode::Fairness => {
                let duration = self.config.duration;
                let mut clients = Vec::new();
                for (client, ip) in [(c1, ip1), (c2, ip2)] {
                    log::info!("Starting iperf client {client}");
                    clients.push(
                        self.emu
                            .popen(
                                client,
                                &iperf.fairness_client(ip, duration, &algorithm),
                                ProcessOutput::Null,
                            )
                            .await?,
                    );
                }

                wait(dry_run, duration, "for the clients to finish").await;
                for client in clients.iter_mut() {
                    client.wait(grace).await?;
                }
            }
        }

        Ok(())
    }
}

/// Sleep for `secs` seconds, logging the remaining time every 20 seconds.
pub async fn countdown(secs: u64, what: &str) {
    log::info!("Waiting {secs} s {what}");
    for remaining in (1..=secs).rev() {
        if remaining % 20 == 0 {
            log::debug!("{remaining} s remaining {what}");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Wait for the traffic of a run. A dry run only lets other tasks progress.
async fn wait(dry_run: bool, secs: u64, what: &str) {
    if dry_run {
        log::info!("[dry-run] waiting {secs} s {what}");
        tokio::task::yield_now().await;
    } else {
        countdown(secs, what).await;
    }
}

/// Extract the series of a finished run and render them. A chart that cannot be rendered is
/// only logged, the extracted series are returned anyway.
pub async fn process_run(
    config: &ExperimentConfig,
    run: &ExperimentRun,
) -> Result<Vec<TimeSeries>, ExperimentError> {
    let series = extract_run(config, run)?;
    if let Err(e) = render_run(config, run, &series).await {
        log::error!("Cannot render the chart of {run}: {e}");
    }
    Ok(series)
}

/// Render the chart of a run from its extracted series.
pub async fn render_run(
    config: &ExperimentConfig,
    run: &ExperimentRun,
    series: &[TimeSeries],
) -> Result<(), ExperimentError> {
    let dir = &config.results_dir;
    let chart = run.chart(dir, config.duration);
    config.render.render(&chart, series, &run.plot_file(dir)).await?;
    Ok(())
}

/// Extract the series of both flows of `run` from the raw logs and store them next to the logs.
/// The second flow of a cwnd run is shifted by the stagger.
pub fn extract_run(
    config: &ExperimentConfig,
    run: &ExperimentRun,
) -> Result<Vec<TimeSeries>, ExperimentError> {
    let dir = &config.results_dir;
    log::debug!("Extracting {run}");
    run.logged_hosts()
        .into_iter()
        .enumerate()
        .map(|(i, host)| {
            let text = fs::read_to_string(run.raw_log(dir, host))?;
            let series = match run.mode {
                Mode::Cwnd => {
                    let offset = if i == 0 { 0.0 } else { config.stagger as f64 };
                    extract::cwnd_series(flow_label(i), &text, offset)?
                }
                Mode::Fairness => extract::throughput_series(flow_label(i), &text)?,
            };
            series.write_to(run.series_file(dir, host))?;
            Ok(series)
        })
        .collect()
}
