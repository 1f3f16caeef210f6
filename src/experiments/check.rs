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
//! Sanity check of an emulated network before running experiments on it: reachability and
//! round-trip time between the flow endpoints, and a short bandwidth probe per flow.

use std::{fmt, fs, time::Duration};

use super::{ExperimentConfig, ExperimentError, FLOWS};
use crate::{
    emulator::{Emulator, PingResult, ProcessOutput},
    extract,
    topology::{Node, Topology},
    util::PathBufExt,
};

/// Echo requests sent in each direction.
pub const PING_COUNT: u32 = 9;
/// Duration of the bandwidth probe, in seconds.
pub const PROBE_DURATION: u64 = 10;

/// Result of checking one client/server pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairCheck {
    pub client: Node,
    pub server: Node,
    pub forward: PingResult,
    pub backward: PingResult,
    /// Mean throughput of the probe in Mbps, if the probe reported anything.
    pub throughput_mbps: Option<f64>,
}

impl PairCheck {
    pub fn reachable(&self) -> bool {
        self.forward.received > 0 && self.backward.received > 0
    }
}

impl fmt::Display for PairCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rtt = |p: &PingResult| {
            p.rtt_avg_ms
                .map(|r| format!("{r:.1} ms"))
                .unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "{} <-> {}: loss {:.0}% / {:.0}%, rtt {} / {}, throughput {}",
            self.client,
            self.server,
            100.0 * self.forward.loss(),
            100.0 * self.backward.loss(),
            rtt(&self.forward),
            rtt(&self.backward),
            self.throughput_mbps
                .map(|t| format!("{t:.1} Mbps"))
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

/// Result of checking the network for a given bottleneck delay.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub delay_ms: u32,
    /// Expected round-trip time between the flow endpoints.
    pub expected_rtt_ms: u32,
    pub connections: Vec<String>,
    pub pairs: Vec<PairCheck>,
}

impl CheckReport {
    /// All flow endpoints can reach each other.
    pub fn ok(&self) -> bool {
        self.pairs.iter().all(PairCheck::reachable)
    }
}

/// Start the dumbbell with the given delay, check it, and tear it down again.
pub async fn connectivity_check<E: Emulator>(
    emu: &mut E,
    config: &ExperimentConfig,
    delay_ms: u32,
) -> Result<CheckReport, ExperimentError> {
    let topo = Topology::dumbbell_with(delay_ms, config.host_queues);
    emu.start(&topo).await?;
    let result = check_pairs(emu, config, &topo).await;
    let stopped = emu.stop().await;
    let pairs = result?;
    stopped?;

    let report = CheckReport {
        delay_ms,
        expected_rtt_ms: topo.rtt_ms(),
        connections: topo.dump_connections(),
        pairs,
    };
    for pair in report.pairs.iter() {
        log::info!("{pair}");
    }
    Ok(report)
}

async fn check_pairs<E: Emulator>(
    emu: &mut E,
    config: &ExperimentConfig,
    topo: &Topology,
) -> Result<Vec<PairCheck>, ExperimentError> {
    log::info!("Dumping host connections");
    for line in topo.dump_connections() {
        log::info!("{line}");
    }

    let mut pairs = Vec::new();
    for (client, server) in FLOWS {
        log::info!("Testing connectivity between {client} and {server}");
        let forward = emu.ping(client, server, PING_COUNT).await?;
        let backward = emu.ping(server, client, PING_COUNT).await?;
        let throughput_mbps = probe(emu, config, client, server).await?;
        pairs.push(PairCheck {
            client,
            server,
            forward,
            backward,
            throughput_mbps,
        });
    }
    Ok(pairs)
}

/// Short `iperf3` test from `client` to `server`. Returns the mean throughput reported by the
/// client.
async fn probe<E: Emulator>(
    emu: &mut E,
    config: &ExperimentConfig,
    client: Node,
    server: Node,
) -> Result<Option<f64>, ExperimentError> {
    if emu.writes_output() {
        fs::create_dir_all(&config.results_dir)?;
    }
    let log_file = config.results_dir.as_path().then(format!("check_{client}_{server}"));
    let ip = emu.host_ip(server)?;

    log::info!("Testing bandwidth between {client} and {server}");
    let mut srv = emu
        .popen(server, &config.iperf.server(false), ProcessOutput::Null)
        .await?;
    if !emu.is_dry_run() {
        tokio::time::sleep(config.server_warmup()).await;
    }
    let mut cli = emu
        .popen(
            client,
            &config.iperf.probe(ip, PROBE_DURATION),
            ProcessOutput::File(log_file.clone()),
        )
        .await?;
    let finished = cli
        .wait(Duration::from_secs(PROBE_DURATION) + config.wait_grace())
        .await;
    srv.terminate().await?;
    finished?;
    if !emu.writes_output() {
        return Ok(None);
    }

    let text = fs::read_to_string(&log_file)?;
    match extract::throughput_series(format!("{client}-{server}"), &text) {
        Ok(series) => Ok(series.mean()),
        Err(e) => {
            log::warn!("Bandwidth probe from {client} to {server} failed: {e}");
            Ok(None)
        }
    }
}
