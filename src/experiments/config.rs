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
//! Configuration of an experiment sweep, loadable from a JSON file.

use std::{fs, path::PathBuf, time::Duration};

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use super::{Algorithm, ExperimentError, ExperimentRun, Mode};
use crate::{iperf::IperfOptions, render::RenderOptions};

/// All parameters of an experiment sweep. Missing fields in a configuration file take their
/// default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub algorithms: Vec<Algorithm>,
    /// One-way bottleneck delays in ms.
    pub delays: Vec<u32>,
    pub modes: Vec<Mode>,
    /// Directory receiving raw logs, extracted series, charts and summaries.
    pub results_dir: PathBuf,
    /// Duration of the first flow, in seconds. Both flows end together.
    pub duration: u64,
    /// Seconds between the start of the first and the second flow in cwnd runs.
    pub stagger: u64,
    /// Seconds to wait after starting the servers before starting any client.
    pub server_warmup: u64,
    /// Additional seconds that clients get to finish after their duration elapsed.
    pub wait_grace: u64,
    /// Also limit the queues of the host links.
    pub host_queues: bool,
    /// Prefix system commands with `sudo`.
    pub sudo: bool,
    /// Prefix of the network namespaces created for the hosts.
    pub namespace_prefix: String,
    pub iperf: IperfOptions,
    pub render: RenderOptions,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            algorithms: vec![
                Algorithm::Reno,
                Algorithm::Cubic,
                Algorithm::Htcp,
                Algorithm::Vegas,
            ],
            delays: vec![21, 81, 162],
            modes: vec![Mode::Cwnd, Mode::Fairness],
            results_dir: PathBuf::from("results"),
            duration: 500,
            stagger: 62,
            server_warmup: 5,
            wait_grace: 30,
            host_queues: false,
            sudo: false,
            namespace_prefix: "dumbbell".to_string(),
            iperf: IperfOptions::default(),
            render: RenderOptions::default(),
        }
    }
}

impl ExperimentConfig {
    /// Read the configuration from a JSON file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ExperimentError> {
        let path = path.into();
        log::debug!("Loading configuration from {}", path.display());
        let config: Self = serde_json::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.algorithms.is_empty() {
            return Err(ExperimentError::Config("no algorithms selected".to_string()));
        }
        if self.delays.is_empty() {
            return Err(ExperimentError::Config("no delays selected".to_string()));
        }
        if self.modes.is_empty() {
            return Err(ExperimentError::Config("no modes selected".to_string()));
        }
        if self.delays.contains(&0) {
            return Err(ExperimentError::Config(
                "the bottleneck delay must be positive".to_string(),
            ));
        }
        if self.stagger >= self.duration {
            return Err(ExperimentError::Config(format!(
                "the stagger ({} s) must be shorter than the duration ({} s)",
                self.stagger, self.duration
            )));
        }
        Ok(())
    }

    /// Duration of the second flow in cwnd runs, such that both flows end at the same time.
    pub fn staggered_duration(&self) -> u64 {
        self.duration.saturating_sub(self.stagger)
    }

    pub fn server_warmup(&self) -> Duration {
        Duration::from_secs(self.server_warmup)
    }

    pub fn wait_grace(&self) -> Duration {
        Duration::from_secs(self.wait_grace)
    }

    /// All runs of the sweep: for each algorithm and delay, one run per mode.
    pub fn runs(&self) -> Vec<ExperimentRun> {
        iproduct!(&self.algorithms, &self.delays, &self.modes)
            .map(|(a, d, m)| ExperimentRun::new(*a, *d, *m))
            .collect()
    }
}
