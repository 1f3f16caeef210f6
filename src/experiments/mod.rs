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
//! Module facilitating to run congestion-control experiments on the emulated dumbbell.

pub mod check;
pub mod config;
pub mod runner;
pub mod sequencer;

pub use check::*;
pub use config::*;
pub use runner::*;
pub use sequencer::*;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    emulator::EmulatorError,
    extract::ExtractError,
    render::{Chart, RenderError},
    series::SeriesError,
    topology::Node,
    util::PathBufExt,
};

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Emulator Error: {0}")]
    Emulator(#[from] EmulatorError),
    #[error("Extraction Error: {0}")]
    Extract(#[from] ExtractError),
    #[error("Series Error: {0}")]
    Series(#[from] SeriesError),
    #[error("Render Error: {0}")]
    Render(#[from] RenderError),
    #[error("Cannot parse the configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Interrupted")]
    Interrupted,
}

/// TCP congestion-control algorithms of the Linux kernel. The name is passed to `iperf3 -C`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Algorithm {
    Reno,
    Cubic,
    Htcp,
    Vegas,
    Westwood,
}

/// What an experiment run measures.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Congestion window of two staggered flows, as reported by the senders.
    Cwnd,
    /// Throughput of two concurrent flows, as reported by the receivers.
    Fairness,
}

impl Mode {
    /// Short tag used in file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Cwnd => "cwnd",
            Self::Fairness => "fair",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cwnd" => Some(Self::Cwnd),
            "fair" => Some(Self::Fairness),
            _ => None,
        }
    }
}

/// The two flows of every experiment, as `(client, server)`.
pub const FLOWS: [(Node, Node); 2] = [(Node::H1, Node::H3), (Node::H2, Node::H4)];

lazy_static! {
    static ref RAW_LOG: Regex = Regex::new(
        r"^(?P<tag>cwnd|fair)_(?P<alg>[a-z]+)_(?P<host>h[1-4])_(?P<delay>\d+)$"
    )
    .unwrap();
}

/// A single experiment run, identified by algorithm, delay, and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub algorithm: Algorithm,
    /// One-way delay of the bottleneck link in ms.
    pub delay_ms: u32,
    pub mode: Mode,
}

impl fmt::Display for ExperimentRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {} {}", self.mode, self.algorithm, self.delay_ms)
    }
}

impl ExperimentRun {
    pub fn new(algorithm: Algorithm, delay_ms: u32, mode: Mode) -> Self {
        Self {
            algorithm,
            delay_ms,
            mode,
        }
    }

    /// Hosts whose output is logged: the senders for cwnd runs, the receivers for fairness runs.
    /// The first host belongs to flow 1.
    pub fn logged_hosts(&self) -> [Node; 2] {
        match self.mode {
            Mode::Cwnd => FLOWS.map(|(client, _)| client),
            Mode::Fairness => FLOWS.map(|(_, server)| server),
        }
    }

    /// Identify the run (and the host) that produced the raw log at `path`.
    pub fn from_raw_log(path: &Path) -> Option<(Self, Node)> {
        let caps = RAW_LOG.captures(path.file_name()?.to_str()?)?;
        let run = Self::new(
            caps["alg"].parse().ok()?,
            caps["delay"].parse().ok()?,
            Mode::from_tag(&caps["tag"])?,
        );
        let host: Node = caps["host"].parse().ok()?;
        run.logged_hosts().contains(&host).then_some((run, host))
    }

    /// All runs with raw logs of both flows in `dir`, sorted.
    pub fn discover(dir: &Path) -> Result<Vec<Self>, ExperimentError> {
        let pattern = dir.then("*_h[1-4]_*");
        let found = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .filter_map(|p| Self::from_raw_log(&p))
            .into_group_map();
        Ok(found
            .into_iter()
            .filter(|(_, hosts)| hosts.len() == 2)
            .map(|(run, _)| run)
            .sorted_by_key(|r| (r.algorithm, r.delay_ms, r.mode))
            .collect())
    }

    /// Raw output of `iperf3` on `host`.
    pub fn raw_log(&self, dir: &Path, host: Node) -> PathBuf {
        dir.then(format!(
            "{}_{}_{host}_{}",
            self.mode.tag(),
            self.algorithm,
            self.delay_ms
        ))
    }

    /// Series extracted from the raw output of `host`.
    pub fn series_file(&self, dir: &Path, host: Node) -> PathBuf {
        dir.then(format!(
            "{}_{host}_{}_{}_new",
            self.algorithm,
            self.delay_ms,
            self.mode.tag()
        ))
    }

    /// Rendered chart (PNG). The interactive chart uses the same name with `.html`.
    pub fn plot_file(&self, dir: &Path) -> PathBuf {
        dir.then(format!(
            "{}_{}_{}.png",
            self.algorithm,
            self.delay_ms,
            self.mode.tag()
        ))
    }

    /// All files produced by this run.
    pub fn output_files(&self, dir: &Path) -> Vec<PathBuf> {
        let png = self.plot_file(dir);
        let html = png.with_extension("html");
        self.logged_hosts()
            .into_iter()
            .flat_map(|h| [self.raw_log(dir, h), self.series_file(dir, h)])
            .chain([png, html])
            .collect()
    }

    /// Remove the output of a previous execution of this run.
    pub fn remove_stale(&self, dir: &Path) -> Result<(), std::io::Error> {
        for file in self.output_files(dir) {
            if file.exists() {
                log::debug!("Removing existing file {}", file.display());
                fs::remove_file(file)?;
            }
        }
        Ok(())
    }

    /// Chart showing both flows of this run over `x_max` seconds.
    pub fn chart(&self, dir: &Path, x_max: u64) -> Chart {
        let rtt = 2 * self.delay_ms;
        let algorithm = self.algorithm.to_string().to_uppercase();
        let (quantity, ylabel) = match self.mode {
            Mode::Cwnd => ("cwnd (packets)", "Congestion Window (packets)"),
            Mode::Fairness => ("Throughput (Mbps)", "Throughput (Mbps)"),
        };
        Chart {
            title: format!(
                "Change in {quantity} vs Time (1s units) for two TCP flows (rtt = {rtt} ms) using {algorithm}"
            ),
            xlabel: "Time (seconds)".to_string(),
            ylabel: ylabel.to_string(),
            x_max,
            series_files: self
                .logged_hosts()
                .into_iter()
                .enumerate()
                .map(|(i, h)| (self.series_file(dir, h), flow_label(i)))
                .collect(),
        }
    }
}

/// Label of the `i`-th flow (starting at 0).
pub fn flow_label(i: usize) -> String {
    format!("TCP Flow {}", i + 1)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn file_names() {
        let dir = Path::new("results");
        let cwnd = ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd);
        assert_eq!(cwnd.raw_log(dir, Node::H1), PathBuf::from("results/cwnd_reno_h1_21"));
        assert_eq!(
            cwnd.series_file(dir, Node::H2),
            PathBuf::from("results/reno_h2_21_cwnd_new")
        );
        assert_eq!(cwnd.plot_file(dir), PathBuf::from("results/reno_21_cwnd.png"));

        let fair = ExperimentRun::new(Algorithm::Westwood, 162, Mode::Fairness);
        assert_eq!(fair.logged_hosts(), [Node::H3, Node::H4]);
        assert_eq!(
            fair.raw_log(dir, Node::H4),
            PathBuf::from("results/fair_westwood_h4_162")
        );
        assert_eq!(
            fair.series_file(dir, Node::H3),
            PathBuf::from("results/westwood_h3_162_fair_new")
        );
        assert_eq!(fair.output_files(dir).len(), 6);
    }

    #[test]
    fn chart_labels() {
        let run = ExperimentRun::new(Algorithm::Cubic, 81, Mode::Fairness);
        let chart = run.chart(Path::new("results"), 500);
        assert_eq!(
            chart.title,
            "Change in Throughput (Mbps) vs Time (1s units) for two TCP flows (rtt = 162 ms) using CUBIC"
        );
        assert_eq!(chart.ylabel, "Throughput (Mbps)");
        assert_eq!(chart.series_files[1].1, "TCP Flow 2");
        assert_eq!(
            chart.series_files[0].0,
            PathBuf::from("results/cubic_h3_81_fair_new")
        );
    }

    #[test]
    fn remove_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let run = ExperimentRun::new(Algorithm::Vegas, 21, Mode::Cwnd);
        for f in run.output_files(dir.path()).iter().take(3) {
            fs::write(f, "old").unwrap();
        }
        fs::write(dir.path().join("unrelated"), "keep").unwrap();
        run.remove_stale(dir.path()).unwrap();
        assert!(run.output_files(dir.path()).iter().all(|f| !f.exists()));
        assert!(dir.path().join("unrelated").exists());
    }

    #[test]
    fn discover_raw_logs() {
        let dir = tempfile::tempdir().unwrap();
        let cwnd = ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd);
        let fair = ExperimentRun::new(Algorithm::Htcp, 162, Mode::Fairness);
        let partial = ExperimentRun::new(Algorithm::Vegas, 81, Mode::Cwnd);
        for run in [cwnd, fair] {
            for host in run.logged_hosts() {
                fs::write(run.raw_log(dir.path(), host), "").unwrap();
            }
        }
        fs::write(partial.raw_log(dir.path(), Node::H1), "").unwrap();
        fs::write(cwnd.series_file(dir.path(), Node::H1), "").unwrap();
        fs::write(dir.path().join("cwnd_reno_h3_21"), "").unwrap();

        assert_eq!(
            ExperimentRun::from_raw_log(&fair.raw_log(dir.path(), Node::H4)),
            Some((fair, Node::H4))
        );
        assert_eq!(
            ExperimentRun::discover(dir.path()).unwrap(),
            vec![cwnd, fair]
        );
    }

    #[test]
    fn names() {
        assert_eq!(Algorithm::Htcp.to_string(), "htcp");
        assert_eq!(Algorithm::from_str("westwood").unwrap(), Algorithm::Westwood);
        assert_eq!(Mode::Fairness.to_string(), "fairness");
        assert_eq!(
            ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd).to_string(),
            "cwnd for reno 21"
        );
    }
}
