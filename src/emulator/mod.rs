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
//! Host-controlled network emulator that instantiates the dumbbell topology and runs commands on
//! its hosts.
//!
//! The [`Emulator`] trait is the seam between the experiment sequencer and the machinery that
//! actually creates the network. [`NetnsEmulator`] builds the topology out of Linux network
//! namespaces, bridges, veth pairs, and `tc` shaping. [`DryRunEmulator`] only records what would
//! have been done.

use std::{net::Ipv4Addr, path::PathBuf, process::Stdio, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::process::Child;

use crate::topology::{Node, Topology};

mod cmd;
mod dry_run;
mod netns;

pub use cmd::CmdRunner;
pub use dry_run::{Action, DryRunEmulator};
pub use netns::{shaping_commands, NetnsEmulator};

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command `{cmd}` failed ({status}): {stderr}")]
    Command {
        cmd: String,
        status: String,
        stderr: String,
    },
    #[error("The emulated network is not running")]
    NotRunning,
    #[error("The emulated network is already running")]
    AlreadyRunning,
    #[error("{0} is not a host")]
    NotAHost(Node),
    #[error("Cannot parse the output of ping: {0}")]
    PingOutput(String),
}

/// Where to send the standard output of a process started on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Discard the output.
    Null,
    /// Write the output into the given file, truncating it first.
    File(PathBuf),
}

impl ProcessOutput {
    pub(crate) fn stdio(&self) -> Result<Stdio, std::io::Error> {
        Ok(match self {
            Self::Null => Stdio::null(),
            Self::File(path) => Stdio::from(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?,
            ),
        })
    }
}

/// Grace period between asking a process to terminate and killing it.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Handle to a process running on an emulated host.
#[derive(Debug)]
pub struct HostProcess {
    host: Node,
    name: String,
    sudo: bool,
    child: Option<Child>,
}

impl HostProcess {
    pub fn new(host: Node, name: impl Into<String>, sudo: bool, child: Option<Child>) -> Self {
        Self {
            host,
            name: name.into(),
            sudo,
            child,
        }
    }

    /// A handle that does not refer to any running process (as produced by a dry run).
    pub fn detached(host: Node, name: impl Into<String>) -> Self {
        Self::new(host, name, false, None)
    }

    pub fn host(&self) -> Node {
        self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the process to exit on its own, for at most `timeout`. If it is still running
    /// afterwards, it gets killed. Returns `true` if the process exited in time.
    pub async fn wait(&mut self, timeout: Duration) -> Result<bool, EmulatorError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(true);
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if !status.success() {
                    log::warn!("[{}] {} exited with {status}", self.host, self.name);
                }
                self.child = None;
                Ok(true)
            }
            Err(_) => {
                log::warn!(
                    "[{}] {} did not finish within {timeout:?}, killing it",
                    self.host,
                    self.name
                );
                child.kill().await?;
                self.child = None;
                Ok(false)
            }
        }
    }

    /// Ask the process to terminate (`SIGTERM`), and kill it if it does not exit within a short
    /// grace period.
    pub async fn terminate(&mut self) -> Result<(), EmulatorError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        if let Ok(Some(_)) = child.try_wait() {
            self.child = None;
            return Ok(());
        }
        if let Some(pid) = child.id() {
            let runner = CmdRunner::new(self.sudo);
            if let Err(e) = runner.run(["kill", "-TERM", pid.to_string().as_str()]).await {
                log::debug!("[{}] cannot send SIGTERM to {}: {e}", self.host, self.name);
            }
        }
        if tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_err()
        {
            log::debug!("[{}] killing {}", self.host, self.name);
            child.kill().await?;
        }
        self.child = None;
        Ok(())
    }
}

/// Summary of a ping run between two hosts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingResult {
    pub transmitted: u32,
    pub received: u32,
    /// Average round-trip time in milliseconds, if any reply was received.
    pub rtt_avg_ms: Option<f64>,
}

lazy_static! {
    static ref PING_SUMMARY: Regex =
        Regex::new(r"(?P<tx>\d+) packets transmitted, (?P<rx>\d+) (packets )?received").unwrap();
    static ref PING_RTT: Regex =
        Regex::new(r"rtt min/avg/max/mdev = [0-9.]+/(?P<avg>[0-9.]+)/").unwrap();
}

impl PingResult {
    /// Parse the summary printed by `ping`.
    pub fn parse(output: &str) -> Result<Self, EmulatorError> {
        let caps = PING_SUMMARY
            .captures(output)
            .ok_or_else(|| EmulatorError::PingOutput(output.to_string()))?;
        let num = |name: &str| -> Result<u32, EmulatorError> {
            caps[name]
                .parse()
                .map_err(|_| EmulatorError::PingOutput(output.to_string()))
        };
        let transmitted = num("tx")?;
        let received = num("rx")?;
        let rtt_avg_ms = PING_RTT
            .captures(output)
            .and_then(|c| c["avg"].parse().ok());
        Ok(Self {
            transmitted,
            received,
            rtt_avg_ms,
        })
    }

    /// Fraction of lost packets, between 0 and 1.
    pub fn loss(&self) -> f64 {
        if self.transmitted == 0 {
            return 1.0;
        }
        1.0 - self.received as f64 / self.transmitted as f64
    }
}

#[async_trait::async_trait]
pub trait Emulator: Send {
    /// Instantiate the topology. Fails if a network is already running.
    async fn start(&mut self, topo: &Topology) -> Result<(), EmulatorError>;

    /// Tear down the running network.
    async fn stop(&mut self) -> Result<(), EmulatorError>;

    /// Topology of the running network.
    fn topology(&self) -> Option<&Topology>;

    /// Start `argv` on the given host, sending its standard output to `output`.
    async fn popen(
        &mut self,
        host: Node,
        argv: &[String],
        output: ProcessOutput,
    ) -> Result<HostProcess, EmulatorError>;

    /// Send `count` echo requests from `src` to `dst`.
    async fn ping(&mut self, src: Node, dst: Node, count: u32)
        -> Result<PingResult, EmulatorError>;

    /// Remove every leftover of earlier (possibly crashed) runs and kill stray traffic
    /// generators. Never fails on missing leftovers.
    async fn cleanup(&mut self) -> Result<(), EmulatorError>;

    /// Return a description of the emulator
    fn description(&self) -> &'static str;

    /// Whether commands only pretend to run. Nothing needs to wait for them.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Whether commands write their output to files. If not, existing result files are neither
    /// removed nor replaced.
    fn writes_output(&self) -> bool {
        true
    }

    /// Address of a host in the running network.
    fn host_ip(&self, host: Node) -> Result<Ipv4Addr, EmulatorError> {
        let topo = self.topology().ok_or(EmulatorError::NotRunning)?;
        topo.host_ip(host).ok_or(EmulatorError::NotAHost(host))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_ping() {
        let output = "PING 10.0.0.3 (10.0.0.3) 56(84) bytes of data.
64 bytes from 10.0.0.3: icmp_seq=1 ttl=64 time=42.3 ms

--- 10.0.0.3 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 42.312/42.312/42.312/0.000 ms
";
        let result = PingResult::parse(output).unwrap();
        assert_eq!(result.transmitted, 1);
        assert_eq!(result.received, 1);
        assert_eq!(result.rtt_avg_ms, Some(42.312));
        assert_eq!(result.loss(), 0.0);
    }

    #[test]
    fn parse_ping_loss() {
        let output = "--- 10.0.0.3 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3060ms
";
        let result = PingResult::parse(output).unwrap();
        assert_eq!(result.received, 0);
        assert_eq!(result.rtt_avg_ms, None);
        assert_eq!(result.loss(), 1.0);
        assert!(PingResult::parse("connect: Network is unreachable").is_err());
    }

    #[tokio::test]
    async fn wait_detached() {
        let mut p = HostProcess::detached(Node::H1, "iperf3 client");
        assert!(p.wait(Duration::from_secs(1)).await.unwrap());
        p.terminate().await.unwrap();
        assert_eq!(p.host(), Node::H1);
        assert_eq!(p.name(), "iperf3 client");
    }

    #[tokio::test]
    async fn wait_kills_after_timeout() {
        let child = tokio::process::Command::new("sleep")
            .arg("10")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut p = HostProcess::new(Node::H1, "sleep", false, Some(child));
        assert!(!p.wait(Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test]
    async fn terminate_running() {
        let child = tokio::process::Command::new("sleep")
            .arg("10")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut p = HostProcess::new(Node::H3, "sleep", false, Some(child));
        p.terminate().await.unwrap();
        assert!(p.wait(Duration::from_millis(10)).await.unwrap());
    }
}
