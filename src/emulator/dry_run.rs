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
//! Emulator that only records what it was asked to do.

use std::{fmt, sync::Arc};

use itertools::Itertools;

use super::{Emulator, EmulatorError, HostProcess, PingResult, ProcessOutput};
use crate::topology::{Node, Topology};

/// Produces the output that a command started on a host would have written, if any.
pub type OutputProvider = Arc<dyn Fn(Node, &[String]) -> Option<String> + Send + Sync>;

/// Action performed on a [`DryRunEmulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start { delay_ms: u32 },
    Stop,
    Popen { host: Node, cmd: String },
    Ping { src: Node, dst: Node },
    Cleanup,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { delay_ms } => write!(f, "start (delay {delay_ms} ms)"),
            Self::Stop => write!(f, "stop"),
            Self::Popen { host, cmd } => write!(f, "{host}: {cmd}"),
            Self::Ping { src, dst } => write!(f, "ping {src} -> {dst}"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Emulator that does not touch the system. Processes exit immediately. Only if an output
/// provider is set, processes whose output goes to a file write the provided text into it.
#[derive(Default)]
pub struct DryRunEmulator {
    topo: Option<Topology>,
    actions: Vec<Action>,
    output: Option<OutputProvider>,
}

impl fmt::Debug for DryRunEmulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunEmulator")
            .field("topo", &self.topo)
            .field("actions", &self.actions)
            .finish()
    }
}

impl DryRunEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(
        mut self,
        f: impl Fn(Node, &[String]) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.output = Some(Arc::new(f));
        self
    }

    /// All actions performed so far, in order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

#[async_trait::async_trait]
impl Emulator for DryRunEmulator {
    async fn start(&mut self, topo: &Topology) -> Result<(), EmulatorError> {
        if self.topo.is_some() {
            return Err(EmulatorError::AlreadyRunning);
        }
        log::info!("[dry-run] starting network");
        for link in topo.links() {
            log::debug!("[dry-run] {link}");
        }
        self.actions.push(Action::Start {
            delay_ms: topo.delay_ms(),
        });
        self.topo = Some(topo.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EmulatorError> {
        self.topo.take().ok_or(EmulatorError::NotRunning)?;
        log::info!("[dry-run] stopping network");
        self.actions.push(Action::Stop);
        Ok(())
    }

    fn topology(&self) -> Option<&Topology> {
        self.topo.as_ref()
    }

    async fn popen(
        &mut self,
        host: Node,
        argv: &[String],
        output: ProcessOutput,
    ) -> Result<HostProcess, EmulatorError> {
        if self.topo.is_none() {
            return Err(EmulatorError::NotRunning);
        }
        if !host.is_host() {
            return Err(EmulatorError::NotAHost(host));
        }
        let cmd = argv.iter().join(" ");
        log::info!("[dry-run] [{host}] {cmd}");
        if let (ProcessOutput::File(path), Some(provider)) = (&output, &self.output) {
            std::fs::write(path, provider(host, argv).unwrap_or_default())?;
        }
        self.actions.push(Action::Popen {
            host,
            cmd: cmd.clone(),
        });
        Ok(HostProcess::detached(host, cmd))
    }

    async fn ping(
        &mut self,
        src: Node,
        dst: Node,
        count: u32,
    ) -> Result<PingResult, EmulatorError> {
        self.host_ip(dst)?;
        if !src.is_host() {
            return Err(EmulatorError::NotAHost(src));
        }
        self.actions.push(Action::Ping { src, dst });
        Ok(PingResult {
            transmitted: count,
            received: count,
            rtt_avg_ms: self.topo.as_ref().map(|t| t.rtt_ms() as f64),
        })
    }

    async fn cleanup(&mut self) -> Result<(), EmulatorError> {
        self.topo = None;
        self.actions.push(Action::Cleanup);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "dry run"
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn writes_output(&self) -> bool {
        self.output.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn records_actions() {
        let mut emu = DryRunEmulator::new();
        let topo = Topology::dumbbell(21);
        emu.start(&topo).await.unwrap();
        assert!(matches!(
            emu.start(&topo).await,
            Err(EmulatorError::AlreadyRunning)
        ));
        assert_eq!(
            emu.host_ip(Node::H3).unwrap().to_string(),
            "10.0.0.3".to_string()
        );
        let ping = emu.ping(Node::H1, Node::H3, 1).await.unwrap();
        assert_eq!(ping.rtt_avg_ms, Some(42.0));
        emu.popen(
            Node::H3,
            &["iperf3".to_string(), "-s".to_string()],
            ProcessOutput::Null,
        )
        .await
        .unwrap();
        assert!(emu
            .popen(Node::S1, &["true".to_string()], ProcessOutput::Null)
            .await
            .is_err());
        emu.stop().await.unwrap();

        assert_eq!(
            emu.actions(),
            &[
                Action::Start { delay_ms: 21 },
                Action::Ping {
                    src: Node::H1,
                    dst: Node::H3
                },
                Action::Popen {
                    host: Node::H3,
                    cmd: "iperf3 -s".to_string()
                },
                Action::Stop,
            ]
        );
    }

    #[tokio::test]
    async fn writes_provided_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut emu = DryRunEmulator::new().with_output(|host, _| Some(format!("hello {host}")));
        emu.start(&Topology::dumbbell(1)).await.unwrap();
        emu.popen(
            Node::H2,
            &["echo".to_string()],
            ProcessOutput::File(path.clone()),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello h2");
    }

    #[tokio::test]
    async fn no_files_without_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        std::fs::write(&path, "measurement").unwrap();
        let mut emu = DryRunEmulator::new();
        assert!(emu.is_dry_run());
        assert!(!emu.writes_output());
        emu.start(&Topology::dumbbell(1)).await.unwrap();
        emu.popen(
            Node::H1,
            &["echo".to_string()],
            ProcessOutput::File(path.clone()),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "measurement");
    }
}
