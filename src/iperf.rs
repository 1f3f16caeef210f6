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
//! Invocation of the `iperf3` traffic generator.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Port on which the servers listen.
pub const DEFAULT_PORT: u16 = 5566;
/// Socket buffer (TCP window) size requested by the clients.
pub const DEFAULT_WINDOW: &str = "32M";

/// Settings shared by all `iperf3` invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IperfOptions {
    /// Name (or path) of the `iperf3` binary.
    pub program: String,
    pub port: u16,
    pub window: String,
    /// Interval between periodic reports, in seconds.
    pub interval: u32,
}

impl Default for IperfOptions {
    fn default() -> Self {
        Self {
            program: "iperf3".to_string(),
            port: DEFAULT_PORT,
            window: DEFAULT_WINDOW.to_string(),
            interval: 1,
        }
    }
}

impl IperfOptions {
    /// Server accepting a single test and exiting afterwards. If `report` is set, the server
    /// prints periodic reports (which carry the receiver-side throughput).
    pub fn server(&self, report: bool) -> Vec<String> {
        let mut argv = vec![
            self.program.clone(),
            "-s".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if report {
            argv.push("-i".to_string());
            argv.push(self.interval.to_string());
        }
        argv.push("-1".to_string());
        argv
    }

    /// Client sending to `server` for `duration` seconds using the given congestion-control
    /// algorithm. The periodic reports include the congestion window of the sender.
    pub fn client(&self, server: Ipv4Addr, duration: u64, algorithm: &str) -> Vec<String> {
        let mut argv = self.fairness_client(server, duration, algorithm);
        argv.extend([
            "-i".to_string(),
            self.interval.to_string(),
            "-w".to_string(),
            self.window.clone(),
        ]);
        argv
    }

    /// Client of a fairness run. It keeps the default socket buffers and reporting, since the
    /// throughput is taken from the server side.
    pub fn fairness_client(
        &self,
        server: Ipv4Addr,
        duration: u64,
        algorithm: &str,
    ) -> Vec<String> {
        let mut argv = self.probe(server, duration);
        argv.push("-C".to_string());
        argv.push(algorithm.to_string());
        argv
    }

    /// Short bandwidth test without a specific congestion-control algorithm.
    pub fn probe(&self, server: Ipv4Addr, duration: u64) -> Vec<String> {
        vec![
            self.program.clone(),
            "-c".to_string(),
            server.to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-t".to_string(),
            duration.to_string(),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_args() {
        let opts = IperfOptions::default();
        assert_eq!(opts.server(false).join(" "), "iperf3 -s -p 5566 -1");
        assert_eq!(opts.server(true).join(" "), "iperf3 -s -p 5566 -i 1 -1");
    }

    #[test]
    fn client_args() {
        let opts = IperfOptions::default();
        assert_eq!(
            opts.client(Ipv4Addr::new(10, 0, 0, 3), 500, "cubic").join(" "),
            "iperf3 -c 10.0.0.3 -p 5566 -t 500 -C cubic -i 1 -w 32M"
        );
        assert_eq!(
            opts.probe(Ipv4Addr::new(10, 0, 0, 4), 10).join(" "),
            "iperf3 -c 10.0.0.4 -p 5566 -t 10"
        );
    }

    #[test]
    fn fairness_client_keeps_default_window() {
        let opts = IperfOptions::default();
        let argv = opts.fairness_client(Ipv4Addr::new(10, 0, 0, 4), 500, "bbr");
        assert_eq!(argv.join(" "), "iperf3 -c 10.0.0.4 -p 5566 -t 500 -C bbr");
        assert!(!argv.contains(&"-w".to_string()));
    }

    #[test]
    fn partial_options() {
        let opts: IperfOptions = serde_json::from_str(r#"{"port": 5001}"#).unwrap();
        assert_eq!(opts.port, 5001);
        assert_eq!(opts.window, "32M");
    }
}
