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
//! Emulator building the topology out of Linux network namespaces.
//!
//! Every host lives in its own network namespace, every switch is a Linux bridge in the root
//! namespace, and every link is a veth pair. Both ends of a link are shaped with an `htb` class
//! (bandwidth) and a `netem` qdisc below it (delay and queue limit). Requires root privileges, or
//! password-less `sudo`.

use lazy_static::lazy_static;
use regex::Regex;

use super::{CmdRunner, Emulator, EmulatorError, HostProcess, PingResult, ProcessOutput};
use crate::topology::{Interface, LinkParams, Node, Topology};

/// Traffic generator that `cleanup` kills unconditionally.
const TRAFFIC_GENERATOR: &str = "iperf3";

/// Commands that shape the egress of interface `intf` according to `params`.
pub fn shaping_commands(intf: &str, params: &LinkParams) -> Vec<Vec<String>> {
    let mut netem = vec![
        "tc".to_string(),
        "qdisc".to_string(),
        "add".to_string(),
        "dev".to_string(),
        intf.to_string(),
        "parent".to_string(),
        "5:1".to_string(),
        "handle".to_string(),
        "10:".to_string(),
        "netem".to_string(),
        "delay".to_string(),
        format!("{}ms", params.delay_ms),
    ];
    if let Some(limit) = params.max_queue_size {
        netem.push("limit".to_string());
        netem.push(limit.to_string());
    }

    vec![
        format!("tc qdisc add dev {intf} root handle 5:0 htb default 1"),
        format!(
            "tc class add dev {intf} parent 5:0 classid 5:1 htb rate {}Mbit burst 15k",
            params.bandwidth_mbps
        ),
    ]
    .into_iter()
    .map(|c| c.split_whitespace().map(String::from).collect())
    .chain(std::iter::once(netem))
    .collect()
}

/// Emulator based on network namespaces, bridges and veth pairs.
#[derive(Debug)]
pub struct NetnsEmulator {
    runner: CmdRunner,
    prefix: String,
    topo: Option<Topology>,
}

impl NetnsEmulator {
    /// Create a new emulator. All namespaces are called `{prefix}-{host}`.
    pub fn new(prefix: impl Into<String>, sudo: bool) -> Self {
        Self {
            runner: CmdRunner::new(sudo),
            prefix: prefix.into(),
            topo: None,
        }
    }

    fn namespace(&self, host: Node) -> String {
        format!("{}-{host}", self.prefix)
    }

    /// Prefix `argv` such that it is executed within the namespace of `node`. Commands for
    /// switches are executed in the root namespace.
    fn in_node<S: AsRef<str>>(&self, node: Node, argv: &[S]) -> Vec<String> {
        let mut cmd = Vec::new();
        if node.is_host() {
            cmd.extend(["ip".to_string(), "netns".to_string(), "exec".to_string()]);
            cmd.push(self.namespace(node));
        }
        cmd.extend(argv.iter().map(|s| s.as_ref().to_string()));
        cmd
    }

    async fn setup(&self, topo: &Topology) -> Result<(), EmulatorError> {
        for host in topo.hosts() {
            let ns = self.namespace(host);
            log::debug!("adding host {host} ({ns})");
            self.runner.run(["ip", "netns", "add", ns.as_str()]).await?;
            self.runner
                .run(self.in_node(host, &["ip", "link", "set", "lo", "up"]))
                .await?;
        }

        for switch in topo.switches() {
            let name = switch.to_string();
            log::debug!("adding switch {switch}");
            self.runner
                .run(["ip", "link", "add", name.as_str(), "type", "bridge"])
                .await?;
            self.runner
                .run(["ip", "link", "set", name.as_str(), "up"])
                .await?;
        }

        for (link, a, b) in topo.interfaces() {
            log::debug!("adding link {link}");
            self.runner
                .run([
                    "ip",
                    "link",
                    "add",
                    a.name.as_str(),
                    "type",
                    "veth",
                    "peer",
                    "name",
                    b.name.as_str(),
                ])
                .await?;
            for intf in [&a, &b] {
                self.attach(topo, intf).await?;
                for cmd in shaping_commands(&intf.name, &link.params) {
                    self.runner.run(self.in_node(intf.node, &cmd)).await?;
                }
            }
        }

        Ok(())
    }

    /// Move the interface into its node and bring it up.
    async fn attach(&self, topo: &Topology, intf: &Interface) -> Result<(), EmulatorError> {
        let name = intf.name.as_str();
        if let Some(net) = topo.host_net(intf.node) {
            let ns = self.namespace(intf.node);
            let addr = net.to_string();
            self.runner
                .run(["ip", "link", "set", name, "netns", ns.as_str()])
                .await?;
            self.runner
                .run(self.in_node(
                    intf.node,
                    &["ip", "addr", "add", addr.as_str(), "dev", name],
                ))
                .await?;
            self.runner
                .run(self.in_node(intf.node, &["ip", "link", "set", name, "up"]))
                .await?;
        } else {
            let bridge = intf.node.to_string();
            self.runner
                .run(["ip", "link", "set", name, "master", bridge.as_str()])
                .await?;
            self.runner.run(["ip", "link", "set", name, "up"]).await?;
        }
        Ok(())
    }

    /// Remove everything that `setup` may have created for `topo`.
    async fn teardown(&self, topo: &Topology) {
        // links between switches live in the root namespace; deleting one end removes the pair
        for (_, a, b) in topo.interfaces() {
            if a.node.is_switch() && b.node.is_switch() {
                self.runner
                    .run_best_effort(["ip", "link", "del", a.name.as_str()])
                    .await;
            }
        }
        for switch in topo.switches() {
            self.runner
                .run_best_effort(["ip", "link", "del", switch.to_string().as_str()])
                .await;
        }
        // deleting a namespace also removes the veth pairs of its interfaces
        for host in topo.hosts() {
            self.runner
                .run_best_effort(["ip", "netns", "del", self.namespace(host).as_str()])
                .await;
        }
    }
}

lazy_static! {
    static ref LINK_NAME: Regex = Regex::new(r"^\d+:\s+(?P<name>[^:@\s]+)[@:]").unwrap();
    static ref SWITCH_LINK: Regex = Regex::new(r"^s[1-4](-eth\d+)?$").unwrap();
}

#[async_trait::async_trait]
impl Emulator for NetnsEmulator {
    async fn start(&mut self, topo: &Topology) -> Result<(), EmulatorError> {
        if self.topo.is_some() {
            return Err(EmulatorError::AlreadyRunning);
        }
        log::info!(
            "Starting network with {} ms bottleneck delay",
            topo.delay_ms()
        );
        if let Err(e) = self.setup(topo).await {
            log::error!("Could not set up the network: {e}");
            self.teardown(topo).await;
            return Err(e);
        }
        self.topo = Some(topo.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EmulatorError> {
        let topo = self.topo.take().ok_or(EmulatorError::NotRunning)?;
        log::info!("Stopping network");
        self.teardown(&topo).await;
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
        let name = argv.join(" ");
        log::debug!("[{host}] {name}");
        let child = self
            .runner
            .command(self.in_node(host, argv))
            .stdin(std::process::Stdio::null())
            .stdout(output.stdio()?)
            .stderr(std::process::Stdio::null())
            .spawn()?;
        Ok(HostProcess::new(host, name, self.runner.sudo(), Some(child)))
    }

    async fn ping(
        &mut self,
        src: Node,
        dst: Node,
        count: u32,
    ) -> Result<PingResult, EmulatorError> {
        let dst_ip = self.host_ip(dst)?;
        if !src.is_host() {
            return Err(EmulatorError::NotAHost(src));
        }
        let count = count.to_string();
        let dst_ip = dst_ip.to_string();
        let output = self
            .runner
            .command(self.in_node(src, &["ping", "-c", count.as_str(), "-W", "2", dst_ip.as_str()]))
            .output()
            .await?;
        // ping exits with a non-zero status on packet loss, which is a valid result.
        let result = PingResult::parse(&String::from_utf8_lossy(&output.stdout))?;
        log::info!(
            "{src} -> {dst}: {}/{} received{}",
            result.received,
            result.transmitted,
            result
                .rtt_avg_ms
                .map(|rtt| format!(", rtt {rtt:.3} ms"))
                .unwrap_or_default()
        );
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<(), EmulatorError> {
        log::info!("Cleaning up emulated networks");
        if let Some(topo) = self.topo.take() {
            self.teardown(&topo).await;
        }

        let prefix = format!("{}-", self.prefix);
        let namespaces = self.runner.run(["ip", "netns", "list"]).await?;
        for ns in namespaces
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .filter(|ns| ns.starts_with(&prefix))
        {
            log::debug!("removing stale namespace {ns}");
            self.runner.run_best_effort(["ip", "netns", "del", ns]).await;
        }

        let links = self.runner.run(["ip", "-o", "link", "show"]).await?;
        for name in links
            .lines()
            .filter_map(|l| LINK_NAME.captures(l))
            .map(|c| c["name"].to_string())
            .filter(|name| SWITCH_LINK.is_match(name))
        {
            log::debug!("removing stale link {name}");
            self.runner
                .run_best_effort(["ip", "link", "del", name.as_str()])
                .await;
        }

        // pkill exits with 1 if nothing matched
        self.runner
            .run_best_effort(["pkill", "-9", TRAFFIC_GENERATOR])
            .await;
        Ok(())
    }

    fn description(&self) -> &'static str {
        "network namespaces"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shaping() {
        let params = LinkParams {
            bandwidth_mbps: 984,
            delay_ms: 21,
            max_queue_size: Some(1722),
        };
        let cmds = shaping_commands("s1-eth1", &params)
            .into_iter()
            .map(|c| c.join(" "))
            .collect::<Vec<_>>();
        assert_eq!(
            cmds,
            vec![
                "tc qdisc add dev s1-eth1 root handle 5:0 htb default 1",
                "tc class add dev s1-eth1 parent 5:0 classid 5:1 htb rate 984Mbit burst 15k",
                "tc qdisc add dev s1-eth1 parent 5:1 handle 10: netem delay 21ms limit 1722",
            ]
        );
    }

    #[test]
    fn shaping_without_queue() {
        let params = LinkParams {
            bandwidth_mbps: 960,
            delay_ms: 0,
            max_queue_size: None,
        };
        let netem = shaping_commands("h1-eth0", &params).pop().unwrap();
        assert_eq!(netem.last().unwrap(), "0ms");
    }

    #[test]
    fn commands_in_namespace() {
        let emu = NetnsEmulator::new("dumbbell", false);
        assert_eq!(
            emu.in_node(Node::H2, &["ip", "link"]),
            vec!["ip", "netns", "exec", "dumbbell-h2", "ip", "link"]
        );
        assert_eq!(emu.in_node(Node::S2, &["ip", "link"]), vec!["ip", "link"]);
    }

    #[test]
    fn stale_link_names() {
        let line = "7: s1-eth1@s2-eth1: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500";
        let name = LINK_NAME.captures(line).unwrap()["name"].to_string();
        assert_eq!(name, "s1-eth1");
        assert!(SWITCH_LINK.is_match(&name));
        assert!(SWITCH_LINK.is_match("s4"));
        assert!(!SWITCH_LINK.is_match("eth0"));
        assert!(!SWITCH_LINK.is_match("s5"));
    }

    #[tokio::test]
    async fn popen_requires_running_network() {
        let mut emu = NetnsEmulator::new("dumbbell", false);
        let err = emu
            .popen(Node::H1, &["true".to_string()], ProcessOutput::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::NotRunning));
        assert!(matches!(
            emu.stop().await.unwrap_err(),
            EmulatorError::NotRunning
        ));
    }
}
