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
//! Parameter model of the dumbbell topology.
//!
//! The topology has a fixed shape: two backbone switches connected by the bottleneck link, each
//! fanning out to one access switch, with two hosts attached to every access switch. Only the
//! one-way delay of the backbone link is a free parameter; all queue sizes are derived from the
//! bandwidth-delay product of that delay, assuming 1500-byte packets.
//!
//! ```text
//!  h1 ─┐                                ┌─ h3
//!      s3 ── s1 ══════ bottleneck ══════ s2 ── s4
//!  h2 ─┘                                └─ h4
//! ```

use std::{collections::HashMap, fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Size of a single packet (the MTU) in bytes.
pub const PACKET_SIZE_BYTES: u32 = 1500;
/// Size of a single packet in bits.
pub const PACKET_SIZE_BITS: u32 = PACKET_SIZE_BYTES * 8;

/// Bandwidth of the link between the two backbone routers (82 packets/ms).
pub const BACKBONE_BANDWIDTH_MBPS: u32 = 984;
/// Bandwidth of the links between an access router and its backbone router (21 packets/ms).
pub const ACCESS_BANDWIDTH_MBPS: u32 = 252;
/// Bandwidth of the links between a host and its access router (80 packets/ms).
pub const HOST_BANDWIDTH_MBPS: u32 = 960;

/// Queue size of the backbone link, in percent of its bandwidth-delay product.
pub const BACKBONE_QUEUE_PERCENT: u32 = 100;
/// Queue size of the access links, in percent of their bandwidth-delay product.
pub const ACCESS_QUEUE_PERCENT: u32 = 20;
/// Queue size of the host links (if enabled), in percent of their bandwidth-delay product.
pub const HOST_QUEUE_PERCENT: u32 = 100;

/// Nodes of the dumbbell topology.
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
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Node {
    /// Backbone router 1
    S1,
    /// Backbone router 2
    S2,
    /// Access router 1
    S3,
    /// Access router 2
    S4,
    /// Source 1
    H1,
    /// Source 2
    H2,
    /// Receiver 1
    H3,
    /// Receiver 2
    H4,
}

impl Node {
    pub const SWITCHES: [Node; 4] = [Node::S1, Node::S2, Node::S3, Node::S4];
    pub const HOSTS: [Node; 4] = [Node::H1, Node::H2, Node::H3, Node::H4];

    pub fn is_host(&self) -> bool {
        matches!(self, Self::H1 | Self::H2 | Self::H3 | Self::H4)
    }

    pub fn is_switch(&self) -> bool {
        !self.is_host()
    }

    /// Index of the node within its class, starting at 1 (`h3` -> 3).
    pub fn index(&self) -> u8 {
        match self {
            Self::S1 | Self::H1 => 1,
            Self::S2 | Self::H2 => 2,
            Self::S3 | Self::H3 => 3,
            Self::S4 | Self::H4 => 4,
        }
    }

    /// Interface names of hosts start at `eth0`, those of switches at `eth1`.
    fn first_port(&self) -> u32 {
        if self.is_host() {
            0
        } else {
            1
        }
    }
}

/// Role of a link in the dumbbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkKind {
    Backbone,
    Access,
    Host,
}

/// Shaping parameters of a single link. They apply to both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Bandwidth in Mbps.
    pub bandwidth_mbps: u32,
    /// One-way delay in milliseconds.
    pub delay_ms: u32,
    /// Maximum queue size in packets, `None` leaves the emulator default.
    pub max_queue_size: Option<u32>,
}

impl LinkParams {
    pub fn packets_per_ms(&self) -> u32 {
        packets_per_ms(self.bandwidth_mbps)
    }
}

/// Number of full packets that a link of the given bandwidth transmits per millisecond.
pub fn packets_per_ms(bandwidth_mbps: u32) -> u32 {
    bandwidth_mbps * 1000 / PACKET_SIZE_BITS
}

/// Queue size in packets, computed as `percent` of the bandwidth-delay product of a link with the
/// given bandwidth and delay. Fractional packets are truncated, but the queue holds at least one
/// packet.
pub fn queue_size(bandwidth_mbps: u32, delay_ms: u32, percent: u32) -> u32 {
    let bdp = packets_per_ms(bandwidth_mbps) as u64 * delay_ms as u64;
    ((bdp * percent as u64 / 100) as u32).max(1)
}

/// A link between two nodes of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub a: Node,
    pub b: Node,
    pub kind: LinkKind,
    pub params: LinkParams,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} ({}): {} Mbps, {} ms",
            self.a, self.b, self.kind, self.params.bandwidth_mbps, self.params.delay_ms
        )?;
        if let Some(q) = self.params.max_queue_size {
            write!(f, ", queue {q} packets")?;
        }
        Ok(())
    }
}

/// Endpoint of a link, i.e., the interface on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interface {
    pub node: Node,
    pub name: String,
}

/// The dumbbell topology, fully parameterized by the one-way delay of its bottleneck link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    delay_ms: u32,
    host_queues: bool,
    links: Vec<Link>,
}

impl Topology {
    /// Build the dumbbell with the given one-way backbone delay (in ms). Host links carry no
    /// explicit queue limit.
    pub fn dumbbell(delay_ms: u32) -> Self {
        Self::dumbbell_with(delay_ms, false)
    }

    /// Build the dumbbell, optionally limiting the host-link queues to their bandwidth-delay
    /// product as well.
    pub fn dumbbell_with(delay_ms: u32, host_queues: bool) -> Self {
        let backbone = LinkParams {
            bandwidth_mbps: BACKBONE_BANDWIDTH_MBPS,
            delay_ms,
            max_queue_size: Some(queue_size(
                BACKBONE_BANDWIDTH_MBPS,
                delay_ms,
                BACKBONE_QUEUE_PERCENT,
            )),
        };
        let access = LinkParams {
            bandwidth_mbps: ACCESS_BANDWIDTH_MBPS,
            delay_ms: 0,
            max_queue_size: Some(queue_size(
                ACCESS_BANDWIDTH_MBPS,
                delay_ms,
                ACCESS_QUEUE_PERCENT,
            )),
        };
        let host = LinkParams {
            bandwidth_mbps: HOST_BANDWIDTH_MBPS,
            delay_ms: 0,
            max_queue_size: host_queues
                .then(|| queue_size(HOST_BANDWIDTH_MBPS, delay_ms, HOST_QUEUE_PERCENT)),
        };

        let link = |a, b, kind, params| Link { a, b, kind, params };
        let links = vec![
            link(Node::S1, Node::S2, LinkKind::Backbone, backbone),
            link(Node::S1, Node::S3, LinkKind::Access, access),
            link(Node::S2, Node::S4, LinkKind::Access, access),
            link(Node::H1, Node::S3, LinkKind::Host, host),
            link(Node::H2, Node::S3, LinkKind::Host, host),
            link(Node::H3, Node::S4, LinkKind::Host, host),
            link(Node::H4, Node::S4, LinkKind::Host, host),
        ];

        Self {
            delay_ms,
            host_queues,
            links,
        }
    }

    /// One-way delay of the bottleneck link in ms.
    pub fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    /// Round-trip time between a source and its receiver in ms.
    pub fn rtt_ms(&self) -> u32 {
        // only the backbone link adds delay
        2 * self.delay_ms
    }

    pub fn host_queues(&self) -> bool {
        self.host_queues
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, kind: LinkKind) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.kind == kind)
    }

    pub fn hosts(&self) -> impl Iterator<Item = Node> {
        Node::HOSTS.into_iter()
    }

    pub fn switches(&self) -> impl Iterator<Item = Node> {
        Node::SWITCHES.into_iter()
    }

    /// Address (with prefix length) of a host. Host `hN` gets `10.0.0.N/8`.
    pub fn host_net(&self, host: Node) -> Option<Ipv4Net> {
        if !host.is_host() {
            return None;
        }
        let net = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).ok()?;
        let addr = net.hosts().nth(host.index() as usize - 1)?;
        Ipv4Net::new(addr, net.prefix_len()).ok()
    }

    pub fn host_ip(&self, host: Node) -> Option<Ipv4Addr> {
        self.host_net(host).map(|n| n.addr())
    }

    /// Assign interface names to both ends of every link, in link order. Ports are numbered per
    /// node, in the order in which the links were added (`h1-eth0`, `s3-eth2`, ...).
    pub fn interfaces(&self) -> Vec<(Link, Interface, Interface)> {
        let mut next_port: HashMap<Node, u32> = HashMap::new();
        let mut intf = |node: Node| {
            let port = next_port.entry(node).or_insert_with(|| node.first_port());
            let name = format!("{node}-eth{port}");
            *port += 1;
            Interface { node, name }
        };
        self.links
            .iter()
            .map(|link| {
                let a = intf(link.a);
                let b = intf(link.b);
                (*link, a, b)
            })
            .collect()
    }

    /// Describe the connections of every host, one line per host (`h1 h1-eth0:s3-eth2`).
    pub fn dump_connections(&self) -> Vec<String> {
        let interfaces = self.interfaces();
        self.hosts()
            .map(|host| {
                let conns = interfaces
                    .iter()
                    .filter_map(|(_, a, b)| {
                        if a.node == host {
                            Some(format!("{}:{}", a.name, b.name))
                        } else if b.node == host {
                            Some(format!("{}:{}", b.name, a.name))
                        } else {
                            None
                        }
                    })
                    .join(" ");
                format!("{host} {conns}")
            })
            .collect()
    }
}
