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
//! Library for running TCP congestion-control experiments on an emulated dumbbell topology.
//!
//! Two senders (`h1`, `h2`) share a backbone link with two receivers (`h3`, `h4`). For every
//! algorithm and bottleneck delay, the experiments either follow the congestion window of two
//! staggered flows, or the throughput of two concurrent flows, and plot the result.

pub mod emulator;
pub mod experiments;
pub mod extract;
pub mod iperf;
pub mod records;
pub mod render;
pub mod series;
pub mod topology;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        emulator::{DryRunEmulator, Emulator, NetnsEmulator},
        experiments::{
            run_sweep, Algorithm, ExperimentConfig, ExperimentError, ExperimentRun, Mode,
            Sequencer,
        },
        records::RunRecord,
        series::TimeSeries,
        topology::{Node, Topology},
    };
}
