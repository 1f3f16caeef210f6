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
//! Extraction of numeric series from the text reports of `iperf3`.
//!
//! Only the periodic interval reports are used, for instance
//!
//! ```text
//! [  5]   4.00-5.00   sec  28.8 MBytes   241 Mbits/sec    0   3.52 MBytes
//! ```
//!
//! Client reports carry the retransmissions and the congestion window of the sender; server
//! reports only transfer and bitrate. The final summary lines (marked `sender` / `receiver`) are
//! skipped.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{series::TimeSeries, topology::PACKET_SIZE_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("No interval reports found for {0}")]
    NoSamples(String),
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
}

/// One periodic report of `iperf3`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalReport {
    /// Start of the interval, in seconds since the start of the test.
    pub start: f64,
    /// End of the interval, in seconds since the start of the test.
    pub end: f64,
    pub transfer_bytes: f64,
    pub bitrate_mbps: f64,
    pub retransmits: Option<u32>,
    pub cwnd_bytes: Option<f64>,
}

impl IntervalReport {
    /// Congestion window in (possibly fractional) packets.
    pub fn cwnd_packets(&self) -> Option<f64> {
        self.cwnd_bytes
            .map(|b| b.trunc() / PACKET_SIZE_BYTES as f64)
    }
}

lazy_static! {
    static ref INTERVAL: Regex = Regex::new(
        r"(?x)
        ^\[\s*(?P<id>\d+|SUM)\]\s+
        (?P<start>[0-9.]+)\s*-\s*(?P<end>[0-9.]+)\s+sec\s+
        (?P<transfer>[0-9.]+)\s+(?P<transfer_unit>[A-Za-z]*Bytes)\s+
        (?P<rate>[0-9.]+)\s+(?P<rate_unit>[A-Za-z]*bits/sec)
        (\s+(?P<retr>\d+))?
        (\s+(?P<cwnd>[0-9.]+)\s+(?P<cwnd_unit>[A-Za-z]*Bytes))?
        (\s+(?P<role>sender|receiver))?
        \s*$"
    )
    .unwrap();
}

/// Multiplier of a byte unit. Units are decimal (`KBytes` = 1000 bytes).
fn bytes_multiplier(unit: &str) -> Result<f64, ExtractError> {
    Ok(match unit {
        "Bytes" => 1.0,
        "KBytes" => 1e3,
        "MBytes" => 1e6,
        "GBytes" => 1e9,
        "TBytes" => 1e12,
        _ => return Err(ExtractError::UnknownUnit(unit.to_string())),
    })
}

/// Factor converting a bitrate unit into Mbps.
fn mbps_multiplier(unit: &str) -> Result<f64, ExtractError> {
    Ok(match unit {
        "bits/sec" => 1e-6,
        "Kbits/sec" => 1e-3,
        "Mbits/sec" => 1.0,
        "Gbits/sec" => 1e3,
        "Tbits/sec" => 1e6,
        _ => return Err(ExtractError::UnknownUnit(unit.to_string())),
    })
}

/// Parse a single line. Returns `None` for anything that is not a periodic interval report,
/// including the final summary. Fails on an interval report with a unit it cannot convert.
pub fn parse_line(line: &str) -> Result<Option<IntervalReport>, ExtractError> {
    let Some(caps) = INTERVAL.captures(line.trim_end()) else {
        return Ok(None);
    };
    if caps.name("role").is_some() {
        return Ok(None);
    }
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());

    let transfer_bytes = bytes_multiplier(&caps["transfer_unit"])?;
    let bitrate_mbps = mbps_multiplier(&caps["rate_unit"])?;
    let cwnd_bytes = match (num("cwnd"), caps.name("cwnd_unit")) {
        (Some(value), Some(unit)) => Some(value * bytes_multiplier(unit.as_str())?),
        _ => None,
    };

    let (Some(start), Some(end), Some(transfer), Some(rate)) =
        (num("start"), num("end"), num("transfer"), num("rate"))
    else {
        return Ok(None);
    };
    Ok(Some(IntervalReport {
        start,
        end,
        transfer_bytes: transfer * transfer_bytes,
        bitrate_mbps: rate * bitrate_mbps,
        retransmits: caps.name("retr").and_then(|m| m.as_str().parse().ok()),
        cwnd_bytes,
    }))
}

/// Parse all periodic interval reports in the output of `iperf3`.
pub fn parse_reports(text: &str) -> Result<Vec<IntervalReport>, ExtractError> {
    text.lines()
        .filter_map(|line| parse_line(line).transpose())
        .collect()
}

/// Congestion window (in packets) over time, with every timestamp shifted by `offset` seconds.
/// Uses the end of each interval as its timestamp.
pub fn cwnd_series(
    label: impl Into<String>,
    text: &str,
    offset: f64,
) -> Result<TimeSeries, ExtractError> {
    let mut series = TimeSeries::new(label);
    for report in parse_reports(text)? {
        if let Some(cwnd) = report.cwnd_packets() {
            series.push(report.end + offset, cwnd);
        }
    }
    if series.is_empty() {
        return Err(ExtractError::NoSamples(series.label));
    }
    Ok(series)
}

/// Throughput (in Mbps) over time. Uses the end of each interval as its timestamp.
pub fn throughput_series(label: impl Into<String>, text: &str) -> Result<TimeSeries, ExtractError> {
    let mut series = TimeSeries::new(label);
    for report in parse_reports(text)? {
        series.push(report.end, report.bitrate_mbps);
    }
    if series.is_empty() {
        return Err(ExtractError::NoSamples(series.label));
    }
    Ok(series)
}
