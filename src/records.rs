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
//! Module defining the record written to the sweep summary CSV for every experiment run.
use serde::{Deserialize, Serialize};

use crate::{
    experiments::{Algorithm, ExperimentRun, Mode},
    series::{jain_index, TimeSeries},
};

/// Outcome of a single experiment run. Flow statistics are missing if the run failed or the
/// output was not processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub algorithm: Algorithm,
    pub delay_ms: u32,
    pub rtt_ms: u32,
    pub mode: Mode,
    pub success: bool,
    pub error: Option<String>,
    pub flow1_samples: usize,
    pub flow1_mean: Option<f64>,
    pub flow1_max: Option<f64>,
    pub flow2_samples: usize,
    pub flow2_mean: Option<f64>,
    pub flow2_max: Option<f64>,
    /// Jain's fairness index over the mean values of both flows.
    pub jain_index: Option<f64>,
    /// Wall-clock duration of the run in seconds.
    pub duration_s: f64,
}

impl RunRecord {
    /// Record of a successful run with the series of both flows.
    pub fn success(run: &ExperimentRun, series: &[TimeSeries], duration_s: f64) -> Self {
        let flow = |i: usize| series.get(i);
        let means = series.iter().filter_map(TimeSeries::mean).collect::<Vec<_>>();
        Self {
            flow1_samples: flow(0).map(TimeSeries::len).unwrap_or_default(),
            flow1_mean: flow(0).and_then(TimeSeries::mean),
            flow1_max: flow(0).and_then(TimeSeries::max),
            flow2_samples: flow(1).map(TimeSeries::len).unwrap_or_default(),
            flow2_mean: flow(1).and_then(TimeSeries::mean),
            flow2_max: flow(1).and_then(TimeSeries::max),
            jain_index: if means.len() == series.len() {
                jain_index(&means)
            } else {
                None
            },
            ..Self::empty(run, true, None, duration_s)
        }
    }

    /// Record of a failed run.
    pub fn failure(run: &ExperimentRun, error: impl ToString, duration_s: f64) -> Self {
        Self::empty(run, false, Some(error.to_string()), duration_s)
    }

    fn empty(run: &ExperimentRun, success: bool, error: Option<String>, duration_s: f64) -> Self {
        Self {
            algorithm: run.algorithm,
            delay_ms: run.delay_ms,
            rtt_ms: 2 * run.delay_ms,
            mode: run.mode,
            success,
            error,
            flow1_samples: 0,
            flow1_mean: None,
            flow1_max: None,
            flow2_samples: 0,
            flow2_mean: None,
            flow2_max: None,
            jain_index: None,
            duration_s,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn series(label: &str, values: &[f64]) -> TimeSeries {
        let mut s = TimeSeries::new(label);
        for (i, v) in values.iter().enumerate() {
            s.push(i as f64 + 1.0, *v);
        }
        s
    }

    #[test]
    fn success_record() {
        let run = ExperimentRun::new(Algorithm::Cubic, 81, Mode::Fairness);
        let record = RunRecord::success(
            &run,
            &[series("TCP Flow 1", &[10.0, 30.0]), series("TCP Flow 2", &[20.0, 20.0])],
            12.5,
        );
        assert!(record.success);
        assert_eq!(record.rtt_ms, 162);
        assert_eq!(record.flow1_samples, 2);
        assert_eq!(record.flow1_mean, Some(20.0));
        assert_eq!(record.flow1_max, Some(30.0));
        assert_eq!(record.flow2_max, Some(20.0));
        assert_eq!(record.jain_index, Some(1.0));
    }

    #[test]
    fn failure_record() {
        let run = ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd);
        let record = RunRecord::failure(&run, "boom", 1.0);
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.jain_index, None);
        assert_eq!(record.flow2_samples, 0);
    }

    #[test]
    fn csv_row() {
        let run = ExperimentRun::new(Algorithm::Vegas, 162, Mode::Cwnd);
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .serialize(RunRecord::failure(&run, "no samples", 2.0))
            .unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert!(lines
            .next()
            .unwrap()
            .starts_with("algorithm,delay_ms,rtt_ms,mode,success,error"));
        assert!(lines
            .next()
            .unwrap()
            .starts_with("vegas,162,324,cwnd,false,no samples,0,,,0,,,,2.0"));
    }
}
