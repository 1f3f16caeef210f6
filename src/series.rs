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
//! Numeric time series of a single flow, as extracted from the traffic generator's output.

use std::{fmt::Write, fs, path::Path};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid data point on line {line}: {content:?}")]
    Parse { line: usize, content: String },
}

/// Sequence of `(time, value)` points belonging to one flow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl TimeSeries {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            points: Vec::new(),
        }
    }

    pub fn push(&mut self, time: f64, value: f64) {
        self.points.push((time, value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|(t, _)| *t).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|(_, v)| v).sum::<f64>() / self.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.points.iter().map(|(_, v)| *v).reduce(f64::max)
    }

    /// Serialize as one `time value` pair per line, the format read by gnuplot.
    pub fn to_text(&self) -> String {
        let mut s = String::new();
        for (t, v) in self.points.iter() {
            // writing into a `String` cannot fail
            let _ = writeln!(s, "{t} {v}");
        }
        s
    }

    /// Parse the text written by [`TimeSeries::to_text`]. Blank lines are skipped.
    pub fn from_text(label: impl Into<String>, text: &str) -> Result<Self, SeriesError> {
        let mut series = Self::new(label);
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let err = || SeriesError::Parse {
                line: i + 1,
                content: line.to_string(),
            };
            let mut fields = line.split_whitespace();
            let t: f64 = fields.next().and_then(|x| x.parse().ok()).ok_or_else(err)?;
            let v: f64 = fields.next().and_then(|x| x.parse().ok()).ok_or_else(err)?;
            series.push(t, v);
        }
        Ok(series)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), SeriesError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn read_from(
        label: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SeriesError> {
        Self::from_text(label, &fs::read_to_string(path)?)
    }
}

/// Jain's fairness index of the given allocations: 1 if all are equal, `1/n` if a single one gets
/// everything. `None` if there is nothing to compare.
pub fn jain_index(values: &[f64]) -> Option<f64> {
    let sum: f64 = values.iter().sum();
    let sum_sq: f64 = values.iter().map(|x| x * x).sum();
    if values.is_empty() || sum_sq == 0.0 {
        return None;
    }
    Some(sum * sum / (values.len() as f64 * sum_sq))
}
