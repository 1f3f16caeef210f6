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
//! Rendering of the per-flow series into time-series charts.
//!
//! Static PNG charts are produced by piping a script into `gnuplot`, interactive HTML charts are
//! written with `plotly`.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    process::Stdio,
};

use plotly::{
    common::{Mode, Title},
    layout::Axis,
    Layout, Plot, Scatter,
};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::series::TimeSeries;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gnuplot exited with {0}")]
    Gnuplot(String),
    #[error("Nothing to plot for {0}")]
    Empty(String),
}

/// Description of a chart: its labels, its x range, and the files holding the series.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    /// Upper end of the x axis, in seconds; the axis starts at 1.
    pub x_max: u64,
    /// Data files (one `time value` pair per line) and their titles.
    pub series_files: Vec<(PathBuf, String)>,
}

impl Chart {
    /// Script instructing gnuplot to render the chart as PNG into `output`.
    pub fn gnuplot_script(&self, output: &Path) -> String {
        let mut s = String::new();
        let x_max = self.x_max.max(1);
        let step = (x_max / 10).max(1);
        // writing into a `String` cannot fail
        let _ = writeln!(s, "set terminal png");
        let _ = writeln!(s, "set output \"{}\"", output.display());
        let _ = writeln!(s, "set title \"{}\"", self.title);
        let _ = writeln!(s, "set xlabel \"{}\"", self.xlabel);
        let _ = writeln!(s, "set ylabel \"{}\"", self.ylabel);
        let _ = writeln!(s, "set xrange [1:{x_max}]");
        let _ = writeln!(s, "set xtics 1,{step},{x_max}");
        let plots = self
            .series_files
            .iter()
            .map(|(path, title)| {
                format!(
                    "\"{}\" title \"{title}\" with linespoints",
                    path.display()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(s, "plot {plots}");
        let _ = writeln!(s, "exit");
        s
    }
}

/// Settings of the plot renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// gnuplot binary to use for PNG charts, `None` disables them.
    pub gnuplot: Option<String>,
    /// Whether to write interactive HTML charts.
    pub html: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            gnuplot: Some("gnuplot".to_string()),
            html: true,
        }
    }
}

impl RenderOptions {
    /// Render `chart` into `png` (via gnuplot) and into the `.html` file next to it (via plotly).
    /// `series` must hold the data of `chart.series_files`, in the same order.
    pub async fn render(
        &self,
        chart: &Chart,
        series: &[TimeSeries],
        png: &Path,
    ) -> Result<(), RenderError> {
        if series.iter().all(|s| s.is_empty()) {
            return Err(RenderError::Empty(chart.title.clone()));
        }
        if png.exists() {
            std::fs::remove_file(png)?;
        }
        if let Some(gnuplot) = &self.gnuplot {
            log::debug!("Plotting {}", png.display());
            run_gnuplot(gnuplot, &chart.gnuplot_script(png)).await?;
        }
        if self.html {
            let html = png.with_extension("html");
            log::debug!("Plotting {}", html.display());
            plotly_chart(chart, series).write_html(html);
        }
        Ok(())
    }
}

async fn run_gnuplot(program: &str, script: &str) -> Result<(), RenderError> {
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes()).await?;
        // closing stdin lets gnuplot terminate
    }
    let status = child.wait().await?;
    if !status.success() {
        return Err(RenderError::Gnuplot(status.to_string()));
    }
    Ok(())
}

/// Build the interactive chart with one line per series.
pub fn plotly_chart(chart: &Chart, series: &[TimeSeries]) -> Plot {
    let mut plot = Plot::new();
    for s in series {
        let trace = Scatter::new(s.times(), s.values())
            .name(&s.label)
            .mode(Mode::LinesMarkers);
        plot.add_trace(trace);
    }
    let layout = Layout::new()
        .title(Title::with_text(&chart.title))
        .x_axis(
            Axis::new()
                .title(Title::with_text(&chart.xlabel))
                .range(vec![1.0, chart.x_max.max(1) as f64]),
        )
        .y_axis(Axis::new().title(Title::with_text(&chart.ylabel)));
    plot.set_layout(layout);
    plot
}
