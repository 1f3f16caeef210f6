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
//! Module that executes all runs of a sweep and collects their statistics.

use std::{
    fs,
    future::Future,
    path::PathBuf,
    time::{Duration, Instant},
};

use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

use super::{ExperimentError, Sequencer};
use crate::{
    emulator::Emulator,
    records::RunRecord,
    util::{get_timestamp, PathBufExt},
};

/// Result of a sweep: the summary file and the records written into it. There is no summary
/// file if the emulator writes no output.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSummary {
    pub path: Option<PathBuf>,
    pub records: Vec<RunRecord>,
}

impl SweepSummary {
    pub fn num_failed(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }
}

/// Execute every run of the configured sweep, one after the other. A failed run is logged,
/// recorded, and followed by a cleanup of the emulator; the sweep continues with the next run.
/// Pressing Ctrl-C aborts the sweep after cleaning up.
pub async fn run_sweep<E: Emulator>(
    seq: &mut Sequencer<E>,
) -> Result<SweepSummary, ExperimentError> {
    run_sweep_until(seq, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Same as [`run_sweep`], but the sweep is aborted once `abort` completes instead of on Ctrl-C.
/// The running experiment is dropped and the emulator cleaned up.
pub async fn run_sweep_until<E: Emulator>(
    seq: &mut Sequencer<E>,
    abort: impl Future<Output = ()>,
) -> Result<SweepSummary, ExperimentError> {
    let runs = seq.config().runs();
    let path = if seq.emulator().writes_output() {
        let dir = seq.config().results_dir.clone();
        fs::create_dir_all(&dir)?;
        Some(dir.then_ts("summary_{}.csv", &get_timestamp()))
    } else {
        None
    };
    let mut csv_writer = match &path {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };
    log::info!(
        "Running {} experiments with {}, writing summary to {}",
        runs.len(),
        seq.emulator().description(),
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "nowhere".to_string())
    );
    tokio::pin!(abort);

    seq.cleanup().await;

    let bar = ProgressBar::new(runs.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{wide_bar} {pos}/{len} time: {elapsed}, eta: {msg} ")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("?");
    bar.tick();

    let start_time = Instant::now();
    let mut records = Vec::with_capacity(runs.len());

    for run in runs.iter() {
        log::info!("Running {run}");
        let run_start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = &mut abort => Err(ExperimentError::Interrupted),
            result = seq.run(run) => result,
        };
        let elapsed = run_start.elapsed().as_secs_f64();

        let record = match result {
            Ok(series) => RunRecord::success(run, &series, elapsed),
            Err(ExperimentError::Interrupted) => {
                bar.abandon_with_message("interrupted");
                log::warn!("Interrupted during {run}, cleaning up");
                seq.cleanup().await;
                if let Some(w) = csv_writer.as_mut() {
                    w.flush()?;
                }
                return Err(ExperimentError::Interrupted);
            }
            Err(e) => {
                log::error!("Experiment {run} failed: {e}");
                seq.cleanup().await;
                RunRecord::failure(run, e, elapsed)
            }
        };
        if let Some(w) = csv_writer.as_mut() {
            w.serialize(&record)?;
            w.flush()?;
        }
        records.push(record);

        bar.inc(1);
        let scaling = start_time.elapsed().as_secs_f64() / bar.position() as f64;
        let remaining = runs.len().saturating_sub(bar.position() as usize);
        bar.set_message(
            HumanDuration(Duration::from_secs_f64(remaining as f64 * scaling)).to_string(),
        );
    }
    bar.finish();

    let summary = SweepSummary { path, records };
    log::info!(
        "Finished {} experiments ({} failed) in {}",
        summary.records.len(),
        summary.num_failed(),
        HumanDuration(start_time.elapsed())
    );
    Ok(summary)
}
