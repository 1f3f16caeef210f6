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
//! End-to-end tests of the experiment sequencing on the dry-run emulator, with canned `iperf3`
//! output.

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::oneshot;

use crate::{
    emulator::{Action, DryRunEmulator},
    experiments::{
        run_sweep, run_sweep_until, Algorithm, ExperimentConfig, ExperimentError, ExperimentRun,
        Mode, Sequencer,
    },
    render::RenderOptions,
    series::TimeSeries,
    topology::Node,
};

const CLIENT: &str = "\
Connecting to host 10.0.0.3, port 5566
[  5] local 10.0.0.1 port 45678 connected to 10.0.0.3 port 5566
[ ID] Interval           Transfer     Bitrate         Retr  Cwnd
[  5]   0.00-1.00   sec  11.2 MBytes  94.0 Mbits/sec    0   15.0 KBytes
[  5]   1.00-2.00   sec  28.8 MBytes   241 Mbits/sec    3   30.0 KBytes
- - - - - - - - - - - - - - - - - - - - - - - - -
[ ID] Interval           Transfer     Bitrate         Retr
[  5]   0.00-2.00   sec  40.0 MBytes   168 Mbits/sec    3             sender
[  5]   0.00-2.04   sec  39.1 MBytes   161 Mbits/sec                  receiver

iperf Done.
";

const SERVER: &str = "\
-----------------------------------------------------------
Server listening on 5566
-----------------------------------------------------------
Accepted connection from 10.0.0.1, port 45670
[  5] local 10.0.0.3 port 5566 connected to 10.0.0.1 port 45678
[ ID] Interval           Transfer     Bitrate
[  5]   0.00-1.00   sec  10.8 MBytes  90.0 Mbits/sec
[  5]   1.00-2.00   sec  28.7 MBytes   110 Mbits/sec
- - - - - - - - - - - - - - - - - - - - - - - - -
[ ID] Interval           Transfer     Bitrate
[  5]   0.00-2.04   sec  39.5 MBytes   100 Mbits/sec                  receiver
";

fn config(dir: &Path) -> ExperimentConfig {
    ExperimentConfig {
        results_dir: dir.to_path_buf(),
        duration: 2,
        stagger: 1,
        server_warmup: 0,
        wait_grace: 0,
        render: RenderOptions {
            gnuplot: None,
            html: true,
        },
        ..Default::default()
    }
}

/// Clients print the sender report, servers the receiver report. Vegas clients never report
/// anything.
fn emulator() -> DryRunEmulator {
    DryRunEmulator::new().with_output(|host, argv| {
        if argv.iter().any(|a| a == "vegas") {
            return Some("iperf3: error - unable to set TCP_CONGESTION".to_string());
        }
        match host {
            Node::H1 | Node::H2 => Some(CLIENT.to_string()),
            Node::H3 | Node::H4 => Some(SERVER.to_string()),
            _ => None,
        }
    })
}

fn popen(host: Node, cmd: &str) -> Action {
    Action::Popen {
        host,
        cmd: cmd.to_string(),
    }
}

#[tokio::test]
async fn cwnd_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut seq = Sequencer::new(emulator(), config(dir.path()));
    let run = ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd);

    let series = seq.run(&run).await.unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].label, "TCP Flow 1");
    assert_eq!(series[0].points, vec![(1.0, 10.0), (2.0, 20.0)]);
    // the second flow starts one stagger later
    assert_eq!(series[1].label, "TCP Flow 2");
    assert_eq!(series[1].times(), vec![2.0, 3.0]);

    assert_eq!(
        seq.emulator().actions(),
        &[
            Action::Start { delay_ms: 21 },
            popen(Node::H3, "iperf3 -s -p 5566 -1"),
            popen(Node::H4, "iperf3 -s -p 5566 -1"),
            popen(
                Node::H1,
                "iperf3 -c 10.0.0.3 -p 5566 -t 2 -C reno -i 1 -w 32M"
            ),
            popen(
                Node::H2,
                "iperf3 -c 10.0.0.4 -p 5566 -t 1 -C reno -i 1 -w 32M"
            ),
            Action::Stop,
            Action::Cleanup,
        ]
    );

    assert!(dir.path().join("cwnd_reno_h1_21").exists());
    assert!(dir.path().join("cwnd_reno_h2_21").exists());
    let stored = TimeSeries::read_from("TCP Flow 2", dir.path().join("reno_h2_21_cwnd_new"));
    assert_eq!(stored.unwrap(), series[1]);
    assert!(dir.path().join("reno_21_cwnd.html").exists());
    assert!(!dir.path().join("reno_21_cwnd.png").exists());
}

#[tokio::test]
async fn fairness_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut seq = Sequencer::new(emulator(), config(dir.path()));
    let run = ExperimentRun::new(Algorithm::Cubic, 81, Mode::Fairness);

    let series = seq.run(&run).await.unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].points, vec![(1.0, 90.0), (2.0, 110.0)]);
    assert_eq!(series[1].mean(), Some(100.0));

    let actions = seq.emulator().actions();
    assert_eq!(actions[1], popen(Node::H3, "iperf3 -s -p 5566 -i 1 -1"));
    assert_eq!(
        actions[4],
        popen(Node::H2, "iperf3 -c 10.0.0.4 -p 5566 -t 2 -C cubic")
    );
    assert!(dir.path().join("fair_cubic_h3_81").exists());
    assert!(dir.path().join("fair_cubic_h4_81").exists());
    assert!(dir.path().join("cubic_h4_81_fair_new").exists());
    assert!(dir.path().join("cubic_81_fair.html").exists());
}

#[tokio::test]
async fn run_without_processing() {
    let dir = tempfile::tempdir().unwrap();
    let run = ExperimentRun::new(Algorithm::Htcp, 162, Mode::Fairness);
    fs::write(run.plot_file(dir.path()), "stale").unwrap();

    let mut seq = Sequencer::new(emulator(), config(dir.path()));
    seq.set_processing(false);
    let series = seq.run(&run).await.unwrap();
    assert!(series.is_empty());
    assert!(dir.path().join("fair_htcp_h3_162").exists());
    assert!(!dir.path().join("htcp_h3_162_fair_new").exists());
    assert!(!run.plot_file(dir.path()).exists());
}

#[tokio::test]
async fn sweep_continues_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        algorithms: vec![Algorithm::Vegas, Algorithm::Reno],
        delays: vec![21],
        modes: vec![Mode::Cwnd],
        ..config(dir.path())
    };
    let mut seq = Sequencer::new(emulator(), config);

    let summary = run_sweep(&mut seq).await.unwrap();
    assert_eq!(summary.records.len(), 2);
    assert_eq!(summary.num_failed(), 1);

    let vegas = &summary.records[0];
    assert_eq!(vegas.algorithm, Algorithm::Vegas);
    assert!(!vegas.success);
    assert!(vegas.error.as_ref().unwrap().contains("No interval reports"));

    let reno = &summary.records[1];
    assert!(reno.success);
    assert_eq!(reno.rtt_ms, 42);
    assert_eq!(reno.flow1_mean, Some(15.0));
    assert_eq!(reno.flow2_max, Some(20.0));
    assert_eq!(reno.jain_index, Some(1.0));

    let actions = seq.emulator().actions();
    assert_eq!(actions[0], Action::Cleanup);
    // the failed run is followed by a cleanup before the next run starts
    let stops = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| **a == Action::Stop)
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    assert_eq!(stops.len(), 2);
    assert_eq!(actions[stops[0] + 1], Action::Cleanup);

    let path = summary.path.as_ref().unwrap();
    let csv = fs::read_to_string(path).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("summary_"));
}

#[tokio::test]
async fn dry_run_keeps_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        algorithms: vec![Algorithm::Reno],
        delays: vec![21],
        modes: vec![Mode::Cwnd],
        ..config(dir.path())
    };
    let run = ExperimentRun::new(Algorithm::Reno, 21, Mode::Cwnd);
    fs::write(run.raw_log(dir.path(), Node::H1), "precious measurement").unwrap();
    fs::write(run.plot_file(dir.path()), "chart").unwrap();

    let mut seq = Sequencer::new(DryRunEmulator::new(), config);
    let summary = run_sweep(&mut seq).await.unwrap();
    assert_eq!(summary.records.len(), 1);
    assert!(summary.path.is_none());

    assert_eq!(
        fs::read_to_string(run.raw_log(dir.path(), Node::H1)).unwrap(),
        "precious measurement"
    );
    assert_eq!(fs::read_to_string(run.plot_file(dir.path())).unwrap(), "chart");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    let second = popen(
        Node::H2,
        "iperf3 -c 10.0.0.4 -p 5566 -t 1 -C reno -i 1 -w 32M",
    );
    assert!(seq.emulator().actions().contains(&second));
}

#[tokio::test]
async fn dry_run_does_not_wait() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        results_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let num_runs = config.runs().len();
    assert!(config.duration >= 100);
    let mut seq = Sequencer::new(DryRunEmulator::new(), config);

    let summary = tokio::time::timeout(Duration::from_secs(10), run_sweep(&mut seq))
        .await
        .expect("a dry run must not wait for the traffic")
        .unwrap();
    assert_eq!(summary.records.len(), num_runs);
    assert_eq!(summary.num_failed(), 0);
}

#[tokio::test]
async fn abort_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        algorithms: vec![Algorithm::Reno, Algorithm::Cubic],
        delays: vec![21],
        modes: vec![Mode::Cwnd],
        ..config(dir.path())
    };
    // abort as soon as the first client is started
    let (tx, rx) = oneshot::channel::<()>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let emu = DryRunEmulator::new().with_output(move |host, _| {
        if host == Node::H1 {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }
        Some(CLIENT.to_string())
    });
    let mut seq = Sequencer::new(emu, config);

    let result = run_sweep_until(&mut seq, async move {
        let _ = rx.await;
    })
    .await;
    assert!(matches!(result, Err(ExperimentError::Interrupted)));

    let actions = seq.emulator().actions();
    assert_eq!(actions.last(), Some(&Action::Cleanup));
    assert!(actions.contains(&popen(
        Node::H1,
        "iperf3 -c 10.0.0.3 -p 5566 -t 2 -C reno -i 1 -w 32M"
    )));
    // the run was dropped before the second client and the cubic run
    assert!(!actions.iter().any(|a| matches!(a, Action::Popen { host: Node::H2, .. })));
    assert!(!actions.contains(&Action::Stop));
    assert_eq!(
        actions.iter().filter(|a| matches!(a, Action::Start { .. })).count(),
        1
    );
}

#[tokio::test]
async fn render_failure_keeps_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        algorithms: vec![Algorithm::Reno],
        delays: vec![21],
        modes: vec![Mode::Cwnd],
        render: RenderOptions {
            gnuplot: Some(dir.path().join("no-gnuplot").to_string_lossy().to_string()),
            html: false,
        },
        ..config(dir.path())
    };
    let mut seq = Sequencer::new(emulator(), config);

    let summary = run_sweep(&mut seq).await.unwrap();
    assert_eq!(summary.num_failed(), 0);
    let reno = &summary.records[0];
    assert_eq!(reno.flow1_mean, Some(15.0));
    assert_eq!(reno.flow2_samples, 2);
    assert!(dir.path().join("reno_h2_21_cwnd_new").exists());
    assert!(!dir.path().join("reno_21_cwnd.png").exists());
}
