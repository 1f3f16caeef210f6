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
//! Helper to execute (privileged) system commands such as `ip` or `tc`.

use std::{
    collections::VecDeque,
    ffi::{OsStr, OsString},
};

use itertools::Itertools;
use tokio::process::Command;

use super::EmulatorError;

/// Executes commands on the local machine, optionally prefixed by `sudo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdRunner {
    sudo: bool,
}

impl CmdRunner {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    /// Prepare a command from its arguments, without spawning it.
    pub fn command<I, S>(&self, argv: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv = argv
            .into_iter()
            .map(|s| s.as_ref().to_os_string())
            .collect::<VecDeque<_>>();
        let program = if self.sudo {
            OsString::from("sudo")
        } else {
            // an empty program fails when spawned
            argv.pop_front().unwrap_or_default()
        };
        let mut cmd = Command::new(program);
        cmd.args(argv);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Execute the command and return its standard output. Fails if the command exits with a
    /// non-zero status.
    pub async fn run<I, S>(&self, argv: I) -> Result<String, EmulatorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let argv = argv
            .into_iter()
            .map(|s| s.as_ref().to_os_string())
            .collect_vec();
        let cmd_str = argv.iter().map(|s| s.to_string_lossy()).join(" ");
        log::trace!("$ {cmd_str}");
        let output = self.command(&argv).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(EmulatorError::Command {
                cmd: cmd_str,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Execute the command, only logging a failure.
    pub async fn run_best_effort<I, S>(&self, argv: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if let Err(e) = self.run(argv).await {
            log::debug!("ignoring error: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn run_success() {
        let runner = CmdRunner::new(false);
        let out = runner.run(["echo", "hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_failure() {
        let runner = CmdRunner::new(false);
        let err = runner.run(["false"]).await.unwrap_err();
        assert!(matches!(err, EmulatorError::Command { .. }));
        runner.run_best_effort(["false"]).await;
    }
}
