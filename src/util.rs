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
//! Utility module collection of functions

use std::path::{Path, PathBuf};

/// Initialize logging from `log4rs.yml` in the working directory. Falls back to logging
/// everything from `info` upwards to the console if that file is missing.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    if Path::new("log4rs.yml").exists() {
        log4rs::init_file("log4rs.yml", Default::default())?;
        return Ok(());
    }
    use log4rs::{
        append::console::ConsoleAppender,
        config::{Appender, Config, Root},
    };
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(ConsoleAppender::builder().build())))
        .build(
            Root::builder()
                .appender("stdout")
                .build(log::LevelFilter::Info),
        )?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Local time formatted for file names.
pub fn get_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;

    fn then_ts(self, p: impl AsRef<str>, ts: &str) -> PathBuf {
        self.then(p.as_ref().replacen("{}", ts, 1))
    }
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

impl PathBufExt for &PathBuf {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        self.as_path().then(p)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_ext() {
        let dir = PathBuf::from("results");
        assert_eq!((&dir).then("a"), PathBuf::from("results/a"));
        assert_eq!(
            dir.as_path().then_ts("summary_{}.csv", "now"),
            PathBuf::from("results/summary_now.csv")
        );
        assert_eq!(dir.then("b").then("c"), PathBuf::from("results/b/c"));
    }

    #[test]
    fn timestamp_is_a_portable_file_name() {
        let ts = get_timestamp();
        assert_eq!(ts.len(), "2024-01-31_23-59-59".len());
        assert!(ts.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '_'));
    }
}
