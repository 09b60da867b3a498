// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use slog::{o, Drain, Logger};

/// How log records should be rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Unstructured, column-aligned text meant for a terminal.
    Human,
    /// Bunyan-formatted json, one record per line.
    #[default]
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            x => Err(format!("invalid log format: {x}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn async_root<D>(drain: D) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = slog_async::Async::new(drain)
        .chan_size(32768)
        .build()
        .fuse();
    Logger::root(drain, o!())
}

/// Build the root logger for a daemon or test.  If `log_file` is set, records
/// are appended to that file, otherwise they go to stdout.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<Logger> {
    let root = match (log_file, log_format) {
        (Some(path), LogFormat::Human) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            let decorator = slog_term::PlainDecorator::new(file);
            async_root(slog_term::FullFormat::new(decorator).build().fuse())
        }
        (Some(path), LogFormat::Json) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            async_root(slog_bunyan::with_name(name, file).build().fuse())
        }
        (None, LogFormat::Human) => {
            let decorator = slog_term::TermDecorator::new().build();
            async_root(slog_term::FullFormat::new(decorator).build().fuse())
        }
        (None, LogFormat::Json) => {
            async_root(slog_bunyan::with_name(name, std::io::stdout()).build().fuse())
        }
    };

    Ok(root.new(o!("name" => name)))
}

#[test]
fn test_log_format_parse() {
    assert_eq!("human".parse::<LogFormat>(), Ok(LogFormat::Human));
    assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
    assert!("xml".parse::<LogFormat>().is_err());
}
