// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-process I/O counters from /proc/<pid>/io

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::fs::read_to_string_timeout;
use crate::sample::Sample;

/// Cumulative storage I/O of a process since it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoCounters {
    pub read_bytes: Sample,
    pub write_bytes: Sample,
}

impl IoCounters {
    pub const UNAVAILABLE: IoCounters = IoCounters {
        read_bytes: Sample::Unavailable,
        write_bytes: Sample::Unavailable,
    };

    /// Parses the `key: value` lines of /proc/<pid>/io. Unknown keys and
    /// malformed lines are ignored; a missing or non-numeric counter is left
    /// unavailable.
    pub fn parse(contents: &str) -> Self {
        let mut counters = IoCounters::UNAVAILABLE;
        for line in contents.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value: Sample = value.trim().parse::<u64>().ok().into();
            match key.trim() {
                "read_bytes" => counters.read_bytes = value,
                "write_bytes" => counters.write_bytes = value,
                _ => {}
            }
        }
        counters
    }

    pub async fn get(proc_root: &Path, pid: i32, timeout: Duration) -> std::io::Result<Self> {
        let path = proc_root.join(pid.to_string()).join("io");
        let contents = read_to_string_timeout(&path, timeout).await?;
        Ok(Self::parse(&contents))
    }
}

/// Reads the I/O counters of every pid in `pids`.
///
/// Every requested pid is present in the result. A pid whose counters
/// cannot be read (it exited, permission denied, timeout) maps to
/// [`IoCounters::UNAVAILABLE`].
pub async fn read_io_counters(
    proc_root: &Path,
    pids: impl IntoIterator<Item = i32>,
    timeout: Duration,
) -> BTreeMap<i32, IoCounters> {
    let mut counters = BTreeMap::new();
    for pid in pids {
        let io = match IoCounters::get(proc_root, pid, timeout).await {
            Ok(io) => io,
            Err(e) => {
                debug!("could not read io counters for pid {pid}: {e}");
                IoCounters::UNAVAILABLE
            }
        };
        counters.insert(pid, io);
    }
    counters
}
