// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod aggregate;
pub mod cgroup;
pub mod cli;
pub mod collector;
pub mod config;
mod errors;
pub mod exposition;
mod fs;
pub mod gpu;
pub mod procfs;
mod sample;

// Re-export the public API
pub use aggregate::{JobMetricSet, JobMetrics, ProcessIo, aggregate};
pub use cgroup::{JobMembership, MembershipConflict, resolve_jobs};
pub use collector::{Collection, Collector, CycleReport};
pub use config::Config;
pub use errors::{Error, Result};
pub use exposition::{Exposition, publish, render_gpu, render_io};
pub use gpu::{
    CommandOutput, CommandRunner, GpuDevice, GpuUsage, ProcessGpuUsage, SystemCommandRunner,
    read_gpu_usage,
};
pub use procfs::{IoCounters, read_io_counters};
pub use sample::Sample;
