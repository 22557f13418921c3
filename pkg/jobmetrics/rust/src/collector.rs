// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One collection cycle: resolve jobs, read GPU and I/O usage, aggregate,
//! and publish the exposition files.

use std::path::PathBuf;

use log::{info, warn};

use crate::aggregate::{JobMetrics, aggregate};
use crate::cgroup::resolve_jobs;
use crate::config::Config;
use crate::errors::Result;
use crate::exposition::{publish, render_gpu, render_io};
use crate::gpu::{CommandRunner, GpuUsage, SystemCommandRunner, read_gpu_usage};
use crate::procfs::read_io_counters;

/// Aggregated metrics of one cycle, before rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    pub metrics: JobMetrics,
    pub processes: usize,
    pub conflicts: usize,
    /// The GPU tool failed and GPU metrics were left out.
    pub gpu_degraded: bool,
    /// Processes with no readable I/O counters.
    pub io_unavailable: usize,
}

/// Outcome of a published cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub jobs: usize,
    pub processes: usize,
    pub conflicts: usize,
    pub gpu_degraded: bool,
    pub io_unavailable: usize,
    pub gpu_samples: usize,
    pub io_samples: usize,
    pub gpu_path: PathBuf,
    pub io_path: PathBuf,
}

pub struct Collector<R = SystemCommandRunner> {
    config: Config,
    runner: R,
}

impl Collector<SystemCommandRunner> {
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, SystemCommandRunner)
    }
}

impl<R: CommandRunner> Collector<R> {
    pub fn with_runner(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    /// Gathers and aggregates all sources. Source failures degrade the
    /// result instead of failing it.
    pub async fn collect(&self) -> Collection {
        let config = &self.config;
        let membership = resolve_jobs(
            &config.cgroup_root,
            config.job_pattern.as_deref(),
            config.read_timeout(),
        )
        .await;

        let (gpu, gpu_degraded) = match read_gpu_usage(
            &self.runner,
            &config.gpu_query_command,
            config.command_timeout(),
        )
        .await
        {
            Ok(gpu) => (gpu, false),
            Err(e) => {
                warn!("GPU metrics unavailable for this cycle: {e}");
                (GpuUsage::default(), true)
            }
        };

        let io =
            read_io_counters(&config.proc_root, membership.pids(), config.read_timeout()).await;
        let io_unavailable = io
            .values()
            .filter(|io| !io.read_bytes.is_available() && !io.write_bytes.is_available())
            .count();

        Collection {
            metrics: aggregate(&membership, &gpu, &io),
            processes: membership.len(),
            conflicts: membership.conflicts().len(),
            gpu_degraded,
            io_unavailable,
        }
    }

    /// Runs a full cycle. Only a failure to publish is an error.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        info!("starting job metrics collection");
        let collection = self.collect().await;

        let namespace = self.config.namespace.as_str();
        let gpu = render_gpu(&collection.metrics, namespace);
        let io = render_io(&collection.metrics, namespace);

        let gpu_path = self.config.gpu_output_path();
        let io_path = self.config.io_output_path();
        publish(&gpu_path, gpu.as_str())?;
        publish(&io_path, io.as_str())?;

        let report = CycleReport {
            jobs: collection.metrics.len(),
            processes: collection.processes,
            conflicts: collection.conflicts,
            gpu_degraded: collection.gpu_degraded,
            io_unavailable: collection.io_unavailable,
            gpu_samples: gpu.samples(),
            io_samples: io.samples(),
            gpu_path,
            io_path,
        };
        info!(
            "published {} GPU and {} I/O samples for {} jobs ({} processes) to {} and {}",
            report.gpu_samples,
            report.io_samples,
            report.jobs,
            report.processes,
            report.gpu_path.display(),
            report.io_path.display()
        );
        Ok(report)
    }
}
