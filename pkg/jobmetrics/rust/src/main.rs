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

use anyhow::{Context, Result};
use clap::Parser;
use dd_jobmetrics::cli::Args;
use dd_jobmetrics::{Collector, Config};
use log::{error, info};

// One cycle per invocation; the schedule belongs to cron or a systemd timer.
fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        Config::load(Some(args.config.as_path())).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let log_level = config.log_level();
    simple_logger::init_with_level(log_level)?;
    info!(
        "dd-jobmetrics {} starting, log level {:?}",
        env!("CARGO_PKG_VERSION"),
        log_level
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let collector = Collector::new(config);
    let result = runtime.block_on(collector.run_cycle());
    // A file read abandoned on timeout still occupies a blocking-pool thread;
    // the process must exit without joining it.
    runtime.shutdown_background();

    match result {
        Ok(report) => {
            if report.gpu_degraded {
                info!("cycle completed without GPU metrics");
            }
            Ok(())
        }
        Err(e) => {
            error!("collection cycle failed: {e}");
            Err(e.into())
        }
    }
}
