// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_CONFIG_PATH;

/// Per-job GPU and I/O metrics for the textfile collector
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "dd-jobmetrics")]
#[command(about = "Attribute GPU and I/O usage to cgroup jobs and publish exposition files")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level, overriding the configuration file and environment
    #[arg(long)]
    pub log_level: Option<String>,
}
