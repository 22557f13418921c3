// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/job-metrics.yaml";

/// Settings for one collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the control-group tree scanned for `cgroup.procs` files.
    pub cgroup_root: PathBuf,
    /// Root of the process filesystem holding `<pid>/io`.
    pub proc_root: PathBuf,
    /// Glob a directory name must match to be treated as a job.
    pub job_pattern: Option<String>,
    /// Directory watched by the textfile collector.
    pub output_dir: PathBuf,
    pub gpu_output_file: String,
    pub io_output_file: String,
    /// Prefix for metric names, joined with `_`.
    pub namespace: String,
    pub gpu_query_command: String,
    pub command_timeout_secs: u64,
    pub read_timeout_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            proc_root: PathBuf::from("/proc"),
            job_pattern: None,
            output_dir: PathBuf::from("/var/lib/node_exporter/textfile_collector"),
            gpu_output_file: "gpu_metrics.prom".to_string(),
            io_output_file: "io_metrics.prom".to_string(),
            namespace: String::new(),
            gpu_query_command: "nvidia-smi".to_string(),
            command_timeout_secs: 10,
            read_timeout_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the YAML file at `path` and applies environment overrides.
    ///
    /// A file that does not exist leaves the defaults in place; a file that
    /// exists but cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                warn!(
                    "Config file not found at {}. Using defaults and environment variables.",
                    path.display()
                );
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        // an empty document deserializes to unit, not to a map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Priority: DD_LOG_LEVEL > LOG_LEVEL > file.
    fn apply_env(&mut self) {
        if let Some(level) = env_var("DD_LOG_LEVEL").or_else(|| env_var("LOG_LEVEL")) {
            self.log_level = level;
        }
        if let Some(root) = env_var("HOST_PROC") {
            self.proc_root = PathBuf::from(root);
        }
        if let Some(root) = env_var("HOST_CGROUP") {
            self.cgroup_root = PathBuf::from(root);
        }
        if let Some(dir) = env_var("DD_JOBMETRICS_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
    }

    pub fn log_level(&self) -> log::Level {
        parse_log_level(&self.log_level)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn gpu_output_path(&self) -> PathBuf {
        self.output_dir.join(&self.gpu_output_file)
    }

    pub fn io_output_path(&self) -> PathBuf {
        self.output_dir.join(&self.io_output_file)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

/// Parse a log level string into a log::Level
/// Unknown levels silently default to Info
pub fn parse_log_level(level: &str) -> log::Level {
    match level.to_lowercase().as_str() {
        "trace" => log::Level::Trace,
        "debug" => log::Level::Debug,
        "info" => log::Level::Info,
        "warn" | "warning" => log::Level::Warn,
        "error" | "critical" | "off" => log::Level::Error,
        _ => log::Level::Info,
    }
}
