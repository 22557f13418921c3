// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Text exposition of job metrics and atomic publication to the textfile
//! collector directory.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use log::debug;

use crate::aggregate::JobMetrics;
use crate::errors::{Error, Result};

pub const GPU_UTILIZATION: &str = "gpu_utilization";
pub const GPU_MEMORY_USAGE: &str = "gpu_memory_usage_in_bytes";
pub const IO_READ_BYTES: &str = "io_read_bytes";
pub const IO_WRITE_BYTES: &str = "io_write_bytes";

#[cfg(unix)]
const PUBLISHED_FILE_MODE: u32 = 0o644;

/// Rendered exposition text along with the number of sample lines in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exposition {
    text: String,
    samples: usize,
}

impl Exposition {
    fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Appends one metric family. Nothing is written for an empty family.
    fn family(
        &mut self,
        namespace: &str,
        name: &str,
        help: &str,
        kind: &str,
        samples: Vec<(Vec<(&str, String)>, u64)>,
    ) {
        if samples.is_empty() {
            return;
        }
        let name = metric_name(namespace, name);
        // writing to a String cannot fail
        let _ = writeln!(self.text, "# HELP {name} {help}");
        let _ = writeln!(self.text, "# TYPE {name} {kind}");
        for (labels, value) in samples {
            let labels = labels
                .iter()
                .map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(self.text, "{name}{{{labels}}} {value}");
            self.samples += 1;
        }
    }
}

fn metric_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}_{name}")
    }
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Renders GPU utilization and memory gauges, labelled by device and job.
pub fn render_gpu(metrics: &JobMetrics, namespace: &str) -> Exposition {
    let mut utilization = Vec::new();
    let mut memory = Vec::new();
    for (job, set) in metrics {
        let labels = |gpu_id: &String| vec![("gpu_id", gpu_id.clone()), ("job_id", job.clone())];
        for (gpu_id, value) in &set.gpu_utilization {
            utilization.push((labels(gpu_id), *value));
        }
        for (gpu_id, value) in &set.gpu_memory {
            memory.push((labels(gpu_id), *value));
        }
    }

    let mut out = Exposition::new();
    out.family(
        namespace,
        GPU_UTILIZATION,
        "GPU utilization percentage of the device used by a job process.",
        "gauge",
        utilization,
    );
    out.family(
        namespace,
        GPU_MEMORY_USAGE,
        "GPU memory held by a job process on the device.",
        "gauge",
        memory,
    );
    out
}

/// Renders per-process I/O byte counters, labelled by pid and job.
/// Unavailable counters produce no line.
pub fn render_io(metrics: &JobMetrics, namespace: &str) -> Exposition {
    let mut read = Vec::new();
    let mut write = Vec::new();
    for (job, set) in metrics {
        for io in &set.io {
            let labels = || vec![("pid", io.pid.to_string()), ("job_id", job.clone())];
            if let Some(value) = io.read_bytes.value() {
                read.push((labels(), value));
            }
            if let Some(value) = io.write_bytes.value() {
                write.push((labels(), value));
            }
        }
    }

    let mut out = Exposition::new();
    out.family(
        namespace,
        IO_READ_BYTES,
        "Bytes read from storage by a job process since it started.",
        "counter",
        read,
    );
    out.family(
        namespace,
        IO_WRITE_BYTES,
        "Bytes written to storage by a job process since it started.",
        "counter",
        write,
    );
    out
}

/// Atomically replaces `path` with `contents`.
///
/// The data goes to a uniquely named temporary file in the same directory,
/// which is synced, made world-readable and renamed over `path`. Readers see
/// either the previous file or the new one, never a partial write, and
/// overlapping publishers cannot clobber each other's temporary file.
pub fn publish(path: &Path, contents: &str) -> Result<()> {
    let publish_error = |source: std::io::Error| Error::Publish {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default()
    );

    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(publish_error)?;
    tmp.write_all(contents.as_bytes()).map_err(publish_error)?;
    tmp.flush().map_err(publish_error)?;
    tmp.as_file().sync_all().map_err(publish_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            tmp.path(),
            std::fs::Permissions::from_mode(PUBLISHED_FILE_MODE),
        )
        .map_err(publish_error)?;
    }

    tmp.persist(path).map_err(|e| publish_error(e.error))?;
    debug!("published {} ({} bytes)", path.display(), contents.len());
    Ok(())
}
