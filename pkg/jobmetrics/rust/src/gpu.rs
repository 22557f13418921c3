// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! GPU usage per process, as reported by the vendor query tool.
//!
//! Two queries are run: one listing compute processes with the memory they
//! hold on each device, and one listing devices with their utilization.
//! Utilization is a device-wide quantity, so every process record inherits
//! the utilization of the device it runs on (joined on the device UUID).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, trace};
use tokio::process::Command;

use crate::errors::{Error, Result};
use crate::sample::Sample;

pub const COMPUTE_APPS_QUERY: &[&str] = &[
    "--query-compute-apps=pid,used_gpu_memory,gpu_name,gpu_uuid",
    "--format=csv",
];
pub const DEVICE_QUERY: &[&str] = &["--query-gpu=gpu_uuid,name,utilization.gpu", "--format=csv"];

const MEMORY_UNITS: &[(&str, u64)] = &[
    ("GiB", 1 << 30),
    ("MiB", 1 << 20),
    ("KiB", 1 << 10),
    ("B", 1),
];

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs on behalf of the GPU reader.
pub trait CommandRunner {
    /// Runs `program` with `args` and captures its output. Implementations
    /// must give up and return [`Error::Timeout`] once `timeout` elapses.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput>>;
}

/// Spawns the program directly (no shell) and kills it on timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        trace!("running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, output).await {
            Ok(output) => output.map_err(|source| Error::Command {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(Error::Timeout {
                    what: program.to_string(),
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDevice {
    pub uuid: String,
    pub name: String,
    pub utilization: Sample,
}

/// One compute process on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGpuUsage {
    pub pid: i32,
    pub uuid: String,
    pub name: String,
    pub memory_bytes: Sample,
    pub utilization: Sample,
}

/// GPU usage for one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuUsage {
    pub devices: Vec<GpuDevice>,
    processes: BTreeMap<i32, Vec<ProcessGpuUsage>>,
}

impl GpuUsage {
    /// Joins process records with device records on the device UUID.
    pub fn join(processes: Vec<ProcessGpuUsage>, devices: Vec<GpuDevice>) -> Self {
        let utilization: HashMap<&str, Sample> = devices
            .iter()
            .map(|device| (device.uuid.as_str(), device.utilization))
            .collect();

        let mut by_pid: BTreeMap<i32, Vec<ProcessGpuUsage>> = BTreeMap::new();
        for mut process in processes {
            process.utilization = utilization
                .get(process.uuid.as_str())
                .copied()
                .unwrap_or(Sample::Unavailable);
            by_pid.entry(process.pid).or_default().push(process);
        }

        Self {
            devices,
            processes: by_pid,
        }
    }

    /// GPU records of `pid`, in the order the tool reported them.
    pub fn for_pid(&self, pid: i32) -> &[ProcessGpuUsage] {
        self.processes.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}

/// Queries the GPU tool and joins its two outputs.
///
/// Any failure (the tool cannot be spawned, exits non-zero, times out, or
/// prints output that cannot be parsed at all) fails the whole read: the
/// caller gets an error rather than a half-populated result.
pub async fn read_gpu_usage<R: CommandRunner>(
    runner: &R,
    program: &str,
    timeout: Duration,
) -> Result<GpuUsage> {
    let apps = query(runner, program, COMPUTE_APPS_QUERY, timeout).await?;
    let processes = parse_compute_apps(&apps)?;

    let devices = query(runner, program, DEVICE_QUERY, timeout).await?;
    let devices = parse_devices(&devices)?;

    let usage = GpuUsage::join(processes, devices);
    debug!(
        "gpu tool reported {} devices and {} processes",
        usage.devices.len(),
        usage.process_count()
    );
    Ok(usage)
}

async fn query<R: CommandRunner>(
    runner: &R,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String> {
    let output = runner.run(program, args, timeout).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            program: program.to_string(),
            status: output
                .status
                .map_or_else(|| "signal".to_string(), |code| format!("exit code {code}")),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Parses `pid, used_gpu_memory, gpu_name, gpu_uuid` rows.
pub fn parse_compute_apps(output: &str) -> Result<Vec<ProcessGpuUsage>> {
    parse_table(output, "compute apps", 4, |row| {
        let pid = row.get(0)?.parse::<i32>().ok().filter(|pid| *pid > 0)?;
        Some(ProcessGpuUsage {
            pid,
            memory_bytes: parse_memory(row.get(1)?),
            name: row.get(2)?.to_string(),
            uuid: row.get(3)?.to_string(),
            utilization: Sample::Unavailable,
        })
    })
}

/// Parses `gpu_uuid, name, utilization.gpu` rows.
pub fn parse_devices(output: &str) -> Result<Vec<GpuDevice>> {
    parse_table(output, "gpu devices", 3, |row| {
        let uuid = row.get(0)?;
        if uuid.is_empty() {
            return None;
        }
        Some(GpuDevice {
            uuid: uuid.to_string(),
            name: row.get(1)?.to_string(),
            utilization: parse_utilization(row.get(2)?),
        })
    })
}

/// Parses CSV output with a header row. Rows with the wrong number of
/// columns, or that `row` rejects, are skipped. Output is unparseable when
/// the header is missing, or when there are data rows and none is usable.
fn parse_table<T>(
    output: &str,
    what: &str,
    columns: usize,
    row: impl Fn(&StringRecord) -> Option<T>,
) -> Result<Vec<T>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(output.as_bytes());

    let header_len = reader
        .headers()
        .map_err(|e| Error::Parse {
            context: format!("{what} header: {e}"),
        })?
        .len();
    if header_len != columns {
        return Err(Error::Parse {
            context: format!("{what} header: expected {columns} columns, found {header_len}"),
        });
    }

    let mut rows = 0;
    let mut parsed = Vec::new();
    for record in reader.records() {
        rows += 1;
        match record {
            Ok(record) if record.len() == columns => match row(&record) {
                Some(value) => parsed.push(value),
                None => debug!("skipping malformed {what} row: {record:?}"),
            },
            Ok(record) => debug!("skipping {what} row with {} columns", record.len()),
            Err(e) => debug!("skipping unreadable {what} row: {e}"),
        }
    }

    if rows > 0 && parsed.is_empty() {
        return Err(Error::Parse {
            context: format!("{what}: none of {rows} rows is valid"),
        });
    }
    Ok(parsed)
}

/// Memory cells look like `500 MiB`; a bare number is taken as bytes.
fn parse_memory(cell: &str) -> Sample {
    let (number, multiplier) = MEMORY_UNITS
        .iter()
        .find_map(|(unit, multiplier)| cell.strip_suffix(unit).map(|n| (n, *multiplier)))
        .unwrap_or((cell, 1));
    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .into()
}

/// Utilization cells look like `73 %`.
fn parse_utilization(cell: &str) -> Sample {
    cell.strip_suffix('%')
        .unwrap_or(cell)
        .trim()
        .parse::<u64>()
        .ok()
        .into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const COMPUTE_APPS: &str = "pid, used_gpu_memory [MiB], gpu_name, gpu_uuid
1234, 500 MiB, NVIDIA A100-SXM4-40GB, GPU-aaaa
5678, [N/A], NVIDIA A100-SXM4-40GB, GPU-bbbb
1234, 2 MiB, NVIDIA A100-SXM4-40GB, GPU-bbbb
";

    const DEVICES: &str = "uuid, name, utilization.gpu [%]
GPU-aaaa, NVIDIA A100-SXM4-40GB, 73 %
GPU-bbbb, NVIDIA A100-SXM4-40GB, 0 %
";

    /// Serves canned output keyed on the first argument and records calls.
    struct FakeRunner {
        apps: Result<CommandOutput>,
        devices: Result<CommandOutput>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn new(apps: &str, devices: &str) -> Self {
            Self {
                apps: Ok(stdout(apps)),
                devices: Ok(stdout(devices)),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    fn stdout(s: &str) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: s.to_string(),
            stderr: String::new(),
        }
    }

    fn copy(result: &Result<CommandOutput>) -> Result<CommandOutput> {
        match result {
            Ok(output) => Ok(output.clone()),
            Err(Error::Timeout { what, timeout }) => Err(Error::Timeout {
                what: what.clone(),
                timeout: *timeout,
            }),
            Err(e) => panic!("unsupported canned error: {e}"),
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            let first = args.first().copied().unwrap_or_default();
            self.calls.borrow_mut().push(format!("{program} {first}"));
            if first.starts_with("--query-compute-apps") {
                copy(&self.apps)
            } else {
                copy(&self.devices)
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("500"), Sample::Value(500));
        assert_eq!(parse_memory("500 MiB"), Sample::Value(500 * 1024 * 1024));
        assert_eq!(parse_memory("1 GiB"), Sample::Value(1 << 30));
        assert_eq!(parse_memory("4 KiB"), Sample::Value(4096));
        assert_eq!(parse_memory("42 B"), Sample::Value(42));
        assert_eq!(parse_memory("0 MiB"), Sample::Value(0));
        assert_eq!(parse_memory("[N/A]"), Sample::Unavailable);
        assert_eq!(parse_memory("[Not Supported]"), Sample::Unavailable);
        assert_eq!(parse_memory("12 PiB"), Sample::Unavailable);
    }

    #[test]
    fn test_parse_utilization() {
        assert_eq!(parse_utilization("73 %"), Sample::Value(73));
        assert_eq!(parse_utilization("73"), Sample::Value(73));
        assert_eq!(parse_utilization("0 %"), Sample::Value(0));
        assert_eq!(parse_utilization("[N/A]"), Sample::Unavailable);
    }

    #[test]
    fn test_parse_compute_apps() {
        let apps = parse_compute_apps(COMPUTE_APPS).unwrap();
        assert_eq!(apps.len(), 3);
        assert_eq!(apps[0].pid, 1234);
        assert_eq!(apps[0].uuid, "GPU-aaaa");
        assert_eq!(apps[0].name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(apps[0].memory_bytes, Sample::Value(500 * 1024 * 1024));
        assert_eq!(apps[0].utilization, Sample::Unavailable);
        assert_eq!(apps[1].memory_bytes, Sample::Unavailable);
    }

    #[test]
    fn test_parse_header_only_is_empty() {
        let apps = parse_compute_apps("pid, used_gpu_memory [MiB], gpu_name, gpu_uuid\n").unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn test_parse_skips_malformed_rows() {
        let output = "pid, used_gpu_memory, gpu_name, gpu_uuid
not-a-pid, 1, gpu, GPU-1
12, 1, gpu
13, 500, gpu, GPU-1
";
        let apps = parse_compute_apps(output).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].pid, 13);
        assert_eq!(apps[0].memory_bytes, Sample::Value(500));
    }

    #[test]
    fn test_parse_unparseable_output() {
        assert!(matches!(parse_compute_apps(""), Err(Error::Parse { .. })));
        assert!(matches!(
            parse_compute_apps("No devices were found\n"),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            parse_devices("uuid, name, utilization.gpu\n, x, 1\n"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_join_copies_device_utilization() {
        let apps = parse_compute_apps(COMPUTE_APPS).unwrap();
        let devices = parse_devices(DEVICES).unwrap();
        let usage = GpuUsage::join(apps, devices);

        let records = usage.for_pid(1234);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uuid, "GPU-aaaa");
        assert_eq!(records[0].utilization, Sample::Value(73));
        assert_eq!(records[1].uuid, "GPU-bbbb");
        assert_eq!(records[1].utilization, Sample::Value(0));
        assert_eq!(usage.for_pid(5678)[0].utilization, Sample::Value(0));
        assert!(usage.for_pid(9).is_empty());
    }

    #[test]
    fn test_join_unknown_device_stays_unavailable() {
        let apps = parse_compute_apps("pid, mem, name, uuid\n1, 5, gpu, GPU-gone\n").unwrap();
        let usage = GpuUsage::join(apps, Vec::new());
        assert_eq!(usage.for_pid(1)[0].utilization, Sample::Unavailable);
        assert_eq!(usage.for_pid(1)[0].memory_bytes, Sample::Value(5));
    }

    #[tokio::test]
    async fn test_read_gpu_usage() {
        let runner = FakeRunner::new(COMPUTE_APPS, DEVICES);
        let usage = read_gpu_usage(&runner, "nvidia-smi", TIMEOUT).await.unwrap();

        assert_eq!(usage.devices.len(), 2);
        assert_eq!(usage.process_count(), 2);
        assert_eq!(
            *runner.calls.borrow(),
            vec![
                format!("nvidia-smi {}", COMPUTE_APPS_QUERY[0]),
                format!("nvidia-smi {}", DEVICE_QUERY[0]),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_gpu_usage_non_zero_exit() {
        let mut runner = FakeRunner::new(COMPUTE_APPS, DEVICES);
        runner.devices = Ok(CommandOutput {
            status: Some(9),
            stdout: String::new(),
            stderr: "NVIDIA-SMI has failed\n".to_string(),
        });

        let err = read_gpu_usage(&runner, "nvidia-smi", TIMEOUT)
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, "exit code 9");
                assert_eq!(stderr, "NVIDIA-SMI has failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_gpu_usage_timeout() {
        let mut runner = FakeRunner::new(COMPUTE_APPS, DEVICES);
        runner.apps = Err(Error::Timeout {
            what: "nvidia-smi".to_string(),
            timeout: TIMEOUT,
        });

        let err = read_gpu_usage(&runner, "nvidia-smi", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        // The device query is never attempted once the first one failed.
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_read_gpu_usage_unparseable_devices() {
        let runner = FakeRunner::new(COMPUTE_APPS, "garbage");
        let err = read_gpu_usage(&runner, "nvidia-smi", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let output = SystemCommandRunner
            .run("/bin/sh", &["-c", "echo out; echo err >&2; exit 3"], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_timeout() {
        let err = SystemCommandRunner
            .run("/bin/sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let err = SystemCommandRunner
            .run("/nonexistent/nvidia-smi", &[], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }
}
