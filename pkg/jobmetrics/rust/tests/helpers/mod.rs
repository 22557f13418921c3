// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dd_jobmetrics::{CommandOutput, CommandRunner, Config, Error, Result};
use tempfile::TempDir;

pub const COMPUTE_APPS_HEADER: &str = "pid, used_gpu_memory [MiB], gpu_name, gpu_uuid\n";
pub const DEVICES_HEADER: &str = "uuid, name, utilization.gpu [%]\n";

/// A throwaway host: cgroup tree, proc tree and textfile directory.
pub struct Host {
    dir: TempDir,
}

impl Host {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["cgroup", "proc", "textfile"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn textfile_dir(&self) -> PathBuf {
        self.path().join("textfile")
    }

    /// Lists `pids` in `<cgroup>/<job_path>/cgroup.procs`.
    pub fn job(&self, job_path: &str, pids: &[i32]) -> &Self {
        let dir = self.path().join("cgroup").join(job_path);
        fs::create_dir_all(&dir).unwrap();
        let contents: String = pids.iter().map(|pid| format!("{pid}\n")).collect();
        fs::write(dir.join("cgroup.procs"), contents).unwrap();
        self
    }

    /// Writes `<proc>/<pid>/io`.
    pub fn io(&self, pid: i32, read_bytes: u64, write_bytes: u64) -> &Self {
        let dir = self.path().join("proc").join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("io"),
            format!(
                "rchar: 1\nwchar: 1\nsyscr: 1\nsyscw: 1\nread_bytes: {read_bytes}\nwrite_bytes: {write_bytes}\ncancelled_write_bytes: 0\n"
            ),
        )
        .unwrap();
        self
    }

    /// Makes `<proc>/<pid>/io` a FIFO with no writer, so opening it blocks.
    #[cfg(unix)]
    pub fn blocked_io(&self, pid: i32) -> &Self {
        let dir = self.path().join("proc").join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        nix::unistd::mkfifo(&dir.join("io"), nix::sys::stat::Mode::S_IRWXU).unwrap();
        self
    }

    pub fn config(&self) -> Config {
        Config {
            cgroup_root: self.path().join("cgroup"),
            proc_root: self.path().join("proc"),
            output_dir: self.textfile_dir(),
            ..Config::default()
        }
    }

    pub fn read_output(&self, name: &str) -> String {
        fs::read_to_string(self.textfile_dir().join(name)).unwrap()
    }

    pub fn output_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.textfile_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// What the fake GPU tool does when queried.
#[derive(Clone)]
pub enum Reply {
    Csv(String),
    Exit(i32, &'static str),
    Hang,
}

/// Stands in for the GPU query tool.
pub struct FakeGpuTool {
    pub compute_apps: Reply,
    pub devices: Reply,
}

impl FakeGpuTool {
    pub fn new(compute_apps_rows: &str, device_rows: &str) -> Self {
        Self {
            compute_apps: Reply::Csv(format!("{COMPUTE_APPS_HEADER}{compute_apps_rows}")),
            devices: Reply::Csv(format!("{DEVICES_HEADER}{device_rows}")),
        }
    }

    pub fn failing() -> Self {
        let reply = Reply::Exit(
            9,
            "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver.",
        );
        Self {
            compute_apps: reply.clone(),
            devices: reply,
        }
    }
}

impl CommandRunner for FakeGpuTool {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let reply = if args
            .first()
            .is_some_and(|arg| arg.starts_with("--query-compute-apps"))
        {
            &self.compute_apps
        } else {
            &self.devices
        };
        match reply {
            Reply::Csv(stdout) => Ok(CommandOutput {
                status: Some(0),
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            Reply::Exit(code, stderr) => Ok(CommandOutput {
                status: Some(*code),
                stdout: String::new(),
                stderr: (*stderr).to_string(),
            }),
            Reply::Hang => Err(Error::Timeout {
                what: program.to_string(),
                timeout,
            }),
        }
    }
}
