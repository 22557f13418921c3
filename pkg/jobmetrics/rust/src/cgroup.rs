// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Resolution of process ids to jobs from the control-group hierarchy.
//!
//! A job is any cgroup directory holding a `cgroup.procs` file; the job id is
//! the name of that directory. A pid that shows up in more than one directory
//! belongs to whichever one is visited last. Directory entries are visited in
//! file-name order, which makes "last" the lexicographically greatest path
//! (compared component by component). That is a modeling limitation rather
//! than a correctness guarantee: the kernel only lists a process in one
//! cgroup per hierarchy, so a conflict means several hierarchies are mounted
//! under the root, and there is no right answer. Conflicts are kept on the
//! result and summarized in a single warning per scan.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;
use std::time::Duration;

use log::{debug, trace, warn};
use walkdir::WalkDir;

use crate::fs::read_to_string_timeout;

pub const CGROUP_PROCS: &str = "cgroup.procs";

/// A pid that was claimed by a second job during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConflict {
    pub pid: i32,
    pub previous_job: String,
    pub job: String,
}

/// Mapping from pid to job id for one collection cycle.
#[derive(Debug, Default, Clone)]
pub struct JobMembership {
    jobs: BTreeMap<i32, String>,
    conflicts: Vec<MembershipConflict>,
}

impl JobMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `pid` to `job`, replacing any earlier assignment.
    pub fn insert(&mut self, pid: i32, job: impl Into<String>) {
        let job = job.into();
        match self.jobs.entry(pid) {
            Entry::Vacant(entry) => {
                entry.insert(job);
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() != job {
                    let previous_job = entry.insert(job.clone());
                    debug!("pid {pid} found in jobs {previous_job} and {job}, keeping {job}");
                    self.conflicts.push(MembershipConflict {
                        pid,
                        previous_job,
                        job,
                    });
                }
            }
        }
    }

    pub fn job(&self, pid: i32) -> Option<&str> {
        self.jobs.get(&pid).map(String::as_str)
    }

    /// Iterates over (pid, job) pairs in ascending pid order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.jobs.iter().map(|(pid, job)| (*pid, job.as_str()))
    }

    pub fn pids(&self) -> impl Iterator<Item = i32> + '_ {
        self.jobs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn conflicts(&self) -> &[MembershipConflict] {
        &self.conflicts
    }
}

impl<S: Into<String>> FromIterator<(i32, S)> for JobMembership {
    fn from_iter<T: IntoIterator<Item = (i32, S)>>(iter: T) -> Self {
        let mut membership = JobMembership::new();
        for (pid, job) in iter {
            membership.insert(pid, job);
        }
        membership
    }
}

/// Parses the contents of a `cgroup.procs` file. Lines that are not a
/// positive pid are skipped.
fn parse_pids(contents: &str) -> impl Iterator<Item = i32> + '_ {
    contents.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.parse::<i32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                trace!("ignoring invalid pid entry {line:?}");
                None
            }
        }
    })
}

/// One line describing every conflict of a scan, `None` when there were none.
fn conflict_summary(root: &Path, conflicts: &[MembershipConflict]) -> Option<String> {
    let first = conflicts.first()?;
    Some(format!(
        "{} pids are listed in more than one job under {} (e.g. pid {} in {} and {}); \
         each was assigned to the last one scanned",
        conflicts.len(),
        root.display(),
        first.pid,
        first.previous_job,
        first.job
    ))
}

/// Walks the cgroup tree under `root` and maps every listed pid to its job.
///
/// When `job_pattern` is set, only directories whose name matches the glob
/// are considered jobs. Unreadable directories and files are skipped, and a
/// missing root produces an empty mapping.
pub async fn resolve_jobs(
    root: &Path,
    job_pattern: Option<&str>,
    read_timeout: Duration,
) -> JobMembership {
    let mut membership = JobMembership::new();

    let entries = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("skipping unreadable cgroup entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == CGROUP_PROCS);

    for entry in entries {
        let path = entry.path();
        let Some(job) = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        else {
            trace!("no job name for {}", path.display());
            continue;
        };

        if let Some(pattern) = job_pattern
            && !glob_match::glob_match(pattern, job)
        {
            continue;
        }

        let contents = match read_to_string_timeout(path, read_timeout).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("skipping {}: {e}", path.display());
                continue;
            }
        };

        for pid in parse_pids(&contents) {
            membership.insert(pid, job);
        }
    }

    if let Some(summary) = conflict_summary(root, membership.conflicts()) {
        warn!("{summary}");
    }
    debug!(
        "resolved {} pids from {} ({} conflicts)",
        membership.len(),
        root.display(),
        membership.conflicts().len()
    );
    membership
}
