// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Correlation of the three per-cycle datasets into job-keyed metrics.

use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::cgroup::JobMembership;
use crate::gpu::GpuUsage;
use crate::procfs::IoCounters;
use crate::sample::Sample;

/// I/O counters of one member process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIo {
    pub pid: i32,
    pub read_bytes: Sample,
    pub write_bytes: Sample,
}

/// Everything reported for one job.
///
/// GPU vectors hold `(device uuid, value)` pairs with unavailable readings
/// already dropped. `io` has one entry per member, available or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetricSet {
    pub members: Vec<i32>,
    pub gpu_utilization: Vec<(String, u64)>,
    pub gpu_memory: Vec<(String, u64)>,
    pub io: Vec<ProcessIo>,
}

/// Per-job metric sets, ordered by job id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetrics {
    jobs: BTreeMap<String, JobMetricSet>,
}

impl JobMetrics {
    pub fn get(&self, job: &str) -> Option<&JobMetricSet> {
        self.jobs.get(job)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, JobMetricSet> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<'a> IntoIterator for &'a JobMetrics {
    type Item = (&'a String, &'a JobMetricSet);
    type IntoIter = btree_map::Iter<'a, String, JobMetricSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}

/// Joins membership, GPU usage and I/O counters on pid and groups by job.
///
/// Jobs come out ordered by id, members by pid, and each member's GPU
/// records keep the order the GPU tool reported them in. Two members on the
/// same device yield two entries; nothing is deduplicated or summed. A pid
/// missing from `io` is reported with unavailable counters.
pub fn aggregate(
    membership: &JobMembership,
    gpu: &GpuUsage,
    io: &BTreeMap<i32, IoCounters>,
) -> JobMetrics {
    let mut jobs: BTreeMap<String, JobMetricSet> = BTreeMap::new();

    // membership iterates in pid order
    for (pid, job) in membership.iter() {
        let set = jobs.entry(job.to_string()).or_default();
        set.members.push(pid);

        for usage in gpu.for_pid(pid) {
            if let Some(utilization) = usage.utilization.value() {
                set.gpu_utilization.push((usage.uuid.clone(), utilization));
            }
            if let Some(memory) = usage.memory_bytes.value() {
                set.gpu_memory.push((usage.uuid.clone(), memory));
            }
        }

        let counters = io.get(&pid).copied().unwrap_or(IoCounters::UNAVAILABLE);
        set.io.push(ProcessIo {
            pid,
            read_bytes: counters.read_bytes,
            write_bytes: counters.write_bytes,
        });
    }

    JobMetrics { jobs }
}
