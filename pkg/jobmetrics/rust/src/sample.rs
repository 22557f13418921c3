// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

/// A single metric reading.
///
/// Zero is a legitimate reading (an idle GPU reports 0% utilization), so a
/// value that could not be obtained is carried as `Unavailable` rather than
/// folded into a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sample {
    Value(u64),
    #[default]
    Unavailable,
}

impl Sample {
    pub fn value(self) -> Option<u64> {
        match self {
            Sample::Value(v) => Some(v),
            Sample::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Sample::Value(_))
    }
}

impl From<Option<u64>> for Sample {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Sample::Unavailable, Sample::Value)
    }
}
