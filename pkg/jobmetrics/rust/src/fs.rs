// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncReadExt;

const MAX_PARSE_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB

/// Reads a small kernel-exposed text file, giving up after `timeout`.
///
/// At most 1 MiB is read; anything past that is dropped.
pub async fn read_to_string_timeout(path: &Path, timeout: Duration) -> io::Result<String> {
    let read = async {
        let file = tokio::fs::File::open(path).await?;
        let mut contents = String::new();
        file.take(MAX_PARSE_FILE_SIZE)
            .read_to_string(&mut contents)
            .await?;
        Ok(contents)
    };

    match tokio::time::timeout(timeout, read).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("reading {} timed out after {timeout:?}", path.display()),
        )),
    }
}
