// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-command output log files under the data directory — the
//! "Log line" data-model entry's other half (§3), alongside the in-memory
//! system log ring in [`crate::ring`]. One file per `(host, command)`, with
//! a header, timestamped output lines, and a footer recording completion
//! status.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::model::epoch_ms;

/// Writes and appends to the per-command log files under
/// `<data_dir>/command-logs/<hostname>/<command_id>.log`.
#[derive(Clone)]
pub struct CommandLogWriter {
    root: PathBuf,
}

impl CommandLogWriter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into().join("command-logs") }
    }

    fn path_for(&self, hostname: &str, command_id: i64) -> PathBuf {
        self.root.join(hostname).join(format!("{command_id}.log"))
    }

    /// Create the file and write its header. Returns the path so the caller
    /// can persist it alongside the command record.
    pub async fn open(
        &self,
        hostname: &str,
        command_id: i64,
        op: &str,
        args: &[String],
    ) -> std::io::Result<PathBuf> {
        let path = self.path_for(hostname, command_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let header = format!(
            "=== nixfleet command #{command_id} ===\nhost: {hostname}\nop: {op}\nargs: {}\nstarted_at: {}\n---\n",
            args.join(" "),
            epoch_ms(),
        );
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Append one timestamped output line.
    pub async fn append_line(&self, path: &Path, stream: &str, line: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
        let entry = format!("[{}] {stream}: {line}\n", epoch_ms());
        file.write_all(entry.as_bytes()).await
    }

    /// Append the completion footer.
    pub async fn footer(&self, path: &Path, status: &str, exit_code: Option<i32>) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
        let footer = format!(
            "---\nfinished_at: {}\nstatus: {status}\nexit_code: {}\n",
            epoch_ms(),
            exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_owned()),
        );
        file.write_all(footer.as_bytes()).await
    }
}
