//! Append-only run log.
//!
//! Sync runs append [`SyncEvent`]s as newline-delimited JSON to
//! `<home>/sync_log.jsonl`, so `status` can report what the last run did.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{SyncEvent, SyncEventType};

/// File-based run log using JSONL format
#[derive(Debug, Clone)]
pub struct SyncLog {
    path: PathBuf,
}

impl SyncLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &SyncEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open sync log: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order, skipping lines that do not parse
    pub async fn replay(&self) -> Result<Vec<SyncEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open sync log: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "Skipping unreadable sync log line"),
            }
        }

        Ok(events)
    }

    /// Events of the most recently started run
    pub async fn last_run(&self) -> Result<Vec<SyncEvent>> {
        let events = self.replay().await?;

        let Some(run_id) = last_run_id(&events) else {
            return Ok(Vec::new());
        };

        Ok(events.into_iter().filter(|e| e.run_id == run_id).collect())
    }
}

fn last_run_id(events: &[SyncEvent]) -> Option<Uuid> {
    events
        .iter()
        .rev()
        .find(|e| e.event_type == SyncEventType::RunStarted)
        .map(|e| e.run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let temp = TempDir::new().unwrap();
        let log = SyncLog::new(temp.path().join("state").join("sync_log.jsonl"));
        let run_id = Uuid::new_v4();

        for event_type in [
            SyncEventType::RunStarted,
            SyncEventType::CourseSynced,
            SyncEventType::RunCompleted,
        ] {
            log.append(&SyncEvent::new(run_id, event_type, "test")).await.unwrap();
        }

        let events = log.replay().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, SyncEventType::RunStarted);
        assert_eq!(events[2].event_type, SyncEventType::RunCompleted);
    }

    #[tokio::test]
    async fn test_last_run_and_corrupt_lines() {
        let temp = TempDir::new().unwrap();
        let log = SyncLog::new(temp.path().join("sync_log.jsonl"));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        log.append(&SyncEvent::new(first, SyncEventType::RunStarted, "one")).await.unwrap();
        log.append(&SyncEvent::new(first, SyncEventType::RunCompleted, "one")).await.unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"{truncated\n"))
            .unwrap();
        log.append(&SyncEvent::new(second, SyncEventType::RunStarted, "two")).await.unwrap();

        let last = log.last_run().await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].run_id, second);
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let temp = TempDir::new().unwrap();
        let log = SyncLog::new(temp.path().join("sync_log.jsonl"));
        assert!(log.replay().await.unwrap().is_empty());
        assert!(log.last_run().await.unwrap().is_empty());
    }
}
