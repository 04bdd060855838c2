//! File-backed delivery endpoint.
//!
//! Delivered reports are appended to a JSONL (JSON Lines) file with file
//! locking. Submissions are keyed by session id: a report whose session is
//! already in the outbox is acknowledged without writing a second line.

use crate::queue::{CompletionTransport, DeliveryReceipt};
use crate::report::CompletionReport;
use crate::Result;
use fs2::FileExt;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Deserialize)]
struct SessionKey {
    session_id: Uuid,
}

/// JSONL outbox standing in for the remote completion endpoint
#[derive(Clone, Debug)]
pub struct OutboxTransport {
    path: PathBuf,
}

impl OutboxTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CompletionTransport for OutboxTransport {
    fn deliver(&self, report: &CompletionReport) -> Result<DeliveryReceipt> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let already_recorded = BufReader::new(&file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str::<SessionKey>(&line).ok())
            .any(|key| key.session_id == report.session_id);

        if already_recorded {
            file.unlock()?;
            tracing::debug!("Session {} already in outbox", report.session_id);
            return Ok(DeliveryReceipt::AlreadyRecorded);
        }

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(report)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended session {} to outbox", report.session_id);
        Ok(DeliveryReceipt::Created)
    }
}

/// Read all delivered reports from an outbox file
pub fn read_reports(path: &Path) -> Result<Vec<CompletionReport>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut reports = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<CompletionReport>(&line) {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::warn!("Failed to parse report at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} reports from outbox", reports.len());
    Ok(reports)
}
