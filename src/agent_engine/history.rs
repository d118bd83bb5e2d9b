use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ColorBotResult;

/// Records kept in memory; the JSONL file holds everything.
const MAX_IN_MEMORY: usize = 256;

/// One perception-decision-action cycle, as written to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub ts: i64,
    pub frame_id: u64,
    pub detections: usize,
    pub texts: usize,
    pub decision: String,
    pub intents: usize,
    pub events_dispatched: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl CycleRecord {
    pub fn start(cycle: u64, frame_id: u64) -> Self {
        Self {
            cycle,
            ts: chrono::Utc::now().timestamp_millis(),
            frame_id,
            detections: 0,
            texts: 0,
            decision: String::new(),
            intents: 0,
            events_dispatched: 0,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

pub struct SessionLog {
    pub session_id: String,
    records: VecDeque<CycleRecord>,
    file_path: Option<PathBuf>,
}

impl SessionLog {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            records: VecDeque::new(),
            file_path: None,
        }
    }

    /// Also append every record to a JSONL file. A directory gets a
    /// `session_<id>.jsonl` file of its own.
    pub fn with_file(path: &Path) -> ColorBotResult<Self> {
        let mut log = Self::new();
        let file_path = if path.is_dir() {
            path.join(format!("session_{}.jsonl", log.session_id))
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            path.to_path_buf()
        };
        tracing::info!(session_id = %log.session_id, path = %file_path.display(), "session log opened");
        log.file_path = Some(file_path);
        Ok(log)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn push(&mut self, record: CycleRecord) -> ColorBotResult<()> {
        let flushed = self.append(&record);
        self.records.push_back(record);
        while self.records.len() > MAX_IN_MEMORY {
            self.records.pop_front();
        }
        flushed
    }

    fn append(&self, record: &CycleRecord) -> ColorBotResult<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let line = serde_json::to_string(record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), cycle = record.cycle, "cycle record flushed");
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_jsonl_lines() {
        let dir = std::env::temp_dir().join(format!("colorbot-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut log = SessionLog::with_file(&dir).unwrap();

        let mut record = CycleRecord::start(0, 7);
        record.decision = "act".into();
        log.push(record).unwrap();
        let mut record = CycleRecord::start(1, 8);
        record.error = Some("search region outside frame".into());
        log.push(record).unwrap();

        let text = std::fs::read_to_string(log.file_path().unwrap()).unwrap();
        let lines: Vec<CycleRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].frame_id, 7);
        assert!(lines[1].failed());
        assert_eq!(log.len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn memory_is_bounded() {
        let mut log = SessionLog::new();
        for i in 0..(MAX_IN_MEMORY as u64 + 10) {
            log.push(CycleRecord::start(i, i)).unwrap();
        }
        assert_eq!(log.len(), MAX_IN_MEMORY);
        assert_eq!(log.records().next().unwrap().cycle, 10);
    }
}
