//! Escalation audit sinks
//!
//! Every finished cascade, acknowledged or not, is handed to an audit sink.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use super::EscalationResult;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait EscalationAudit: Send + Sync + 'static {
    async fn record(&self, result: &EscalationResult) -> Result<(), AuditError>;
}

/// Appends one JSON object per line.
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl EscalationAudit for JsonlAuditLog {
    async fn record(&self, result: &EscalationResult) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps results in memory; used when no audit path is configured and in tests.
#[derive(Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<EscalationResult>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EscalationResult> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EscalationAudit for MemoryAudit {
    async fn record(&self, result: &EscalationResult) -> Result<(), AuditError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(result.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::AlertPriority;
    use chrono::Utc;

    fn result(id: &str) -> EscalationResult {
        EscalationResult {
            alert_id: id.to_string(),
            subject_name: "Maria".into(),
            reason: "fell".into(),
            priority: AlertPriority::High,
            attempts: vec![],
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            final_channel: None,
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn test_jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("nested").join("audit.jsonl"));

        log.record(&result("a1")).await.unwrap();
        log.record(&result("a2")).await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let ids: Vec<String> = contents
            .lines()
            .map(|l| serde_json::from_str::<EscalationResult>(l).unwrap().alert_id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_memory_audit() {
        let audit = MemoryAudit::new();
        audit.record(&result("m1")).await.unwrap();
        assert_eq!(audit.records().len(), 1);
    }
}
