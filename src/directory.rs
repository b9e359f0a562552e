//! Subject and caregiver lookups
//!
//! The relay only needs two queries: "who is this identity" and "who looks
//! after this subject". Both sit behind the `Directory` trait so a database
//! can replace the JSON file used here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::escalation::CaregiverContact;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read directory {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse directory {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// A person who talks to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    /// External identity the client registers with.
    pub identity: String,
    pub name: String,
    #[serde(default)]
    pub voice_name: Option<String>,
}

#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn subject(&self, identity: &str) -> Result<Option<Subject>, DirectoryError>;

    /// Caregivers for a subject, ordered by priority (1 first).
    async fn contacts_for(&self, subject_id: i64) -> Result<Vec<CaregiverContact>, DirectoryError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(default)]
    pub contacts: Vec<CaregiverContact>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    subjects: Vec<SubjectRecord>,
}

/// In-memory directory, usually loaded from a JSON file.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    by_identity: HashMap<String, SubjectRecord>,
    identity_by_id: HashMap<i64, String>,
}

impl StaticDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<SubjectRecord>) -> Self {
        let mut dir = Self::default();
        for mut record in records {
            record.contacts.sort_by_key(|c| c.priority);
            dir.identity_by_id
                .insert(record.subject.id, record.subject.identity.clone());
            if let Some(prev) = dir
                .by_identity
                .insert(record.subject.identity.clone(), record)
            {
                log::warn!(
                    "Directory: duplicate identity for subject {}, keeping the later entry",
                    prev.subject.id
                );
            }
        }
        dir
    }

    /// Load `{"subjects": [...]}` from disk.
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DirectoryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: DirectoryFile =
            serde_json::from_str(&contents).map_err(|source| DirectoryError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        log::info!(
            "Directory: loaded {} subjects from {:?}",
            file.subjects.len(),
            path
        );
        Ok(Self::from_records(file.subjects))
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn subject(&self, identity: &str) -> Result<Option<Subject>, DirectoryError> {
        Ok(self.by_identity.get(identity).map(|r| r.subject.clone()))
    }

    async fn contacts_for(&self, subject_id: i64) -> Result<Vec<CaregiverContact>, DirectoryError> {
        Ok(self
            .identity_by_id
            .get(&subject_id)
            .and_then(|identity| self.by_identity.get(identity))
            .map(|r| r.contacts.clone())
            .unwrap_or_default())
    }
}
