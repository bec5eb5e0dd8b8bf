use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::core::analysis::AnalysisResult;
use crate::core::git::ChangeKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub commit_id: String,
    pub file_path: String,
    pub change_kind: ChangeKind,
    pub author: String,
    pub committed_at: DateTime<Utc>,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
    pub diff_truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredAnalysis {
    pub id: String,
    pub metadata: AnalysisMetadata,
    pub analysis: AnalysisResult,
}

/// Where finished analyses go. `has_analysis` lets a run skip files that
/// were already analyzed in a commit while still retrying the ones that failed.
pub trait ResultStore: Send + Sync {
    fn save(&self, analysis: &AnalysisResult, metadata: &AnalysisMetadata) -> Result<String>;
    fn has_analysis(&self, commit_id: &str, file_path: &str) -> Result<bool>;
}

fn record_id(commit_id: &str, file_path: &str) -> String {
    format!("{}-{}", commit_id, record_name(file_path))
}

/// Readable file name for a path, made unique by a hash of the exact path
/// since sanitizing maps `a/b.rs` and `a__b.rs` to the same text.
fn record_name(file_path: &str) -> String {
    format!("{}-{:08x}", sanitize_path(file_path), path_hash(file_path))
}

/// 32-bit FNV-1a. Record names are persisted, so the hash must not change
/// between builds.
fn path_hash(path: &str) -> u32 {
    path.bytes()
        .fold(0x811c_9dc5, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193))
}

fn sanitize_path(path: &str) -> String {
    path.replace('/', "__")
        .replace('\\', "__")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One pretty-printed JSON file per analysis, grouped in a directory per commit.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn commit_dir(&self, commit_id: &str) -> PathBuf {
        self.root.join(sanitize_path(commit_id))
    }

    fn record_path(&self, commit_id: &str, file_path: &str) -> PathBuf {
        self.commit_dir(commit_id)
            .join(format!("{}.json", record_name(file_path)))
    }

    pub fn load_commit(&self, commit_id: &str) -> Result<Vec<StoredAnalysis>> {
        let dir = self.commit_dir(commit_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let record: StoredAnalysis = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            records.push(record);
        }

        records.sort_by(|a, b| a.metadata.file_path.cmp(&b.metadata.file_path));
        Ok(records)
    }
}

impl ResultStore for JsonFileStore {
    fn save(&self, analysis: &AnalysisResult, metadata: &AnalysisMetadata) -> Result<String> {
        let dir = self.commit_dir(&metadata.commit_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let record = StoredAnalysis {
            id: record_id(&metadata.commit_id, &metadata.file_path),
            metadata: metadata.clone(),
            analysis: analysis.clone(),
        };
        let path = self.record_path(&metadata.commit_id, &metadata.file_path);
        let content = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Saved analysis {} to {}", record.id, path.display());
        Ok(record.id)
    }

    fn has_analysis(&self, commit_id: &str, file_path: &str) -> Result<bool> {
        Ok(self.record_path(commit_id, file_path).is_file())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredAnalysis>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StoredAnalysis> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultStore for MemoryStore {
    fn save(&self, analysis: &AnalysisResult, metadata: &AnalysisMetadata) -> Result<String> {
        let id = record_id(&metadata.commit_id, &metadata.file_path);
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|r| r.id != id);
        records.push(StoredAnalysis {
            id: id.clone(),
            metadata: metadata.clone(),
            analysis: analysis.clone(),
        });
        Ok(id)
    }

    fn has_analysis(&self, commit_id: &str, file_path: &str) -> Result<bool> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .any(|r| r.metadata.commit_id == commit_id && r.metadata.file_path == file_path))
    }
}
