// src/core/backups.rs

//! Durable config backups: one file per monotonic version plus a JSON
//! index. Versions are never reused within a host's lifetime; pinned
//! records are exempt from retention eviction.

use crate::core::errors::FlywallError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub size: u64,
    pub auto: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackupIndex {
    /// High-water mark; survives deletions so versions are never reused.
    next_version: u64,
    records: Vec<BackupRecord>,
}

#[derive(Debug)]
pub struct BackupStore {
    dir: PathBuf,
    index: Mutex<BackupIndex>,
}

impl BackupStore {
    /// Opens the store, creating the directory and reading the index if one
    /// exists.
    pub async fn open(dir: &Path) -> Result<Self, FlywallError> {
        tokio::fs::create_dir_all(dir).await?;
        let index_path = dir.join("index.json");
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BackupIndex {
                next_version: 1,
                ..BackupIndex::default()
            },
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    fn backup_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("config-{version}.conf"))
    }

    /// Creates a backup of the given rendered config text, then evicts
    /// unpinned records beyond `max_backups`, oldest first.
    pub async fn create(
        &self,
        contents: &str,
        description: &str,
        auto: bool,
        max_backups: usize,
    ) -> Result<BackupRecord, FlywallError> {
        let mut index = self.index.lock().await;
        let version = index.next_version;
        index.next_version += 1;

        let path = self.backup_path(version);
        tokio::fs::write(&path, contents).await?;

        let record = BackupRecord {
            version,
            timestamp: Utc::now(),
            description: description.to_string(),
            size: contents.len() as u64,
            auto,
            pinned: false,
        };
        index.records.push(record.clone());
        index.records.sort_by_key(|r| r.version);

        // Retention: unpinned records beyond the cap go, oldest first.
        let unpinned = index.records.iter().filter(|r| !r.pinned).count();
        if unpinned > max_backups {
            let evicted: Vec<u64> = index
                .records
                .iter()
                .filter(|r| !r.pinned)
                .take(unpinned - max_backups)
                .map(|r| r.version)
                .collect();
            for version in evicted {
                index.records.retain(|r| r.version != version);
                if let Err(e) = tokio::fs::remove_file(self.backup_path(version)).await {
                    warn!(version, "failed to remove evicted backup file: {e}");
                }
                info!(version, "evicted backup past retention limit");
            }
        }

        self.write_index(&index).await?;
        info!(version, auto, "created backup");
        Ok(record)
    }

    /// All records, sorted ascending by version.
    pub async fn list(&self) -> Vec<BackupRecord> {
        self.index.lock().await.records.clone()
    }

    /// Reads back the config text of one backup.
    pub async fn read(&self, version: u64) -> Result<String, FlywallError> {
        let index = self.index.lock().await;
        if !index.records.iter().any(|r| r.version == version) {
            return Err(FlywallError::NotFound(format!("backup {version}")));
        }
        Ok(tokio::fs::read_to_string(self.backup_path(version)).await?)
    }

    pub async fn set_pinned(&self, version: u64, pinned: bool) -> Result<BackupRecord, FlywallError> {
        let mut index = self.index.lock().await;
        let record = index
            .records
            .iter_mut()
            .find(|r| r.version == version)
            .ok_or_else(|| FlywallError::NotFound(format!("backup {version}")))?;
        record.pinned = pinned;
        let record = record.clone();
        self.write_index(&index).await?;
        Ok(record)
    }

    pub async fn delete(&self, version: u64) -> Result<(), FlywallError> {
        let mut index = self.index.lock().await;
        let before = index.records.len();
        index.records.retain(|r| r.version != version);
        if index.records.len() == before {
            return Err(FlywallError::NotFound(format!("backup {version}")));
        }
        if let Err(e) = tokio::fs::remove_file(self.backup_path(version)).await {
            warn!(version, "failed to remove backup file: {e}");
        }
        self.write_index(&index).await?;
        Ok(())
    }

    async fn write_index(&self, index: &BackupIndex) -> Result<(), FlywallError> {
        let path = self.dir.join("index.json");
        let tmp = self.dir.join("index.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(index)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
