//! File-backed upgrade record store.
//!
//! Layout:
//!   {state_dir}/{chain_id}.json        → JSON UpgradeRecord
//!   {state_dir}/.{chain_id}.json.{n}   → in-flight write, renamed over the record
//!
//! One file per chain keeps monitors from ever touching each other's state.
//! Writes go to a temp file that is synced and then renamed, so a record is
//! either fully replaced or left as it was.

use crate::chain::UpgradePlan;
use crate::config::is_valid_chain_id;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid chain id {0:?}")]
    InvalidKey(String),
}

/// How far along the alerting for a plan has progressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    /// Plan seen but the announcement was not delivered.
    #[default]
    None,
    Notified,
    Reminded,
    /// Target height reached while the plan was still scheduled.
    Executed,
}

impl NotificationState {
    /// Still waiting for the reminder threshold.
    pub fn awaiting_reminder(self) -> bool {
        matches!(self, NotificationState::None | NotificationState::Notified)
    }
}

impl std::fmt::Display for NotificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationState::None => write!(f, "none"),
            NotificationState::Notified => write!(f, "notified"),
            NotificationState::Reminded => write!(f, "reminded"),
            NotificationState::Executed => write!(f, "executed"),
        }
    }
}

/// The plan a chain's alerts were last sent for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub chain_id: String,
    pub name: String,
    pub height: u64,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub state: NotificationState,
    pub detected_at: String,
    pub updated_at: String,
}

impl UpgradeRecord {
    pub fn new(chain_id: &str, plan: &UpgradePlan, state: NotificationState) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            chain_id: chain_id.to_string(),
            name: plan.name.clone(),
            height: plan.height,
            info: plan.info.clone(),
            state,
            detected_at: now.clone(),
            updated_at: now,
        }
    }

    /// Same upgrade as `plan`: identity is name plus height.
    pub fn tracks(&self, plan: &UpgradePlan) -> bool {
        self.name == plan.name && self.height == plan.height
    }

    /// Copy with a new state and a fresh `updated_at`.
    pub fn with_state(&self, state: NotificationState) -> Self {
        Self {
            state,
            updated_at: chrono::Utc::now().to_rfc3339(),
            ..self.clone()
        }
    }
}

/// Durable chain id → [`UpgradeRecord`] map.
pub struct UpgradeStore {
    dir: PathBuf,
    write_seq: AtomicU64,
}

impl UpgradeStore {
    /// Open (creating if needed) the state directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "upgrade store opened");
        Ok(Self {
            dir,
            write_seq: AtomicU64::new(0),
        })
    }

    fn path(&self, chain_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_chain_id(chain_id) {
            return Err(StoreError::InvalidKey(chain_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", chain_id)))
    }

    /// Current record for a chain, if any.
    pub async fn get(&self, chain_id: &str) -> Result<Option<UpgradeRecord>, StoreError> {
        let path = self.path(chain_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the chain's record.
    pub async fn put(&self, chain_id: &str, record: &UpgradeRecord) -> Result<(), StoreError> {
        let path = self.path(chain_id)?;
        let json = serde_json::to_vec_pretty(record)?;

        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{}.json.{}.{}", chain_id, std::process::id(), seq));

        if let Err(e) = write_synced(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            chain = %chain_id,
            upgrade = %record.name,
            height = record.height,
            state = %record.state,
            "stored upgrade record"
        );
        Ok(())
    }

    /// Drop the chain's record. Missing records are fine.
    pub async fn clear(&self, chain_id: &str) -> Result<(), StoreError> {
        let path = self.path(chain_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(chain = %chain_id, "cleared upgrade record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(name: &str, height: u64) -> UpgradePlan {
        UpgradePlan {
            name: name.to_string(),
            height,
            info: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = UpgradeStore::open(dir.path()).await.unwrap();

        assert!(store.get("chain-a").await.unwrap().is_none());

        let record = UpgradeRecord::new("chain-a", &plan("v2", 1000), NotificationState::Notified);
        store.put("chain-a", &record).await.unwrap();
        assert_eq!(store.get("chain-a").await.unwrap(), Some(record.clone()));

        // Keys are independent
        assert!(store.get("chain-b").await.unwrap().is_none());

        let reminded = record.with_state(NotificationState::Reminded);
        store.put("chain-a", &reminded).await.unwrap();
        let loaded = store.get("chain-a").await.unwrap().unwrap();
        assert_eq!(loaded.state, NotificationState::Reminded);
        assert_eq!(loaded.detected_at, record.detected_at);

        store.clear("chain-a").await.unwrap();
        assert!(store.get("chain-a").await.unwrap().is_none());
        // Clearing twice is a no-op
        store.clear("chain-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record =
            UpgradeRecord::new("osmosis-1", &plan("v25", 5_000), NotificationState::Reminded);
        {
            let store = UpgradeStore::open(dir.path()).await.unwrap();
            store.put("osmosis-1", &record).await.unwrap();
        }

        let reopened = UpgradeStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("osmosis-1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UpgradeStore::open(dir.path()).await.unwrap();
        for height in [10, 20, 30] {
            let record =
                UpgradeRecord::new("chain-a", &plan("v2", height), NotificationState::Notified);
            store.put("chain-a", &record).await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chain-a.json".to_string()]);
        assert_eq!(store.get("chain-a").await.unwrap().unwrap().height, 30);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = UpgradeStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("chain-a.json"), b"{ half a rec").unwrap();
        assert!(matches!(store.get("chain-a").await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = UpgradeStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get("../escape").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_legacy_record_defaults_state() {
        let record: UpgradeRecord = serde_json::from_str(
            r#"{"chain_id":"a","name":"v2","height":1000,"detected_at":"x","updated_at":"x"}"#,
        )
        .unwrap();
        assert_eq!(record.state, NotificationState::None);
        assert!(record.state.awaiting_reminder());
    }
}
