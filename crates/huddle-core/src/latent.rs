use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One pre-created room's durable record (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatentRoomRecord {
    pub room_id: String,
    #[serde(default)]
    pub password: Option<String>,
    pub creator_token: String,
    pub created_at: DateTime<Utc>,
    pub max_participants: usize,
}

/// On-disk persistence for latent (pre-created) rooms.
///
/// Loads once at startup and rewrites the whole file on every mutation,
/// backed by JSON per spec.md §6.
pub struct LatentStore {
    path: PathBuf,
}

impl LatentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted set, discarding any entry older than
    /// `max_age` (spec.md §6: "On startup, entries older than
    /// `latentRoomMaxAge` are discarded").
    pub async fn load(&self, max_age: Duration) -> Vec<LatentRoomRecord> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        let records: Vec<LatentRoomRecord> = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "latent room store is corrupt, ignoring");
                return Vec::new();
            }
        };
        let cutoff = Utc::now() - max_age;
        records.into_iter().filter(|r| r.created_at > cutoff).collect()
    }

    /// Rewrite the persisted set. Takes an owned snapshot so the caller
    /// can release the registry lock before this (potentially slow)
    /// disk write runs, per spec.md §5's "must not hold a registry lock
    /// across the disk write."
    pub async fn persist(&self, records: Vec<LatentRoomRecord>) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(error = %e, "failed to create latent room store directory");
                return;
            }
        }
        let bytes = match serde_json::to_vec_pretty(&records) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize latent room store");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, bytes).await {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist latent room store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(room_id: &str, age: Duration) -> LatentRoomRecord {
        LatentRoomRecord {
            room_id: room_id.to_string(),
            password: None,
            creator_token: "tok".to_string(),
            created_at: Utc::now() - age,
            max_participants: 8,
        }
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LatentStore::new(dir.path().join("rooms.json"));
        let records = vec![sample("ABC123", Duration::minutes(1))];
        store.persist(records.clone()).await;

        let loaded = store.load(Duration::hours(24)).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].room_id, "ABC123");
    }

    #[tokio::test]
    async fn load_discards_entries_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = LatentStore::new(dir.path().join("rooms.json"));
        let records = vec![
            sample("OLD001", Duration::hours(48)),
            sample("NEW001", Duration::minutes(5)),
        ];
        store.persist(records).await;

        let loaded = store.load(Duration::hours(24)).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].room_id, "NEW001");
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LatentStore::new(dir.path().join("does-not-exist.json"));
        assert!(store.load(Duration::hours(24)).await.is_empty());
    }
}
