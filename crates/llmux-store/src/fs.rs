use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use llmux_common::sanitize_file_name;
use llmux_provider_core::{CredentialId, CredentialRecord};

use crate::{ChangeEvent, CredentialStore, StoreError, StoreResult};

/// One JSON file per credential under `auth-dir`. Writes go to a temp file in
/// the same directory followed by a rename, so a crash never leaves a
/// half-written record.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes writers; readers go straight to the filesystem.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            changes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_file_name(id)))
    }

    async fn read_record(path: &Path) -> StoreResult<CredentialRecord> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn save(&self, record: CredentialRecord) -> StoreResult<CredentialId> {
        let id = record.id.clone();
        let path = self.path_for(&id);
        let bytes = serde_json::to_vec_pretty(&record)?;

        let _guard = self.write_lock.lock().await;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        drop(_guard);

        let _ = self.changes.send(ChangeEvent::Saved(record));
        Ok(id)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        drop(_guard);
        let _ = self.changes.send(ChangeEvent::Removed(id.to_string()));
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<CredentialRecord> {
        let path = self.path_for(id);
        match Self::read_record(&path).await {
            Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            other => other,
        }
    }

    async fn list(&self) -> StoreResult<Vec<CredentialRecord>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // Unreadable files are skipped, not fatal: the directory may hold
            // records written by a newer version.
            if let Ok(record) = Self::read_record(&path).await {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::{CredentialPayload, ProviderFamily};

    fn record(id: &str) -> CredentialRecord {
        CredentialRecord::new(
            id,
            ProviderFamily::GeminiCli,
            CredentialPayload::OAuth {
                access_token: "tok".to_string(),
                refresh_token: "ref".to_string(),
                expires_at: 123,
            },
        )
    }

    #[tokio::test]
    async fn round_trips_records_through_disk() {
        let dir = std::env::temp_dir().join(format!("llmux-store-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let store = FileStore::open(&dir).await.unwrap();

        store.save(record("user@example.com")).await.unwrap();
        store.save(record("acct/2")).await.unwrap();

        let listed = store.list().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["acct/2", "user@example.com"]);

        // The slash is sanitized in the filename but not in the record id.
        assert!(dir.join("acct_2.json").exists());

        let fetched = store.get("acct/2").await.unwrap();
        assert_eq!(fetched.family, ProviderFamily::GeminiCli);

        store.delete("acct/2").await.unwrap();
        assert!(matches!(
            store.get("acct/2").await,
            Err(StoreError::NotFound(_))
        ));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn no_temp_files_survive_save() {
        let dir = std::env::temp_dir().join(format!("llmux-store-tmp-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let store = FileStore::open(&dir).await.unwrap();
        store.save(record("a")).await.unwrap();

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["a.json"]);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
