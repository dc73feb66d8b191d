//! Flat-file progress backend: one JSON document per player.
//!
//! Layout: `<dir>/<player-uuid>.json`. Writes go to a temp file in the same
//! directory and are renamed into place, so a crash mid-write leaves either
//! the old or the new document, never a truncated one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ProgressBackend;
use crate::progress::{PlayerKey, PlayerProgress};
use crate::{Error, Result};

/// On-disk document format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ProgressDocument {
    format: u32,
    player: PlayerKey,
    progress: PlayerProgress,
}

/// JSON flat-file backend.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Open (creating if needed) the document directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Document directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, player: PlayerKey) -> PathBuf {
        self.dir.join(format!("{player}.json"))
    }
}

impl ProgressBackend for JsonFileBackend {
    async fn load_progress(&self, player: PlayerKey) -> Result<Option<PlayerProgress>> {
        let path = self.path_for(player);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc: ProgressDocument = serde_json::from_slice(&bytes)?;
        if doc.format != FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "{}: unsupported document format {}",
                path.display(),
                doc.format
            )));
        }
        if doc.player != player {
            return Err(Error::Storage(format!(
                "{}: document belongs to player {}",
                path.display(),
                doc.player
            )));
        }
        Ok(Some(doc.progress))
    }

    async fn save_progress(&self, player: PlayerKey, progress: &PlayerProgress) -> Result<()> {
        let doc = ProgressDocument {
            format: FORMAT_VERSION,
            player,
            progress: progress.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let path = self.path_for(player);
        // Unique per write so two writers never share a temp file
        let tmp = self
            .dir
            .join(format!(".{player}.{}.json.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(player = %player, entries = progress.len(), "Wrote progress document");
        Ok(())
    }

    async fn delete_progress(&self, player: PlayerKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(player)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::now_millis;
    use crate::registry::EntryKey;

    #[tokio::test]
    async fn test_roundtrip_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path().join("players")).unwrap();
        let player = PlayerKey::new_random();

        let mut progress = PlayerProgress::new();
        let key = EntryKey::parse("notes:a").unwrap();
        progress.insert(key.clone(), now_millis());
        progress.mark_replay(&key, now_millis());

        backend.save_progress(player, &progress).await.unwrap();
        let loaded = backend.load_progress(player).await.unwrap().unwrap();
        assert_eq!(loaded, progress);
        assert!(backend.dir().join(format!("{player}.json")).exists());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path()).unwrap();
        let player = PlayerKey::new_random();
        std::fs::write(dir.path().join(format!("{player}.json")), b"{ not json").unwrap();

        let err = backend.load_progress(player).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_document_for_other_player_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path()).unwrap();
        let owner = PlayerKey::new_random();
        let other = PlayerKey::new_random();
        backend.save_progress(owner, &PlayerProgress::new()).await.unwrap();
        std::fs::rename(
            dir.path().join(format!("{owner}.json")),
            dir.path().join(format!("{other}.json")),
        )
        .unwrap();

        assert!(matches!(
            backend.load_progress(other).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path()).unwrap();
        backend.delete_progress(PlayerKey::new_random()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_use_separate_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = std::sync::Arc::new(JsonFileBackend::open(dir.path()).unwrap());
        let player = PlayerKey::new_random();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let backend = std::sync::Arc::clone(&backend);
                tokio::spawn(async move {
                    let mut progress = PlayerProgress::new();
                    progress.insert(EntryKey::new("notes", format!("p{i}")).unwrap(), now_millis());
                    backend.save_progress(player, &progress).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let loaded = backend.load_progress(player).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
