use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;

use crate::hashing;
use crate::model::ObjectId;

/// Cache de hashes de archivo por (mtime, tamaño): un archivo sin cambios
/// se hashea una sola vez por run aunque lo declaren muchos comandos.
#[derive(Default)]
pub struct FileVersionTracker {
    inner: DashMap<PathBuf, (SystemTime, u64, ObjectId)>,
}

impl FileVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash del contenido actual del archivo, memoizado mientras
    /// (mtime, len) no cambien.
    pub fn compute_file_hash(&self, path: &Path) -> std::io::Result<ObjectId> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata.modified()?;
        let len = metadata.len();

        if let Some(cached) = self.inner.get(path) {
            let (cached_mtime, cached_len, id) = *cached;
            if cached_mtime == mtime && cached_len == len {
                return Ok(id);
            }
        }

        let id = hashing::hash_file(path)?;
        self.inner.insert(path.to_path_buf(), (mtime, len, id));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rehashes_only_when_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.txt");
        std::fs::write(&file, "v1").unwrap();

        let tracker = FileVersionTracker::new();
        let first = tracker.compute_file_hash(&file).unwrap();
        assert_eq!(first, tracker.compute_file_hash(&file).unwrap());

        std::fs::write(&file, "v2 with different length").unwrap();
        let second = tracker.compute_file_hash(&file).unwrap();
        assert_ne!(first, second);
    }
}
