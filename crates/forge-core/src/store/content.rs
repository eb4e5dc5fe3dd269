use std::path::PathBuf;

use dashmap::DashMap;

use crate::errors::BuildError;
use crate::model::ObjectId;

/// Store de contenido direccionado por hash: id ↔ bytes inmutables.
pub trait ContentStore: Send + Sync {
    /// Inserta los bytes y devuelve su id (no-op si ya existen).
    fn put(&self, bytes: &[u8]) -> Result<ObjectId, BuildError>;
    fn get(&self, id: &ObjectId) -> Option<Vec<u8>>;
    fn contains(&self, id: &ObjectId) -> bool;
    fn delete(&self, id: &ObjectId) -> Result<(), BuildError>;
    /// Enumera los ids presentes (usado al purgar una base con versión vieja).
    fn enumerate(&self) -> Vec<ObjectId>;
}

/// Implementación en memoria sobre `DashMap`.
#[derive(Default)]
pub struct InMemoryContentStore {
    inner: DashMap<ObjectId, Vec<u8>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for InMemoryContentStore {
    fn put(&self, bytes: &[u8]) -> Result<ObjectId, BuildError> {
        let id = ObjectId::new(bytes);
        self.inner.entry(id).or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Option<Vec<u8>> {
        self.inner.get(id).map(|v| v.clone())
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.inner.contains_key(id)
    }

    fn delete(&self, id: &ObjectId) -> Result<(), BuildError> {
        self.inner.remove(id);
        Ok(())
    }

    fn enumerate(&self) -> Vec<ObjectId> {
        self.inner.iter().map(|e| *e.key()).collect()
    }
}

/// Implementación en archivo: un objeto por id hex bajo `root/objects`.
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("objects"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join("objects").join(id.to_hex())
    }
}

impl ContentStore for FileContentStore {
    fn put(&self, bytes: &[u8]) -> Result<ObjectId, BuildError> {
        let id = ObjectId::new(bytes);
        let path = self.object_path(&id);
        if !path.exists() {
            // Escritura a temp + rename para no exponer objetos a medias
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Option<Vec<u8>> {
        std::fs::read(self.object_path(id)).ok()
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).exists()
    }

    fn delete(&self, id: &ObjectId) -> Result<(), BuildError> {
        let path = self.object_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn enumerate(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.root.join("objects")) {
            for entry in entries.flatten() {
                if let Some(id) = entry.file_name().to_str().and_then(ObjectId::from_hex) {
                    out.push(id);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_put_is_content_addressed() {
        let store = InMemoryContentStore::new();
        let a = store.put(b"payload").unwrap();
        let b = store.put(b"payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(&a).unwrap(), b"payload");
        assert_eq!(store.enumerate().len(), 1);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileContentStore::new(dir.path()).unwrap();
        let id = store.put(b"on disk").unwrap();
        assert!(store.contains(&id));
        assert_eq!(store.get(&id).unwrap(), b"on disk");
        store.delete(&id).unwrap();
        assert!(!store.contains(&id));
    }
}
