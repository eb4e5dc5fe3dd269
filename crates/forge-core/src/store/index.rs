use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::BuildError;
use crate::model::ObjectId;

/// Índice durable ruta → id de contenido.
///
/// Se vuelca una sola vez al final del build (`Builder::write_index_file`);
/// durante la ejecución los outputs aún no persistidos se resuelven vía
/// `BuildTransaction`.
pub trait IndexMap: Send + Sync {
    fn get(&self, path: &str) -> Option<ObjectId>;
    fn set(&self, path: &str, id: ObjectId);
    fn remove(&self, path: &str);
    fn entries(&self) -> Vec<(String, ObjectId)>;
    /// Persiste el estado actual; no-op para índices efímeros.
    fn save(&self) -> Result<(), BuildError>;
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemoryIndexMap {
    inner: Mutex<BTreeMap<String, ObjectId>>,
}

impl InMemoryIndexMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexMap for InMemoryIndexMap {
    fn get(&self, path: &str) -> Option<ObjectId> {
        self.inner.lock().expect("index poisoned").get(path).copied()
    }

    fn set(&self, path: &str, id: ObjectId) {
        self.inner.lock().expect("index poisoned").insert(path.to_string(), id);
    }

    fn remove(&self, path: &str) {
        self.inner.lock().expect("index poisoned").remove(path);
    }

    fn entries(&self) -> Vec<(String, ObjectId)> {
        self.inner.lock().expect("index poisoned").iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    fn save(&self) -> Result<(), BuildError> {
        Ok(())
    }

    fn clear(&self) {
        self.inner.lock().expect("index poisoned").clear();
    }
}

/// Índice persistido como un único archivo JSON.
pub struct FileIndexMap {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, ObjectId>>,
}

impl FileIndexMap {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => BTreeMap::new(),
        };
        Ok(Self { path, inner: Mutex::new(inner) })
    }
}

impl IndexMap for FileIndexMap {
    fn get(&self, path: &str) -> Option<ObjectId> {
        self.inner.lock().expect("index poisoned").get(path).copied()
    }

    fn set(&self, path: &str, id: ObjectId) {
        self.inner.lock().expect("index poisoned").insert(path.to_string(), id);
    }

    fn remove(&self, path: &str) {
        self.inner.lock().expect("index poisoned").remove(path);
    }

    fn entries(&self) -> Vec<(String, ObjectId)> {
        self.inner.lock().expect("index poisoned").iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    fn save(&self) -> Result<(), BuildError> {
        let snapshot = self.inner.lock().expect("index poisoned").clone();
        let json = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn clear(&self) {
        self.inner.lock().expect("index poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_index_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = FileIndexMap::open(&path).unwrap();
        index.set("textures/wood", ObjectId::new(b"wood"));
        index.save().unwrap();

        let reopened = FileIndexMap::open(&path).unwrap();
        assert_eq!(reopened.get("textures/wood"), Some(ObjectId::new(b"wood")));
        assert_eq!(reopened.entries().len(), 1);
    }
}
