use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::BuildError;
use crate::model::{CommandResultEntry, ObjectId};

/// Log de resultados append-only por hash de comando.
pub trait ResultStore: Send + Sync {
    /// Carga (lazy) todas las entradas registradas para el hash.
    fn load(&self, hash: &ObjectId) -> Vec<CommandResultEntry>;
    /// Agrega una entrada al final del log del hash.
    fn append(&self, hash: &ObjectId, entry: &CommandResultEntry) -> Result<(), BuildError>;
    /// Elimina el log completo del hash (modo clean).
    fn delete(&self, hash: &ObjectId) -> Result<(), BuildError>;
}

#[derive(Default)]
pub struct InMemoryResultStore {
    inner: Mutex<HashMap<ObjectId, Vec<CommandResultEntry>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn load(&self, hash: &ObjectId) -> Vec<CommandResultEntry> {
        self.inner.lock().expect("result store poisoned").get(hash).cloned().unwrap_or_default()
    }

    fn append(&self, hash: &ObjectId, entry: &CommandResultEntry) -> Result<(), BuildError> {
        self.inner
            .lock()
            .expect("result store poisoned")
            .entry(*hash)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn delete(&self, hash: &ObjectId) -> Result<(), BuildError> {
        self.inner.lock().expect("result store poisoned").remove(hash);
        Ok(())
    }
}

/// Log por hash como archivo JSON-lines bajo `root/results`.
pub struct FileResultStore {
    root: PathBuf,
}

impl FileResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("results"))?;
        Ok(Self { root })
    }

    fn log_path(&self, hash: &ObjectId) -> PathBuf {
        self.root.join("results").join(hash.to_hex())
    }
}

impl ResultStore for FileResultStore {
    fn load(&self, hash: &ObjectId) -> Vec<CommandResultEntry> {
        let Ok(raw) = std::fs::read_to_string(self.log_path(hash)) else {
            return Vec::new();
        };
        // Una línea corrupta invalida sólo esa entrada, no el log entero
        raw.lines()
           .filter(|l| !l.trim().is_empty())
           .filter_map(|l| serde_json::from_str(l).ok())
           .collect()
    }

    fn append(&self, hash: &ObjectId, entry: &CommandResultEntry) -> Result<(), BuildError> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(self.log_path(hash))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn delete(&self, hash: &ObjectId) -> Result<(), BuildError> {
        let path = self.log_path(hash);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_log_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path()).unwrap();
        let hash = ObjectId::new(b"cmd");
        assert!(store.load(&hash).is_empty());

        store.append(&hash, &CommandResultEntry::new("first")).unwrap();
        store.append(&hash, &CommandResultEntry::new("second")).unwrap();
        let entries = store.load(&hash);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command_title, "first");
        assert_eq!(entries[1].command_title, "second");

        store.delete(&hash).unwrap();
        assert!(store.load(&hash).is_empty());
    }
}
