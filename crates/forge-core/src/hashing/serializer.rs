//! Serializador incremental sobre el que los comandos escriben su contribución al hash.

use blake3::Hasher;
use serde::Serialize;

use crate::errors::BuildError;
use crate::model::{ObjectId, ObjectUrl};

/// Acumulador de bytes para el hash de un comando.
///
/// Los comandos no eligen el algoritmo: sólo escriben sus parámetros aquí.
/// El orden de escritura forma parte de la identidad del comando.
pub struct HashSerializer {
    hasher: Hasher,
}

impl HashSerializer {
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        // Prefijo de longitud para evitar colisiones por concatenación
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub fn write_object_id(&mut self, id: &ObjectId) {
        self.hasher.update(id.as_bytes());
    }

    pub fn write_url(&mut self, url: &ObjectUrl) {
        self.write_str(&url.to_string());
    }

    /// Serializa cualquier valor `Serialize` vía JSON canónico.
    pub fn write_serializable<T: Serialize>(&mut self, value: &T) -> Result<(), BuildError> {
        let json = serde_json::to_value(value)?;
        self.write_object_id(&super::hash_value(&json));
        Ok(())
    }

    pub fn finish(self) -> ObjectId {
        ObjectId::from_bytes(*self.hasher.finalize().as_bytes())
    }
}

impl Default for HashSerializer {
    fn default() -> Self {
        Self::new()
    }
}
