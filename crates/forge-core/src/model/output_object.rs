use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ObjectId, ObjectUrl};

/// Objeto producido por un comando, tal como lo ve el aggregate step dueño del merge.
///
/// `counter` es la época de merge en la que se observó por última vez; los
/// chequeos de conflicto sólo aplican dentro de la misma época. `producer`
/// identifica al step productor (execution id) para distinguir "otro
/// comando" de "yo mismo". Serializable: los grupos de outputs viajan por el
/// canal remoto hacia los workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputObject {
    pub url: ObjectUrl,
    pub object_id: ObjectId,
    pub tags: BTreeSet<String>,
    pub producer: u64,
    /// Título del comando productor, sólo con fines de diagnóstico.
    pub command_title: String,
    pub counter: u32,
}

impl OutputObject {
    pub fn new(url: ObjectUrl,
               object_id: ObjectId,
               producer: u64,
               command_title: impl Into<String>,
               counter: u32)
               -> Self {
        Self { url,
               object_id,
               tags: BTreeSet::new(),
               producer,
               command_title: command_title.into(),
               counter }
    }
}

/// Lectura declarada por un comando, sellada con la época en que se registró.
#[derive(Debug, Clone)]
pub struct InputObject {
    pub producer: u64,
    pub command_title: String,
    pub counter: u32,
}
