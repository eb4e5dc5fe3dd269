use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{LogMessage, ObjectId, ObjectUrl};

/// Descripción serializable de un comando, suficiente para reconstruirlo
/// en otro proceso (canal remoto) o al replicar comandos spawneados desde
/// la cache. `kind` indexa el `CommandRegistry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommandSpec {
    pub kind: String,
    pub params: serde_json::Value,
}

impl RemoteCommandSpec {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self { kind: kind.into(), params }
    }
}

/// Registro durable de la cache de comandos, indexado por hash de comando.
///
/// Append-only: una vez escrito en el log por-hash nunca se muta. Contiene
/// todo lo necesario para que un cache hit sea observacionalmente idéntico
/// a una ejecución real.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultEntry {
    pub command_title: String,
    /// Hash de cada dependencia de entrada al momento del éxito.
    pub input_dependency_versions: BTreeMap<ObjectUrl, ObjectId>,
    /// Mapa url → id de contenido producido.
    pub output_objects: BTreeMap<ObjectUrl, ObjectId>,
    /// Tags asignados a los outputs.
    pub tags: BTreeMap<ObjectUrl, BTreeSet<String>>,
    /// Mensajes capturados, re-emitidos en replay.
    pub log_messages: Vec<LogMessage>,
    /// Comandos spawneados durante la ejecución, re-agendados en replay.
    pub spawned_commands: Vec<RemoteCommandSpec>,
}

impl CommandResultEntry {
    pub fn new(command_title: impl Into<String>) -> Self {
        Self { command_title: command_title.into(),
               input_dependency_versions: BTreeMap::new(),
               output_objects: BTreeMap::new(),
               tags: BTreeMap::new(),
               log_messages: Vec::new(),
               spawned_commands: Vec::new() }
    }
}
