use serde::{Deserialize, Serialize};

use forge_core::model::{LogMessage, ObjectId, ObjectUrl, OutputObject, RemoteCommandSpec};
use forge_core::step::ResultStatus;

/// Petición del worker hacia el master. El protocolo es half-duplex y lo
/// inicia siempre el worker: una request por línea, una reply por línea.
#[derive(Debug, Serialize, Deserialize)]
pub enum SlaveRequest {
    /// Primera request de toda sesión: pide el comando a ejecutar.
    FetchCommand,
    /// Resuelve una url a su id de contenido en la vista del master.
    ResolveContent { url: ObjectUrl },
    /// Trae los bytes de un objeto del content store del master.
    FetchObject { id: ObjectId },
    /// Sube bytes al content store del master.
    StoreObject { bytes: Vec<u8> },
    /// Registra un output (url → id) en el contexto del comando.
    RegisterOutput { url: ObjectUrl, id: ObjectId },
    /// Asocia un tag a un output ya registrado.
    AddTag { url: ObjectUrl, tag: String },
    /// Reenvía un mensaje de log capturado en el worker.
    Log { message: LogMessage },
    /// Pide los grupos de outputs visibles para el comando en el master.
    GetOutputObjects,
    /// Agenda un sub-comando en el scheduler del master y espera su status.
    SpawnCommand { spec: RemoteCommandSpec },
    /// Sondea el token de cancelación del run.
    CheckCancellation,
    /// Última request: status final del comando. El worker termina tras el Ack.
    Complete { status: ResultStatus },
}

/// Respuesta del master; la variante se corresponde con la request.
#[derive(Debug, Serialize, Deserialize)]
pub enum MasterReply {
    Command { spec: RemoteCommandSpec },
    ContentId { id: Option<ObjectId> },
    Object { bytes: Option<Vec<u8>> },
    Stored { id: ObjectId },
    OutputObjects { groups: Vec<Vec<OutputObject>> },
    SpawnStatus { status: ResultStatus },
    Cancellation { cancelled: bool },
    Ack,
}
