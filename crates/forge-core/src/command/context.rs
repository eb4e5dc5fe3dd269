use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{ObjectId, ObjectUrl, OutputObject, StepLogger};
use crate::step::ResultStatus;
use crate::store::ContentStore;

use super::command::Command;

/// Contexto que ve un comando mientras ejecuta.
///
/// Resuelve contenido a través de la vista transaccional del run (outputs
/// propios → grupos de hermanos en vuelo → índice durable) y acumula el
/// `CommandResultEntry` que irá a la cache si el comando termina bien.
#[async_trait]
pub trait CommandContext: Send {
    fn logger(&self) -> &StepLogger;

    /// Registra un output producido (url → id). Visible de inmediato para
    /// las lecturas posteriores del propio comando.
    fn register_output(&mut self, url: ObjectUrl, id: ObjectId);

    /// Asocia un tag a un output ya registrado.
    fn add_tag(&mut self, url: &ObjectUrl, tag: &str);

    /// Resuelve una url a su id de contenido vía la vista en capas.
    fn resolve_content_id(&self, url: &ObjectUrl) -> Option<ObjectId>;

    /// Hash del contenido actual de una url (archivo o referencia de
    /// contenido); `ObjectId::EMPTY` si no puede resolverse.
    fn compute_input_hash(&self, url: &ObjectUrl) -> ObjectId;

    fn content_store(&self) -> Arc<dyn ContentStore>;

    /// Outputs registrados hasta el momento por esta ejecución.
    fn current_outputs(&self) -> Vec<(ObjectUrl, ObjectId)>;

    /// Grupos de outputs visibles para esta ejecución: lo ya fusionado por
    /// cada aggregate ancestro, del más cercano al más lejano.
    fn output_object_groups(&self) -> Vec<Vec<OutputObject>>;

    /// Agenda un sub-comando en el scheduler del master y espera su
    /// finalización. Queda registrado en el result entry para replay.
    async fn schedule_and_await_command(&mut self, command: Box<dyn Command>) -> ResultStatus;
}
