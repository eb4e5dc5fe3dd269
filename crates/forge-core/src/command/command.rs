use async_trait::async_trait;

use crate::errors::BuildError;
use crate::hashing::HashSerializer;
use crate::model::{ObjectUrl, RemoteCommandSpec};
use crate::sched::CancellationToken;
use crate::step::ResultStatus;

use super::context::CommandContext;

/// Unidad de trabajo opaca para el orquestador.
///
/// Los comandos son objetos-valor clonables: su identidad a efectos de cache
/// es el hash (tipo + versión + parámetros + contenido de los inputs
/// declarados), nunca la identidad del objeto. Implementaciones concretas
/// (compiladores de texturas, shaders, etc.) viven fuera de este core.
#[async_trait]
pub trait Command: Send + Sync {
    /// Nombre estable del tipo de comando; indexa el `CommandRegistry` y
    /// entra en el hash como identidad de la implementación.
    fn kind(&self) -> &'static str;

    /// Título legible para logs y diagnósticos.
    fn title(&self) -> String;

    /// Versión de la implementación; subirla invalida la cache de todas
    /// sus ejecuciones previas.
    fn version(&self) -> u32 {
        0
    }

    /// Inputs declarados, conocibles sin ejecutar. Su contenido actual se
    /// hashea dentro del hash del comando.
    fn input_files(&self) -> Vec<ObjectUrl> {
        Vec::new()
    }

    /// Ubicación simbólica de la que este comando es productor único, si
    /// declara una. Alimenta las aristas de dependencia por contenido.
    fn output_location(&self) -> Option<ObjectUrl> {
        None
    }

    /// Vuelca los parámetros propios al serializador de hash.
    fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError>;

    /// Cuerpo del comando. Debe sondear el token de cancelación y devolver
    /// `Cancelled` al observarlo; los errores se mapean a `Failed` en el
    /// boundary del step, nunca escapan al scheduler.
    async fn execute(&self,
                     context: &mut dyn CommandContext,
                     token: &CancellationToken)
                     -> Result<ResultStatus, BuildError>;

    /// Fuerza la re-ejecución aunque exista un resultado cacheado válido.
    fn should_force_execution(&self) -> bool {
        false
    }

    /// Pide ejecutarse en un proceso worker externo (sujeto al presupuesto
    /// de procesos paralelos del run).
    fn should_spawn_new_process(&self) -> bool {
        false
    }

    /// Descripción serializable para el canal remoto y para replicar
    /// comandos spawneados desde la cache. Sin spec, el comando no puede
    /// ejecutarse remoto y sus spawns no son replayables.
    fn remote_spec(&self) -> Option<RemoteCommandSpec> {
        None
    }

    /// Hook previo al cuerpo; el step lo invoca siempre.
    fn pre_execute(&self, _context: &mut dyn CommandContext) {}

    /// Hook posterior al cuerpo; el step lo invoca siempre, con el status final.
    fn post_execute(&self, _context: &mut dyn CommandContext, _status: ResultStatus) {}

    /// Copia valor del comando (los spawns y el canal remoto la requieren).
    fn clone_command(&self) -> Box<dyn Command>;
}

impl std::fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command({})", self.title())
    }
}
