use async_trait::async_trait;

use crate::builder::BuilderContext;
use crate::errors::BuildError;
use crate::sched::CancellationToken;
use crate::step::ResultStatus;

use super::command::Command;
use super::context::CommandContext;

/// Canal de ejecución fuera de proceso.
///
/// El core sólo define el seam: una implementación (forge-remote) lanza el
/// proceso worker, sirve el protocolo IPC y fusiona outputs/logs/tags en el
/// contexto local exactamente como si el comando hubiera corrido acá.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self,
                     command: &dyn Command,
                     context: &mut dyn CommandContext,
                     builder: &BuilderContext,
                     token: &CancellationToken)
                     -> Result<ResultStatus, BuildError>;
}
