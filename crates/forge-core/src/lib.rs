//! Núcleo del orquestador incremental de builds.
//!
//! Modelo: un grafo de build steps (listas, comandos, barreras y steps
//! dinámicos) se ejecuta sobre un scheduler cooperativo de microthreads.
//! Cada comando tiene una identidad content-addressed (tipo + versión +
//! parámetros + contenido de inputs) que indexa una cache de resultados:
//! si nada cambió, el comando no corre y sus efectos observables (outputs,
//! logs, spawns) se reproducen desde la cache. Comandos idénticos
//! concurrentes colapsan en una sola ejecución, y un monitor de E/S detecta
//! accesos en conflicto entre comandos que corren a la vez.

pub mod builder;
pub mod command;
pub mod constants;
pub mod errors;
pub mod hashing;
pub mod model;
pub mod sched;
pub mod step;
pub mod store;
pub mod transaction;

pub use builder::{BuildResultCode, Builder, Mode};
pub use command::{Command, CommandContext, CommandRegistry, RemoteExecutor};
pub use errors::BuildError;
pub use hashing::HashSerializer;
pub use model::{ObjectId, ObjectUrl, RemoteCommandSpec, UrlType};
pub use sched::CancellationToken;
pub use step::{BuildStep, DynamicStepQueue, ResultStatus};
