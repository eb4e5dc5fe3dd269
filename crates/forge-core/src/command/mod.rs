//! Contrato de comando, contexto de ejecución y protocolo de cache.

pub mod command;
pub mod context;
pub mod hash;
pub mod io_monitor;
pub mod registry;
pub mod remote;

pub use command::Command;
pub use context::CommandContext;
pub use hash::compute_command_hash;
pub use io_monitor::CommandIOMonitor;
pub use registry::CommandRegistry;
pub use remote::RemoteExecutor;
