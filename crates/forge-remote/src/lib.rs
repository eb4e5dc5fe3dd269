//! Canal de ejecución fuera de proceso.
//!
//! Protocolo JSON-lines sobre stdin/stdout del proceso worker, iniciado por
//! el worker: cada línea que escribe es un `SlaveRequest` y el master
//! contesta con un `MasterReply` por línea. El worker no tiene stores
//! propios: todo acceso a contenido, outputs, tags, logs y spawns viaja por
//! el canal y se aplica sobre el contexto del comando en el master, de modo
//! que el resultado es indistinguible de una ejecución local.

pub mod master;
pub mod messages;
pub mod slave;

pub use master::RemoteCommandHost;
pub use messages::{MasterReply, SlaveRequest};
pub use slave::{run_slave, serve};
