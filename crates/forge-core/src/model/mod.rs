//! Modelo de datos del core: ids de contenido, urls de objetos y registros de resultado.

pub mod log;
pub mod object_id;
pub mod object_url;
pub mod output_object;
pub mod result_entry;

pub use log::{LogLevel, LogMessage, StepLogger};
pub use object_id::ObjectId;
pub use object_url::{ObjectUrl, UrlType};
pub use output_object::{InputObject, OutputObject};
pub use result_entry::{CommandResultEntry, RemoteCommandSpec};
