//! Almacenes consumidos por el core: contenido direccionado por hash,
//! log de resultados por comando e índice durable url → id.
//!
//! El core sólo depende de los traits; las implementaciones en memoria y en
//! archivo existen para poder ejecutar y testear el orquestador standalone.

pub mod content;
pub mod index;
pub mod results;
pub mod version_tracker;

pub use content::{ContentStore, FileContentStore, InMemoryContentStore};
pub use index::{FileIndexMap, IndexMap, InMemoryIndexMap};
pub use results::{FileResultStore, InMemoryResultStore, ResultStore};
pub use version_tracker::FileVersionTracker;
