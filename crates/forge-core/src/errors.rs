//! Errores específicos del core.

use thiserror::Error;

use crate::model::ObjectUrl;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("step `{0}` was scheduled by an instigator different from its parent")] InstigatorMismatch(String),
    #[error("step `{0}` was already attached to a parent")] ParentAlreadySet(String),
    #[error("command {writer} is writing {url} while command {reader} is reading it")]
    ReadWriteConflict { writer: String, reader: String, url: ObjectUrl },
    #[error("commands {first} and {second} are both writing {url} at the same time")]
    DivergentWrite { first: String, second: String, url: ObjectUrl },
    #[error("step `{0}` completed with status NotProcessed")] NotProcessed(String),
    #[error("cannot mutate list step `{0}` after it started")] ListSealed(String),
    #[error("producer of `{0}` not found in the current graph")] DanglingDependency(ObjectUrl),
    #[error("no command registered under kind `{0}`")] UnknownCommandKind(String),
    #[error("command `{0}` opted into process spawning but exposes no remote spec")] MissingRemoteSpec(String),
    #[error("builder is already running")] AlreadyRunning,
    #[error("io error: {0}")] Io(#[from] std::io::Error),
    #[error("serialization error: {0}")] Serde(#[from] serde_json::Error),
    #[error("internal: {0}")] Internal(String),
}
