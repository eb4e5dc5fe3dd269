//! Grafo de build steps: nodos, agregación de outputs y ejecución por tipo.

pub mod aggregate;
pub mod build_step;
pub mod command_step;
pub mod dynamic;
pub mod list;
pub mod status;

pub use aggregate::AggregateState;
pub use build_step::{BuildStep, StepKind};
pub use dynamic::DynamicStepQueue;
pub use status::ResultStatus;
