//! Orquestación de un run completo: contexto compartido, contadores y el
//! punto de entrada `Builder`.

pub mod context;
pub mod core;
pub mod counter;
pub mod execute_context;

pub use context::{BuilderContext, ProcessBudget};
pub use core::{BuildResultCode, Builder, Mode};
pub use counter::StepCounter;
pub use execute_context::{ExecuteContext, LocalCommandContext};
