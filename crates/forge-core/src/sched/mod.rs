//! Scheduler cooperativo de microthreads.
//!
//! Muchas tareas livianas multiplexadas sobre un pool fijo de threads del
//! SO. Ningún punto de suspensión es implícito: sólo `await` sobre otra
//! tarea, sobre un delay cooperativo o sobre una señal externa. La cola de
//! listos está ordenada por prioridad (menor valor corre primero) y cada
//! microthread elige si sus continuaciones se reencolan al frente o al
//! fondo (`ScheduleMode`).

pub mod cancel;
pub mod futures;
pub mod micro_thread;
pub mod scheduler;
pub mod signal;

pub use cancel::CancellationToken;
pub use futures::{sleep, yield_now};
pub use micro_thread::{MicroThread, MicroThreadState, ScheduleMode};
pub use scheduler::Scheduler;
pub use signal::WakeSignal;
