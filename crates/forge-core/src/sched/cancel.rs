use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Señal de cancelación compartida por todo un run.
///
/// Se consulta al inicio de cada unidad agendada y cooperativamente dentro
/// de los cuerpos de comando; un comando en vuelo que la observa debe
/// terminar temprano resolviendo `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
