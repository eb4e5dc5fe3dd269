use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::command::{CommandRegistry, RemoteExecutor};

/// Configuración compartida de un run: registro de comandos, canal remoto
/// opcional y presupuesto de procesos worker.
pub struct BuilderContext {
    registry: Arc<CommandRegistry>,
    remote: Option<Arc<dyn RemoteExecutor>>,
    process_budget: ProcessBudget,
}

impl BuilderContext {
    pub fn new(registry: Arc<CommandRegistry>,
               remote: Option<Arc<dyn RemoteExecutor>>,
               max_processes: usize)
               -> Self {
        Self { registry, remote, process_budget: ProcessBudget::new(max_processes) }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteExecutor>> {
        self.remote.as_ref()
    }

    pub fn process_budget(&self) -> &ProcessBudget {
        &self.process_budget
    }
}

/// Cupo de procesos worker simultáneos del run.
pub struct ProcessBudget {
    max: usize,
    used: AtomicUsize,
}

impl ProcessBudget {
    pub fn new(max: usize) -> Self {
        Self { max: max.max(1), used: AtomicUsize::new(0) }
    }

    /// Toma un cupo si hay; falso si el presupuesto está agotado.
    pub fn try_acquire(&self) -> bool {
        loop {
            let current = self.used.load(Ordering::SeqCst);
            if current >= self.max {
                return false;
            }
            if self.used
                   .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                   .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release(&self) {
        self.used.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_use(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_bounded() {
        let budget = ProcessBudget::new(2);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        budget.release();
        assert!(budget.try_acquire());
        assert_eq!(budget.in_use(), 2);
    }

    #[test]
    fn zero_budget_still_allows_one_process() {
        let budget = ProcessBudget::new(0);
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
    }
}
