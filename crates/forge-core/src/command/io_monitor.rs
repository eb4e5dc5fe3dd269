use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::model::ObjectUrl;

/// Vigila los accesos de E/S de los comandos en vuelo.
///
/// Cada comando declara sus lecturas al arrancar y registra cada escritura;
/// al terminar, su intervalo de ejecución se contrasta con el de todos los
/// demás comandos del run. Dos accesos en conflicto (write/write o
/// read/write sobre la misma url) con intervalos solapados son un defecto
/// del grafo: el run completo se reporta fallido aunque cada comando haya
/// terminado bien por su cuenta.
#[derive(Default)]
pub struct CommandIOMonitor {
    inner: Mutex<MonitorInner>,
    errors: AtomicUsize,
}

#[derive(Default)]
struct MonitorInner {
    accesses: HashMap<u64, CommandAccess>,
    // Pares ya reportados, para no duplicar el diagnóstico al cerrar el otro lado
    reported: HashSet<(u64, u64)>,
}

struct CommandAccess {
    title: String,
    start: Instant,
    end: Option<Instant>,
    reads: HashSet<ObjectUrl>,
    writes: HashSet<ObjectUrl>,
}

impl CommandAccess {
    fn overlaps(&self, other: &CommandAccess) -> bool {
        let self_before_other_ends = match other.end {
            Some(end) => self.start < end,
            None => true,
        };
        let other_before_self_ends = match self.end {
            Some(end) => other.start < end,
            None => true,
        };
        self_before_other_ends && other_before_self_ends
    }
}

impl CommandIOMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra el comienzo de un comando con sus lecturas declaradas.
    pub fn command_started(&self, execution: u64, title: impl Into<String>, reads: Vec<ObjectUrl>) {
        let access = CommandAccess { title: title.into(),
                                     start: Instant::now(),
                                     end: None,
                                     reads: reads.into_iter().collect(),
                                     writes: HashSet::new() };
        self.inner.lock().expect("io monitor poisoned").accesses.insert(execution, access);
    }

    /// Registra una escritura del comando en vuelo.
    pub fn record_write(&self, execution: u64, url: &ObjectUrl) {
        let mut inner = self.inner.lock().expect("io monitor poisoned");
        if let Some(access) = inner.accesses.get_mut(&execution) {
            access.writes.insert(url.clone());
        }
    }

    /// Cierra el intervalo del comando y lo contrasta con el resto del run.
    pub fn command_finished(&self, execution: u64) {
        let mut inner = self.inner.lock().expect("io monitor poisoned");
        if let Some(access) = inner.accesses.get_mut(&execution) {
            access.end = Some(Instant::now());
        }

        let Some(access) = inner.accesses.remove(&execution) else {
            return;
        };

        let mut found = Vec::new();
        for (&other_id, other) in &inner.accesses {
            let pair = (execution.min(other_id), execution.max(other_id));
            if inner.reported.contains(&pair) || !access.overlaps(other) {
                continue;
            }

            for url in access.writes.intersection(&other.writes) {
                found.push((pair,
                            format!("commands `{}` and `{}` are both writing {} at the same time",
                                    access.title, other.title, url)));
            }
            for url in access.writes.intersection(&other.reads) {
                found.push((pair,
                            format!("command `{}` is writing {} while command `{}` is reading it",
                                    access.title, url, other.title)));
            }
            for url in access.reads.intersection(&other.writes) {
                found.push((pair,
                            format!("command `{}` is writing {} while command `{}` is reading it",
                                    other.title, url, access.title)));
            }
        }

        inner.accesses.insert(execution, access);
        for (pair, message) in found {
            inner.reported.insert(pair);
            log::error!(target: "forge", "{}", message);
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Conflictos detectados en lo que va del run.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_writers_on_same_url_conflict() {
        let monitor = CommandIOMonitor::new();
        let url = ObjectUrl::content("shared");

        monitor.command_started(1, "writer-a", Vec::new());
        monitor.command_started(2, "writer-b", Vec::new());
        monitor.record_write(1, &url);
        monitor.record_write(2, &url);
        monitor.command_finished(1);
        monitor.command_finished(2);

        assert_eq!(monitor.error_count(), 1);
    }

    #[test]
    fn read_write_overlap_conflicts_once() {
        let monitor = CommandIOMonitor::new();
        let url = ObjectUrl::content("asset");

        monitor.command_started(1, "reader", vec![url.clone()]);
        monitor.command_started(2, "writer", Vec::new());
        monitor.record_write(2, &url);
        monitor.command_finished(2);
        monitor.command_finished(1);

        // Un solo diagnóstico aunque ambos lados cierren su intervalo
        assert_eq!(monitor.error_count(), 1);
    }

    #[test]
    fn disjoint_urls_do_not_conflict() {
        let monitor = CommandIOMonitor::new();
        monitor.command_started(1, "a", vec![ObjectUrl::content("x")]);
        monitor.command_started(2, "b", Vec::new());
        monitor.record_write(1, &ObjectUrl::content("out-a"));
        monitor.record_write(2, &ObjectUrl::content("out-b"));
        monitor.command_finished(1);
        monitor.command_finished(2);
        assert_eq!(monitor.error_count(), 0);
    }
}
