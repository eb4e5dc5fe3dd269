use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use super::micro_thread::{MicroThread, MicroThreadInner, MicroThreadState};

/// Entrada de la cola de listos: ordenada por (prioridad, secuencia).
///
/// La secuencia crece hacia atrás y decrece hacia el frente, de modo que
/// `ScheduleMode::First` reencola antes que todo lo pendiente de la misma
/// prioridad sin perturbar el orden estable del resto.
struct QueueEntry {
    priority: i64,
    seq: i64,
    thread: Arc<MicroThreadInner>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap es max-heap: invertimos para que (prioridad, seq) menor salga primero
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

pub(crate) struct SchedulerInner {
    ready: Mutex<BinaryHeap<QueueEntry>>,
    live: AtomicUsize,
    next_id: AtomicU64,
    front_seq: AtomicI64,
    back_seq: AtomicI64,
}

impl SchedulerInner {
    pub(crate) fn push(&self, thread: Arc<MicroThreadInner>) {
        let seq = if thread.schedule_first() {
            self.front_seq.fetch_sub(1, Ordering::SeqCst) - 1
        } else {
            self.back_seq.fetch_add(1, Ordering::SeqCst)
        };
        let entry = QueueEntry { priority: thread.priority(), seq, thread };
        self.ready.lock().expect("ready queue poisoned").push(entry);
    }

    fn pop(&self) -> Option<Arc<MicroThreadInner>> {
        self.ready.lock().expect("ready queue poisoned").pop().map(|e| e.thread)
    }
}

/// Runner cooperativo: multiplexa microthreads sobre los threads del SO que
/// llamen a `run()`. Reentrante; varios workers pueden drenar a la vez.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { inner: Arc::new(SchedulerInner { ready: Mutex::new(BinaryHeap::new()),
                                                live: AtomicUsize::new(0),
                                                next_id: AtomicU64::new(1),
                                                front_seq: AtomicI64::new(0),
                                                back_seq: AtomicI64::new(1) }) }
    }

    /// Crea un microthread vacío, para arrancar luego con `MicroThread::start`.
    pub fn create(&self) -> MicroThread {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(MicroThreadInner::new(id, Arc::downgrade(&self.inner)));
        MicroThread { inner }
    }

    /// Cantidad de microthreads aún no terminados.
    pub fn live_count(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Drena la cola de listos hasta vaciarla: pop + poll de cada
    /// microthread listo. Un pánico dentro de un cuerpo se captura acá, se
    /// loguea y el microthread termina `Failed` exactamente una vez.
    pub fn run(&self) {
        loop {
            let Some(thread) = self.inner.pop() else {
                break;
            };

            if thread.state().is_over() || !thread.claim_for_poll() {
                continue;
            }

            let Some(mut body) = thread.take_body() else {
                // Nunca arrancado o en poll ajeno: soltar el reclamo
                thread.release_after_poll();
                continue;
            };

            let waker = Waker::from(thread.clone());
            let mut cx = Context::from_waker(&waker);
            let poll = catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));

            match poll {
                Ok(Poll::Ready(())) => {
                    thread.finish(MicroThreadState::Completed);
                    self.inner.live.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(Poll::Pending) => {
                    thread.put_body(body);
                    if thread.release_after_poll() {
                        self.inner.push(thread);
                    }
                }
                Err(panic) => {
                    let detail = panic.downcast_ref::<&str>()
                                      .map(|s| s.to_string())
                                      .or_else(|| panic.downcast_ref::<String>().cloned())
                                      .unwrap_or_else(|| "<non-string panic>".to_string());
                    log::error!(target: "forge", "microthread `{}` panicked: {}", thread.name(), detail);
                    drop(body);
                    thread.finish(MicroThreadState::Failed);
                    self.inner.live.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
