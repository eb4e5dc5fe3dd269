use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};

use super::scheduler::SchedulerInner;

/// Dónde se reencolan las continuaciones de un microthread.
///
/// `First` agenda lo antes posible: los aggregate steps observan la
/// finalización de sus hijos sin esperar una pasada completa en anchura,
/// lo que acota el crecimiento de memoria y mejora la localidad del merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    First,
    Last,
}

/// Estado de un microthread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroThreadState {
    NotStarted,
    Running,
    Completed,
    /// El cuerpo entró en pánico; el drain loop lo capturó y registró.
    Failed,
}

impl MicroThreadState {
    pub fn is_over(self) -> bool {
        matches!(self, MicroThreadState::Completed | MicroThreadState::Failed)
    }
}

// Flags de encolado (protocolo wake/poll sin doble ejecución)
const IDLE: u8 = 0;
const QUEUED: u8 = 1;
const POLLING: u8 = 2;
const NOTIFIED: u8 = 3;

const MODE_FIRST: u8 = 0;
const MODE_LAST: u8 = 1;

type BoxedBody = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct MicroThreadInner {
    pub(crate) id: u64,
    name: Mutex<String>,
    priority: AtomicI64,
    schedule_mode: AtomicU8,
    queue_flag: AtomicU8,
    body: Mutex<Option<BoxedBody>>,
    state: Mutex<MicroThreadState>,
    waiters: Mutex<Vec<Waker>>,
    scheduler: Weak<SchedulerInner>,
}

impl MicroThreadInner {
    pub(crate) fn new(id: u64, scheduler: Weak<SchedulerInner>) -> Self {
        Self { id,
               name: Mutex::new(String::new()),
               priority: AtomicI64::new(0),
               schedule_mode: AtomicU8::new(MODE_FIRST),
               queue_flag: AtomicU8::new(IDLE),
               body: Mutex::new(None),
               state: Mutex::new(MicroThreadState::NotStarted),
               waiters: Mutex::new(Vec::new()),
               scheduler }
    }

    pub(crate) fn priority(&self) -> i64 {
        self.priority.load(Ordering::SeqCst)
    }

    pub(crate) fn schedule_first(&self) -> bool {
        self.schedule_mode.load(Ordering::SeqCst) == MODE_FIRST
    }

    /// Encola este microthread respetando el protocolo de flags.
    pub(crate) fn enqueue(self: &Arc<Self>) {
        loop {
            let current = self.queue_flag.load(Ordering::SeqCst);
            match current {
                IDLE => {
                    if self.queue_flag
                           .compare_exchange(IDLE, QUEUED, Ordering::SeqCst, Ordering::SeqCst)
                           .is_ok()
                    {
                        if let Some(scheduler) = self.scheduler.upgrade() {
                            scheduler.push(self.clone());
                        }
                        return;
                    }
                }
                QUEUED | NOTIFIED => return,
                POLLING => {
                    if self.queue_flag
                           .compare_exchange(POLLING, NOTIFIED, Ordering::SeqCst, Ordering::SeqCst)
                           .is_ok()
                    {
                        return;
                    }
                }
                _ => unreachable!("invalid queue flag"),
            }
        }
    }

    /// Reclama el microthread para poll; falso si otro worker se adelantó.
    pub(crate) fn claim_for_poll(&self) -> bool {
        self.queue_flag
            .compare_exchange(QUEUED, POLLING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Libera el reclamo tras un `Pending`; true si hubo un wake durante el
    /// poll y hay que reencolar.
    pub(crate) fn release_after_poll(&self) -> bool {
        if self.queue_flag
               .compare_exchange(POLLING, IDLE, Ordering::SeqCst, Ordering::SeqCst)
               .is_ok()
        {
            return false;
        }
        // Estaba NOTIFIED: vuelve a QUEUED y el caller lo reencola
        self.queue_flag.store(QUEUED, Ordering::SeqCst);
        true
    }

    pub(crate) fn take_body(&self) -> Option<BoxedBody> {
        self.body.lock().expect("microthread body poisoned").take()
    }

    pub(crate) fn put_body(&self, body: BoxedBody) {
        *self.body.lock().expect("microthread body poisoned") = Some(body);
    }

    pub(crate) fn set_state(&self, state: MicroThreadState) {
        *self.state.lock().expect("microthread state poisoned") = state;
    }

    pub(crate) fn state(&self) -> MicroThreadState {
        *self.state.lock().expect("microthread state poisoned")
    }

    /// Marca el microthread como terminado y despierta a quienes lo esperan.
    pub(crate) fn finish(&self, state: MicroThreadState) {
        self.set_state(state);
        self.queue_flag.store(IDLE, Ordering::SeqCst);
        let waiters = std::mem::take(&mut *self.waiters.lock().expect("microthread waiters poisoned"));
        for waker in waiters {
            waker.wake();
        }
    }

    fn register_waiter(&self, waker: &Waker) {
        let mut waiters = self.waiters.lock().expect("microthread waiters poisoned");
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().expect("microthread name poisoned").clone()
    }
}

impl Wake for MicroThreadInner {
    fn wake(self: Arc<Self>) {
        self.enqueue();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.enqueue();
    }
}

/// Handle público de un microthread creado por el `Scheduler`.
#[derive(Clone)]
pub struct MicroThread {
    pub(crate) inner: Arc<MicroThreadInner>,
}

impl MicroThread {
    /// Id numérico estable, asignado en la creación. Los build steps lo usan
    /// como execution id para detectar "ya agendado".
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock().expect("microthread name poisoned") = name.into();
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    /// Prioridad numérica; menor valor corre primero entre tareas listas.
    pub fn set_priority(&self, priority: i64) {
        self.inner.priority.store(priority, Ordering::SeqCst);
    }

    pub fn set_schedule_mode(&self, mode: ScheduleMode) {
        let raw = match mode {
            ScheduleMode::First => MODE_FIRST,
            ScheduleMode::Last => MODE_LAST,
        };
        self.inner.schedule_mode.store(raw, Ordering::SeqCst);
    }

    pub fn state(&self) -> MicroThreadState {
        self.inner.state()
    }

    pub fn is_over(&self) -> bool {
        self.inner.state().is_over()
    }

    /// Comienza la ejecución cooperativa del cuerpo.
    pub fn start<F>(&self, body: F)
        where F: Future<Output = ()> + Send + 'static
    {
        debug_assert_eq!(self.inner.state(), MicroThreadState::NotStarted);
        self.inner.put_body(Box::pin(body));
        self.inner.set_state(MicroThreadState::Running);
        self.inner.enqueue();
    }

    /// Future que resuelve cuando este microthread termina.
    pub fn joined(&self) -> JoinFuture {
        JoinFuture { thread: self.inner.clone() }
    }
}

/// Espera la finalización de otro microthread.
pub struct JoinFuture {
    thread: Arc<MicroThreadInner>,
}

impl Future for JoinFuture {
    type Output = MicroThreadState;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = self.thread.state();
        if state.is_over() {
            return Poll::Ready(state);
        }
        self.thread.register_waiter(cx.waker());
        // Revalidar: pudo terminar entre la lectura y el registro
        let state = self.thread.state();
        if state.is_over() {
            Poll::Ready(state)
        } else {
            Poll::Pending
        }
    }
}
