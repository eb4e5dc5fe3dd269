use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::builder::ExecuteContext;
use crate::sched::WakeSignal;

use super::aggregate::AggregateState;
use super::build_step::BuildStep;
use super::list::{drain_pending, settle_terminal, StatusFold};
use super::status::ResultStatus;

/// Step cuyos hijos llegan de a poco desde un productor externo.
///
/// El productor (otro thread, un watcher de filesystem, un enumerador
/// perezoso) entrega steps por el `DynamicStepQueue` y cierra la cola al
/// terminar. La ejecución corre a lo sumo `max_parallel` hijos a la vez y
/// fusiona sus outputs igual que una lista.
pub struct DynamicStep {
    shared: Arc<DynamicShared>,
    max_parallel: usize,
    aggregate: AggregateState,
}

struct DynamicShared {
    queue: Mutex<VecDeque<Arc<BuildStep>>>,
    closed: AtomicBool,
    signal: WakeSignal,
}

impl DynamicStep {
    pub(crate) fn new(max_parallel: usize) -> (Self, DynamicStepQueue) {
        let shared = Arc::new(DynamicShared { queue: Mutex::new(VecDeque::new()),
                                              closed: AtomicBool::new(false),
                                              signal: WakeSignal::new() });
        let step = Self { shared: shared.clone(),
                          max_parallel,
                          aggregate: AggregateState::new() };
        (step, DynamicStepQueue { shared })
    }

    pub fn aggregate(&self) -> &AggregateState {
        &self.aggregate
    }
}

/// Handle productor de un step dinámico.
#[derive(Clone)]
pub struct DynamicStepQueue {
    shared: Arc<DynamicShared>,
}

impl DynamicStepQueue {
    /// Publica un hijo nuevo; despierta al consumidor si está bloqueado.
    pub fn push(&self, step: Arc<BuildStep>) {
        self.shared.queue.lock().expect("dynamic queue poisoned").push_back(step);
        self.shared.signal.notify();
    }

    /// Declara el productor agotado. Sin esto el step dinámico nunca termina.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.signal.notify();
    }
}

pub(crate) async fn execute_dynamic(ctx: &Arc<ExecuteContext>,
                                    step: &Arc<BuildStep>,
                                    dynamic: &DynamicStep)
                                    -> ResultStatus {
    let shared = &dynamic.shared;
    let mut fold = StatusFold::default();
    let mut in_flight: Vec<Arc<BuildStep>> = Vec::new();

    loop {
        // Tomar trabajo disponible hasta el tope de paralelismo
        while in_flight.len() < dynamic.max_parallel {
            let next = shared.queue.lock().expect("dynamic queue poisoned").pop_front();
            let Some(child) = next else {
                break;
            };
            if child.is_wait() {
                drain_pending(step, &dynamic.aggregate, &mut in_flight, &mut fold).await;
                let _ = child.set_parent(Arc::downgrade(step));
                child.resolve(ResultStatus::Successful);
                continue;
            }
            match ctx.schedule_step(Some(step), &child) {
                Ok(()) => in_flight.push(child),
                Err(err) => {
                    step.logger().error(format!("cannot schedule `{}`: {}", child.title(), err));
                    fold.failed = true;
                }
            }
        }

        let queue_empty = shared.queue.lock().expect("dynamic queue poisoned").is_empty();
        if in_flight.is_empty() && queue_empty {
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            shared.signal.wait().await;
            continue;
        }

        // Esperar a que termine un hijo o llegue trabajo nuevo
        NextEvent { steps: &in_flight, signal: &shared.signal }.await;
        settle_terminal(step, &dynamic.aggregate, &mut in_flight, &mut fold);
    }

    fold.into_status()
}

/// Resuelve cuando algún step termina o el productor notifica.
struct NextEvent<'a> {
    steps: &'a [Arc<BuildStep>],
    signal: &'a WakeSignal,
}

impl Future for NextEvent<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.steps.iter().any(|s| s.status().is_terminal()) {
            return Poll::Ready(());
        }
        let mut wait = self.signal.wait();
        if Pin::new(&mut wait).poll(cx).is_ready() {
            return Poll::Ready(());
        }
        for step in self.steps {
            step.register_waiter(cx.waker());
        }
        if self.steps.iter().any(|s| s.status().is_terminal()) {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}
