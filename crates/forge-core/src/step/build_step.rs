use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::task::{Context, Poll, Waker};

use crate::command::Command;
use crate::errors::BuildError;
use crate::model::{CommandResultEntry, ObjectUrl, OutputObject, StepLogger};

use super::aggregate::AggregateState;
use super::dynamic::{DynamicStep, DynamicStepQueue};
use super::status::ResultStatus;

/// Nodo del grafo de build, compartido por `Arc`.
///
/// El estado común (padre, prioridad, prerequisitos, status) vive acá; el
/// comportamiento específico vive en `StepKind`. El vínculo con el scheduler
/// es de una sola vez: el primer agendado fija padre y execution id, los
/// reintentos posteriores son no-ops si vienen del mismo instigador y error
/// si vienen de otro.
pub struct BuildStep {
    title: String,
    logger: StepLogger,
    parent: OnceLock<Weak<BuildStep>>,
    scheduled: AtomicBool,
    execution_id: OnceLock<u64>,
    priority: Mutex<Option<i64>>,
    prerequisites: Mutex<Vec<Arc<BuildStep>>>,
    status: Mutex<ResultStatus>,
    waiters: Mutex<Vec<Waker>>,
    kind: StepKind,
}

/// Comportamiento de un step. Enum cerrado: el orquestador conoce los
/// cuatro tipos y despacha sin virtualización.
pub enum StepKind {
    /// Secuencia de hijos con merge de outputs y barreras `Wait`.
    List(ListStep),
    /// Ejecuta un `Command` con cache y single-flight.
    Command(CommandStep),
    /// Barrera: todo lo agendado antes en la lista termina antes de seguir.
    Wait,
    /// Hijos provistos de a poco por un productor externo, con paralelismo acotado.
    Dynamic(DynamicStep),
}

pub struct ListStep {
    aggregate: AggregateState,
    children: Mutex<Vec<Arc<BuildStep>>>,
    started: AtomicBool,
}

impl ListStep {
    pub fn aggregate(&self) -> &AggregateState {
        &self.aggregate
    }

    pub(crate) fn seal(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub(crate) fn children_snapshot(&self) -> Vec<Arc<BuildStep>> {
        self.children.lock().expect("list children poisoned").clone()
    }
}

pub struct CommandStep {
    command: Box<dyn Command>,
    result: Mutex<Option<CommandResultEntry>>,
}

impl CommandStep {
    pub fn command(&self) -> &dyn Command {
        self.command.as_ref()
    }

    pub fn result(&self) -> Option<CommandResultEntry> {
        self.result.lock().expect("command result poisoned").clone()
    }

    pub(crate) fn set_result(&self, entry: CommandResultEntry) {
        *self.result.lock().expect("command result poisoned") = Some(entry);
    }
}

impl BuildStep {
    fn base(title: String, kind: StepKind) -> Arc<Self> {
        Arc::new(Self { logger: StepLogger::new(title.clone()),
                        title,
                        parent: OnceLock::new(),
                        scheduled: AtomicBool::new(false),
                        execution_id: OnceLock::new(),
                        priority: Mutex::new(None),
                        prerequisites: Mutex::new(Vec::new()),
                        status: Mutex::new(ResultStatus::NotProcessed),
                        waiters: Mutex::new(Vec::new()),
                        kind })
    }

    pub fn list(title: impl Into<String>) -> Arc<Self> {
        Self::base(title.into(),
                   StepKind::List(ListStep { aggregate: AggregateState::new(),
                                             children: Mutex::new(Vec::new()),
                                             started: AtomicBool::new(false) }))
    }

    pub fn command(command: Box<dyn Command>) -> Arc<Self> {
        let title = command.title();
        Self::base(title, StepKind::Command(CommandStep { command, result: Mutex::new(None) }))
    }

    pub fn wait() -> Arc<Self> {
        Self::base("wait".into(), StepKind::Wait)
    }

    /// Crea un step dinámico junto con el handle productor que le entrega
    /// hijos. `max_parallel` acota cuántos hijos corren a la vez.
    pub fn dynamic(title: impl Into<String>, max_parallel: usize) -> (Arc<Self>, DynamicStepQueue) {
        let (dynamic, queue) = DynamicStep::new(max_parallel.max(1));
        (Self::base(title.into(), StepKind::Dynamic(dynamic)), queue)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn logger(&self) -> &StepLogger {
        &self.logger
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_wait(&self) -> bool {
        matches!(self.kind, StepKind::Wait)
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind, StepKind::Command(_))
    }

    pub fn as_command(&self) -> Option<&CommandStep> {
        match &self.kind {
            StepKind::Command(slot) => Some(slot),
            _ => None,
        }
    }

    /// Estado de merge del step, si agrega outputs de hijos.
    pub fn aggregate(&self) -> Option<&AggregateState> {
        match &self.kind {
            StepKind::List(list) => Some(&list.aggregate),
            StepKind::Dynamic(dynamic) => Some(dynamic.aggregate()),
            _ => None,
        }
    }

    /// Resultado de cache del comando, si este step es un comando ya resuelto.
    pub fn command_result(&self) -> Option<CommandResultEntry> {
        self.as_command().and_then(|slot| slot.result())
    }

    /// Ubicación de la que este step es productor único, si declara una.
    pub fn output_location(&self) -> Option<ObjectUrl> {
        self.as_command().and_then(|slot| slot.command().output_location())
    }

    /// Agrega un hijo a un step de lista. Falla si la lista ya arrancó o el
    /// step no es una lista.
    pub fn add_child(&self, child: Arc<BuildStep>) -> Result<(), BuildError> {
        match &self.kind {
            StepKind::List(list) => {
                if list.started.load(Ordering::SeqCst) {
                    return Err(BuildError::ListSealed(self.title.clone()));
                }
                list.children.lock().expect("list children poisoned").push(child);
                Ok(())
            }
            _ => Err(BuildError::Internal(format!("step `{}` cannot hold children", self.title))),
        }
    }

    pub fn parent(&self) -> Option<Arc<BuildStep>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Weak<BuildStep>) -> Result<(), BuildError> {
        self.parent.set(parent).map_err(|_| BuildError::ParentAlreadySet(self.title.clone()))
    }

    /// Primer agendado gana; los siguientes devuelven falso.
    pub(crate) fn try_mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn set_execution_id(&self, id: u64) {
        let _ = self.execution_id.set(id);
    }

    /// Id del microthread que ejecuta este step; identidad del productor en
    /// los chequeos de conflicto.
    pub fn execution_id(&self) -> Option<u64> {
        self.execution_id.get().copied()
    }

    pub fn set_priority(&self, priority: i64) {
        *self.priority.lock().expect("step priority poisoned") = Some(priority);
    }

    /// Prioridad propia, o heredada del ancestro más cercano que declare una.
    pub fn effective_priority(&self) -> i64 {
        if let Some(own) = *self.priority.lock().expect("step priority poisoned") {
            return own;
        }
        let mut cursor = self.parent();
        while let Some(step) = cursor {
            if let Some(inherited) = *step.priority.lock().expect("step priority poisoned") {
                return inherited;
            }
            cursor = step.parent();
        }
        0
    }

    /// Declara que este step no corre hasta que `producer` termine.
    pub fn add_prerequisite(&self, producer: Arc<BuildStep>) {
        let mut prerequisites = self.prerequisites.lock().expect("step prerequisites poisoned");
        if !prerequisites.iter().any(|p| Arc::ptr_eq(p, &producer)) {
            prerequisites.push(producer);
        }
    }

    pub fn prerequisites(&self) -> Vec<Arc<BuildStep>> {
        self.prerequisites.lock().expect("step prerequisites poisoned").clone()
    }

    pub fn status(&self) -> ResultStatus {
        *self.status.lock().expect("step status poisoned")
    }

    /// Fija el status terminal y despierta a quienes esperan. Resolver dos
    /// veces es un defecto del orquestador: se loguea y se ignora.
    pub(crate) fn resolve(&self, status: ResultStatus) {
        {
            let mut current = self.status.lock().expect("step status poisoned");
            if current.is_terminal() {
                log::error!(target: "forge",
                            "step `{}` resolved twice ({:?} then {:?})",
                            self.title, *current, status);
                return;
            }
            *current = status;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock().expect("step waiters poisoned"));
        for waker in waiters {
            waker.wake();
        }
    }

    pub(crate) fn register_waiter(&self, waker: &Waker) {
        let mut waiters = self.waiters.lock().expect("step waiters poisoned");
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    /// Future que resuelve con el status terminal de este step.
    pub fn executed(self: &Arc<Self>) -> ExecutedFuture {
        ExecutedFuture { step: self.clone() }
    }

    /// Grupos de outputs ya fusionados por los aggregates ancestros, del más
    /// cercano al más lejano. Es la vista en capas que un comando tiene de lo
    /// producido por sus hermanos terminados.
    pub fn ancestor_output_groups(&self) -> Vec<Vec<OutputObject>> {
        let mut groups = Vec::new();
        let mut cursor = self.parent();
        while let Some(step) = cursor {
            if let Some(aggregate) = step.aggregate() {
                groups.push(aggregate.outputs());
            }
            cursor = step.parent();
        }
        groups
    }

    /// Junta recursivamente los command steps alcanzables desde este nodo.
    /// Los hijos de steps dinámicos no existen hasta el run y no aparecen.
    pub fn collect_command_steps(self: &Arc<Self>, out: &mut Vec<Arc<BuildStep>>) {
        match &self.kind {
            StepKind::Command(_) => out.push(self.clone()),
            StepKind::List(list) => {
                for child in list.children_snapshot() {
                    child.collect_command_steps(out);
                }
            }
            StepKind::Wait | StepKind::Dynamic(_) => {}
        }
    }
}

impl fmt::Debug for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildStep")
         .field("title", &self.title)
         .field("status", &self.status())
         .finish()
    }
}

/// Espera el status terminal de un step.
pub struct ExecutedFuture {
    step: Arc<BuildStep>,
}

impl Future for ExecutedFuture {
    type Output = ResultStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let status = self.step.status();
        if status.is_terminal() {
            return Poll::Ready(status);
        }
        self.step.register_waiter(cx.waker());
        // Revalidar: pudo resolverse entre la lectura y el registro
        let status = self.step.status();
        if status.is_terminal() {
            Poll::Ready(status)
        } else {
            Poll::Pending
        }
    }
}

/// Espera a que cualquiera de los steps dados termine; resuelve su índice.
pub(crate) struct AwaitAny<'a> {
    steps: &'a [Arc<BuildStep>],
}

impl<'a> AwaitAny<'a> {
    pub(crate) fn new(steps: &'a [Arc<BuildStep>]) -> Self {
        Self { steps }
    }
}

impl Future for AwaitAny<'_> {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        for (index, step) in self.steps.iter().enumerate() {
            if step.status().is_terminal() {
                return Poll::Ready(index);
            }
        }
        for step in self.steps {
            step.register_waiter(cx.waker());
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.status().is_terminal() {
                return Poll::Ready(index);
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_schedule_wins() {
        let step = BuildStep::wait();
        assert!(step.try_mark_scheduled());
        assert!(!step.try_mark_scheduled());
    }

    #[test]
    fn resolve_is_single_shot() {
        let step = BuildStep::wait();
        step.resolve(ResultStatus::Successful);
        step.resolve(ResultStatus::Failed);
        assert_eq!(step.status(), ResultStatus::Successful);
    }

    #[test]
    fn priority_is_inherited_from_ancestors() {
        let root = BuildStep::list("root");
        root.set_priority(7);
        let child = BuildStep::list("child");
        child.set_parent(Arc::downgrade(&root)).unwrap();
        let grandchild = BuildStep::wait();
        grandchild.set_parent(Arc::downgrade(&child)).unwrap();
        assert_eq!(grandchild.effective_priority(), 7);

        child.set_priority(3);
        assert_eq!(grandchild.effective_priority(), 3);
    }

    #[test]
    fn sealed_list_rejects_children() {
        let list = BuildStep::list("pipeline");
        list.add_child(BuildStep::wait()).unwrap();
        if let StepKind::List(inner) = list.kind() {
            inner.seal();
        }
        assert!(matches!(list.add_child(BuildStep::wait()), Err(BuildError::ListSealed(_))));
    }

    #[test]
    fn prerequisites_are_deduplicated() {
        let producer = BuildStep::wait();
        let consumer = BuildStep::wait();
        consumer.add_prerequisite(producer.clone());
        consumer.add_prerequisite(producer.clone());
        assert_eq!(consumer.prerequisites().len(), 1);
    }
}
