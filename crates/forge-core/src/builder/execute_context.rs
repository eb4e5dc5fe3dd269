use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::command::{Command, CommandContext, CommandIOMonitor};
use crate::errors::BuildError;
use crate::model::{CommandResultEntry, ObjectId, ObjectUrl, OutputObject, StepLogger, UrlType};
use crate::sched::{CancellationToken, ScheduleMode, Scheduler};
use crate::step::command_step::execute_command;
use crate::step::dynamic::execute_dynamic;
use crate::step::list::execute_list;
use crate::step::{BuildStep, ResultStatus, StepKind};
use crate::store::{ContentStore, FileVersionTracker, IndexMap, ResultStore};
use crate::transaction::BuildTransaction;

use super::context::BuilderContext;
use super::counter::StepCounter;

/// Estado compartido de un run en curso.
///
/// Todo step agendado recibe un `Arc` a este contexto: de acá salen el
/// scheduler, la vista transaccional de contenido, el monitor de E/S, el
/// registro single-flight y los contadores del resumen final.
pub struct ExecuteContext {
    scheduler: Scheduler,
    token: CancellationToken,
    builder: Arc<BuilderContext>,
    content_store: Arc<dyn ContentStore>,
    result_store: Arc<dyn ResultStore>,
    transaction: BuildTransaction,
    io_monitor: CommandIOMonitor,
    versions: FileVersionTracker,
    in_progress: Mutex<HashMap<ObjectId, Arc<BuildStep>>>,
    counter: StepCounter,
}

impl ExecuteContext {
    pub fn new(scheduler: Scheduler,
               token: CancellationToken,
               builder: Arc<BuilderContext>,
               content_store: Arc<dyn ContentStore>,
               result_store: Arc<dyn ResultStore>,
               index: Arc<dyn IndexMap>)
               -> Self {
        Self { scheduler,
               token,
               builder,
               content_store,
               result_store,
               transaction: BuildTransaction::new(index),
               io_monitor: CommandIOMonitor::new(),
               versions: FileVersionTracker::new(),
               in_progress: Mutex::new(HashMap::new()),
               counter: StepCounter::new() }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn builder(&self) -> &Arc<BuilderContext> {
        &self.builder
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.content_store
    }

    pub fn result_store(&self) -> &Arc<dyn ResultStore> {
        &self.result_store
    }

    pub fn transaction(&self) -> &BuildTransaction {
        &self.transaction
    }

    pub fn io_monitor(&self) -> &CommandIOMonitor {
        &self.io_monitor
    }

    pub fn counter(&self) -> &StepCounter {
        &self.counter
    }

    /// Agenda un step como microthread. Idempotente: el primer agendado fija
    /// instigador y execution id; repetir desde el mismo instigador es no-op,
    /// desde otro es error.
    pub fn schedule_step(self: &Arc<Self>,
                         instigator: Option<&Arc<BuildStep>>,
                         step: &Arc<BuildStep>)
                         -> Result<(), BuildError> {
        if !step.try_mark_scheduled() {
            let same = match (step.parent(), instigator) {
                (Some(parent), Some(instigator)) => Arc::ptr_eq(&parent, instigator),
                (None, None) => true,
                _ => false,
            };
            return if same {
                Ok(())
            } else {
                Err(BuildError::InstigatorMismatch(step.title().to_string()))
            };
        }

        if let Some(instigator) = instigator {
            step.set_parent(Arc::downgrade(instigator))?;
        }

        let thread = self.scheduler.create();
        thread.set_name(step.title());
        thread.set_priority(step.effective_priority());
        thread.set_schedule_mode(ScheduleMode::First);
        step.set_execution_id(thread.id());
        thread.start(run_step_body(self.clone(), step.clone()));
        Ok(())
    }

    /// Hash del contenido actual de una url, para la identidad de comandos.
    pub fn compute_input_hash(&self, url: &ObjectUrl) -> ObjectId {
        match url.url_type {
            UrlType::File => self.versions
                                 .compute_file_hash(Path::new(&url.path))
                                 .unwrap_or(ObjectId::EMPTY),
            _ => self.transaction.try_get(url).unwrap_or(ObjectId::EMPTY),
        }
    }

    /// Busca en el log del hash una entrada cuyas dependencias de entrada
    /// sigan vigentes y cuyos outputs sigan disponibles. La más reciente gana.
    pub fn find_matching_result(&self, hash: &ObjectId) -> Option<CommandResultEntry> {
        self.result_store.load(hash).into_iter().rev().find(|entry| {
            entry.input_dependency_versions
                 .iter()
                 .all(|(url, id)| self.compute_input_hash(url) == *id)
            && entry.output_objects.iter().all(|(url, id)| self.output_available(url, id))
        })
    }

    fn output_available(&self, url: &ObjectUrl, id: &ObjectId) -> bool {
        match url.url_type {
            UrlType::File => self.versions
                                 .compute_file_hash(Path::new(&url.path))
                                 .map(|current| current == *id)
                                 .unwrap_or(false),
            _ => self.content_store.contains(id),
        }
    }

    /// Reclama el vuelo del hash para `step`; devuelve el dueño actual si
    /// otro step idéntico ya lo tiene.
    pub(crate) fn claim_command(&self, hash: &ObjectId, step: &Arc<BuildStep>) -> Option<Arc<BuildStep>> {
        let mut in_progress = self.in_progress.lock().expect("in-flight registry poisoned");
        if let Some(owner) = in_progress.get(hash) {
            return Some(owner.clone());
        }
        in_progress.insert(*hash, step.clone());
        None
    }

    pub(crate) fn release_command(&self, hash: &ObjectId) {
        self.in_progress.lock().expect("in-flight registry poisoned").remove(hash);
    }
}

/// Cuerpo común de todo step agendado.
///
/// Espera prerequisitos, despacha según el tipo y cierra con exactamente un
/// status terminal. Ningún error escapa al scheduler: todo termina en un
/// `resolve`. Boxed: los steps agendan steps y el tipo debe cerrarse.
pub(crate) fn run_step_body(ctx: Arc<ExecuteContext>,
                            step: Arc<BuildStep>)
                            -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let guard = StepGuard { ctx: ctx.clone(), step: step.clone(), armed: true };
        let mut status = ResultStatus::NotProcessed;

        for prerequisite in step.prerequisites() {
            let result = prerequisite.executed().await;
            if result.failed() {
                status = ResultStatus::NotTriggeredPrerequisiteFailed;
                break;
            }
            if result == ResultStatus::Cancelled {
                status = ResultStatus::Cancelled;
                break;
            }
        }

        if status == ResultStatus::NotProcessed {
            status = if ctx.token.is_cancelled() {
                ResultStatus::Cancelled
            } else {
                match step.kind() {
                    StepKind::Wait => ResultStatus::Successful,
                    StepKind::List(list) => execute_list(&ctx, &step, list).await,
                    StepKind::Dynamic(dynamic) => execute_dynamic(&ctx, &step, dynamic).await,
                    StepKind::Command(slot) => execute_command(&ctx, &step, slot).await,
                }
            };
        }

        if status == ResultStatus::NotProcessed {
            step.logger().error("step finished without a terminal status");
            status = ResultStatus::Failed;
        }
        guard.finish(status);
    })
}

/// Garantiza exactamente un `resolve` por step, panickee o no su cuerpo.
///
/// El scheduler captura el pánico y suelta el future; el unwind dropea esta
/// guardia y el step cierra en `Failed`, así nadie espera un status que no
/// llega.
struct StepGuard {
    ctx: Arc<ExecuteContext>,
    step: Arc<BuildStep>,
    armed: bool,
}

impl StepGuard {
    fn finish(mut self, status: ResultStatus) {
        self.armed = false;
        finish_step(&self.ctx, &self.step, status);
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        if self.armed {
            self.step.logger().error("step body panicked");
            finish_step(&self.ctx, &self.step, ResultStatus::Failed);
        }
    }
}

fn finish_step(ctx: &ExecuteContext, step: &BuildStep, status: ResultStatus) {
    if step.is_command() {
        ctx.counter.record(status);
    }
    step.resolve(status);
}

/// Contexto local que ve un comando corriendo en este proceso.
///
/// Acumula el `CommandResultEntry` del comando; los outputs propios son
/// visibles de inmediato para sus propias lecturas, el resto del run los ve
/// recién cuando el step termina bien.
pub struct LocalCommandContext {
    ctx: Arc<ExecuteContext>,
    step: Arc<BuildStep>,
    entry: CommandResultEntry,
    cacheable: bool,
}

impl LocalCommandContext {
    pub(crate) fn new(ctx: Arc<ExecuteContext>, step: Arc<BuildStep>, entry: CommandResultEntry) -> Self {
        Self { ctx, step, entry, cacheable: true }
    }

    pub(crate) fn into_parts(self) -> (CommandResultEntry, bool) {
        (self.entry, self.cacheable)
    }
}

#[async_trait]
impl CommandContext for LocalCommandContext {
    fn logger(&self) -> &StepLogger {
        self.step.logger()
    }

    fn register_output(&mut self, url: ObjectUrl, id: ObjectId) {
        if let Some(execution) = self.step.execution_id() {
            self.ctx.io_monitor.record_write(execution, &url);
        }
        self.entry.output_objects.insert(url, id);
    }

    fn add_tag(&mut self, url: &ObjectUrl, tag: &str) {
        self.entry.tags.entry(url.clone()).or_default().insert(tag.to_string());
    }

    fn resolve_content_id(&self, url: &ObjectUrl) -> Option<ObjectId> {
        // Capas: outputs propios → grupos de los aggregates ancestros →
        // vista transaccional del run
        if let Some(id) = self.entry.output_objects.get(url) {
            return Some(*id);
        }
        let mut cursor = self.step.parent();
        while let Some(step) = cursor {
            if let Some(id) = step.aggregate().and_then(|aggregate| aggregate.resolve(url)) {
                return Some(id);
            }
            cursor = step.parent();
        }
        self.ctx.transaction.try_get(url)
    }

    fn compute_input_hash(&self, url: &ObjectUrl) -> ObjectId {
        if let Some(id) = self.entry.output_objects.get(url) {
            return *id;
        }
        self.ctx.compute_input_hash(url)
    }

    fn content_store(&self) -> Arc<dyn ContentStore> {
        self.ctx.content_store.clone()
    }

    fn current_outputs(&self) -> Vec<(ObjectUrl, ObjectId)> {
        self.entry.output_objects.iter().map(|(url, id)| (url.clone(), *id)).collect()
    }

    fn output_object_groups(&self) -> Vec<Vec<OutputObject>> {
        self.step.ancestor_output_groups()
    }

    async fn schedule_and_await_command(&mut self, command: Box<dyn Command>) -> ResultStatus {
        match command.remote_spec() {
            Some(spec) => self.entry.spawned_commands.push(spec),
            None => {
                // Sin forma serializable el spawn no puede replicarse en un
                // cache hit, así que el resultado entero queda fuera de cache
                self.cacheable = false;
                self.step.logger().debug(format!("spawned command `{}` has no serializable form; \
                                                  result will not be cached",
                                                 command.title()));
            }
        }

        let child = BuildStep::command(command);
        if let Err(err) = self.ctx.schedule_step(Some(&self.step), &child) {
            self.step.logger().error(format!("cannot schedule spawned command: {}", err));
            return ResultStatus::Failed;
        }
        child.executed().await
    }
}
