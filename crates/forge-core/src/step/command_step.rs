use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::{ExecuteContext, LocalCommandContext};
use crate::command::{compute_command_hash, Command, CommandContext};
use crate::errors::BuildError;
use crate::model::{CommandResultEntry, ObjectId, ObjectUrl};
use crate::sched::sleep;

use super::build_step::{BuildStep, CommandStep};
use super::status::ResultStatus;

/// Ejecuta un command step completo: identidad, single-flight, cache y
/// finalmente el cuerpo del comando (local o en proceso worker).
pub(crate) async fn execute_command(ctx: &Arc<ExecuteContext>,
                                    step: &Arc<BuildStep>,
                                    slot: &CommandStep)
                                    -> ResultStatus {
    let command = slot.command();
    let hashed = compute_command_hash(command, |url| ctx.compute_input_hash(url));
    let (hash, versions) = match hashed {
        Ok(pair) => pair,
        Err(err) => {
            step.logger().error(format!("cannot compute identity of `{}`: {}", command.title(), err));
            return ResultStatus::Failed;
        }
    };

    // Single-flight: un solo dueño por hash; el resto espera y adopta
    if let Some(owner) = ctx.claim_command(&hash, step) {
        return adopt_result(step, slot, &owner).await;
    }
    // Suelta el reclamo también si el cuerpo panickea y el future se dropea
    let _claim = ClaimGuard { ctx: ctx.clone(), hash };

    run_or_replay(ctx, step, slot, &hash, versions).await
}

struct ClaimGuard {
    ctx: Arc<ExecuteContext>,
    hash: ObjectId,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.ctx.release_command(&self.hash);
    }
}

/// Espera al step idéntico ya en vuelo y toma su resultado como propio.
async fn adopt_result(step: &Arc<BuildStep>,
                      slot: &CommandStep,
                      owner: &Arc<BuildStep>)
                      -> ResultStatus {
    step.logger().debug(format!("identical command already in flight as `{}`", owner.title()));
    match owner.executed().await {
        ResultStatus::Successful | ResultStatus::NotTriggeredWasSuccessful => {
            if let Some(entry) = owner.command_result() {
                slot.set_result(entry);
            }
            ResultStatus::NotTriggeredWasSuccessful
        }
        ResultStatus::Cancelled => ResultStatus::Cancelled,
        _ => ResultStatus::Failed,
    }
}

async fn run_or_replay(ctx: &Arc<ExecuteContext>,
                       step: &Arc<BuildStep>,
                       slot: &CommandStep,
                       hash: &ObjectId,
                       versions: BTreeMap<ObjectUrl, ObjectId>)
                       -> ResultStatus {
    if !slot.command().should_force_execution() {
        if let Some(entry) = ctx.find_matching_result(hash) {
            return replay(ctx, step, slot, entry).await;
        }
    }
    run_command(ctx, step, slot, hash, versions).await
}

/// Cache hit: re-emite logs, publica outputs y replica los spawns sin
/// ejecutar el cuerpo del comando.
async fn replay(ctx: &Arc<ExecuteContext>,
                step: &Arc<BuildStep>,
                slot: &CommandStep,
                entry: CommandResultEntry)
                -> ResultStatus {
    for message in &entry.log_messages {
        step.logger().replay(message);
    }
    for (url, id) in &entry.output_objects {
        ctx.transaction().record(url.clone(), *id);
    }

    let mut status = ResultStatus::NotTriggeredWasSuccessful;
    for spec in &entry.spawned_commands {
        match ctx.builder().registry().create(spec) {
            Ok(spawned) => {
                let child = BuildStep::command(spawned);
                if let Err(err) = ctx.schedule_step(Some(step), &child) {
                    step.logger().error(format!("cannot replay spawned command: {}", err));
                    status = ResultStatus::Failed;
                    continue;
                }
                if child.executed().await.failed() {
                    status = ResultStatus::Failed;
                }
            }
            Err(err) => {
                step.logger().error(format!("cannot replay spawned command: {}", err));
                status = ResultStatus::Failed;
            }
        }
    }

    slot.set_result(entry);
    status
}

async fn run_command(ctx: &Arc<ExecuteContext>,
                     step: &Arc<BuildStep>,
                     slot: &CommandStep,
                     hash: &ObjectId,
                     versions: BTreeMap<ObjectUrl, ObjectId>)
                     -> ResultStatus {
    let command = slot.command();
    let execution = step.execution_id().unwrap_or(0);
    ctx.io_monitor().command_started(execution, command.title(), command.input_files());

    let mut entry = CommandResultEntry::new(command.title());
    entry.input_dependency_versions = versions;
    let log_mark = step.logger().len();
    let mut context = LocalCommandContext::new(ctx.clone(), step.clone(), entry);

    command.pre_execute(&mut context);
    let outcome = dispatch(ctx, command, &mut context).await;
    let mut status = match outcome {
        Ok(status) => status,
        Err(err) => {
            step.logger().error(format!("command `{}` failed: {}", command.title(), err));
            ResultStatus::Failed
        }
    };
    if status == ResultStatus::NotProcessed {
        step.logger().error(format!("command `{}` finished without a terminal status", command.title()));
        status = ResultStatus::Failed;
    }
    command.post_execute(&mut context, status);
    ctx.io_monitor().command_finished(execution);

    if status == ResultStatus::Successful {
        let (mut entry, cacheable) = context.into_parts();
        entry.log_messages = step.logger().messages_since(log_mark);
        for (url, id) in &entry.output_objects {
            ctx.transaction().record(url.clone(), *id);
        }
        if cacheable {
            if let Err(err) = ctx.result_store().append(hash, &entry) {
                step.logger()
                    .warning(format!("result of `{}` could not be cached: {}", entry.command_title, err));
            }
        }
        slot.set_result(entry);
    }
    status
}

/// Elige dónde corre el cuerpo: en proceso, o en un worker externo si el
/// comando lo pide y hay canal configurado. El presupuesto de procesos se
/// adquiere acá, cediendo el turno mientras no haya cupo.
async fn dispatch(ctx: &Arc<ExecuteContext>,
                  command: &dyn Command,
                  context: &mut LocalCommandContext)
                  -> Result<ResultStatus, BuildError> {
    if !command.should_spawn_new_process() {
        return command.execute(context, ctx.token()).await;
    }
    let Some(remote) = ctx.builder().remote().cloned() else {
        context.logger()
               .debug(format!("no worker channel configured; running `{}` in process", command.title()));
        return command.execute(context, ctx.token()).await;
    };
    if command.remote_spec().is_none() {
        return Err(BuildError::MissingRemoteSpec(command.title()));
    }

    loop {
        if ctx.token().is_cancelled() {
            return Ok(ResultStatus::Cancelled);
        }
        if ctx.builder().process_budget().try_acquire() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let result = remote.execute(command, context, ctx.builder().as_ref(), ctx.token()).await;
    ctx.builder().process_budget().release();
    result
}
