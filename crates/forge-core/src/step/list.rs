use std::collections::HashMap;
use std::sync::Arc;

use crate::builder::ExecuteContext;
use crate::model::UrlType;

use super::aggregate::AggregateState;
use super::build_step::{AwaitAny, BuildStep, ListStep};
use super::status::ResultStatus;

/// Plegado del status de un conjunto de hijos: cualquier fallo gana,
/// después la cancelación, después el éxito.
#[derive(Default)]
pub(crate) struct StatusFold {
    pub(crate) failed: bool,
    pub(crate) cancelled: bool,
}

impl StatusFold {
    pub(crate) fn observe(&mut self, status: ResultStatus) {
        if status.failed() {
            self.failed = true;
        }
        if status == ResultStatus::Cancelled {
            self.cancelled = true;
        }
    }

    pub(crate) fn into_status(self) -> ResultStatus {
        if self.failed {
            ResultStatus::Failed
        } else if self.cancelled {
            ResultStatus::Cancelled
        } else {
            ResultStatus::Successful
        }
    }
}

/// Retira de `pending` los hijos ya terminados y fusiona sus outputs como
/// una tanda (una época de merge). Un conflicto marca la lista como fallida.
pub(crate) fn settle_terminal(step: &Arc<BuildStep>,
                              aggregate: &AggregateState,
                              pending: &mut Vec<Arc<BuildStep>>,
                              fold: &mut StatusFold) {
    let mut batch = Vec::new();
    let mut index = 0;
    while index < pending.len() {
        if pending[index].status().is_terminal() {
            batch.push(pending.swap_remove(index));
        } else {
            index += 1;
        }
    }
    if batch.is_empty() {
        return;
    }
    for child in &batch {
        fold.observe(child.status());
    }
    if let Err(err) = aggregate.merge_children(&batch) {
        step.logger().error(format!("output merge failed: {}", err));
        fold.failed = true;
    }
}

/// Espera a que todo lo pendiente termine, fusionando tanda a tanda.
pub(crate) async fn drain_pending(step: &Arc<BuildStep>,
                                  aggregate: &AggregateState,
                                  pending: &mut Vec<Arc<BuildStep>>,
                                  fold: &mut StatusFold) {
    while !pending.is_empty() {
        AwaitAny::new(pending).await;
        settle_terminal(step, aggregate, pending, fold);
    }
}

pub(crate) async fn execute_list(ctx: &Arc<ExecuteContext>,
                                 step: &Arc<BuildStep>,
                                 list: &ListStep)
                                 -> ResultStatus {
    list.seal();
    let children = list.children_snapshot();
    generate_dependencies(&children);

    let mut fold = StatusFold::default();
    let mut pending: Vec<Arc<BuildStep>> = Vec::new();

    for child in children {
        if child.is_wait() {
            // Barrera: todo lo agendado antes termina acá
            drain_pending(step, list.aggregate(), &mut pending, &mut fold).await;
            let _ = child.set_parent(Arc::downgrade(step));
            child.resolve(ResultStatus::Successful);
            continue;
        }
        match ctx.schedule_step(Some(step), &child) {
            Ok(()) => pending.push(child),
            Err(err) => {
                step.logger().error(format!("cannot schedule `{}`: {}", child.title(), err));
                fold.failed = true;
            }
        }
    }

    drain_pending(step, list.aggregate(), &mut pending, &mut fold).await;
    fold.into_status()
}

/// Traza aristas productor → consumidor por ubicación de contenido: cada
/// input `Content` de un comando se ata al comando del subárbol que declara
/// esa url como su output location.
fn generate_dependencies(children: &[Arc<BuildStep>]) {
    let mut commands = Vec::new();
    for child in children {
        child.collect_command_steps(&mut commands);
    }

    let mut producers = HashMap::new();
    for command in &commands {
        if let Some(url) = command.output_location() {
            producers.insert(url, command.clone());
        }
    }

    for consumer in &commands {
        let Some(slot) = consumer.as_command() else {
            continue;
        };
        for url in slot.command().input_files() {
            if url.url_type != UrlType::Content {
                continue;
            }
            if let Some(producer) = producers.get(&url) {
                if !Arc::ptr_eq(producer, consumer) {
                    consumer.add_prerequisite(producer.clone());
                }
            }
        }
    }
}
