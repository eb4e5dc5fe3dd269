use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::BuildError;
use crate::model::{InputObject, ObjectId, ObjectUrl, OutputObject, UrlType};

use super::build_step::{BuildStep, StepKind};
use super::status::ResultStatus;

/// Estado de merge de un step agregador (lista o dinámico).
///
/// Cada tanda de hijos terminados se fusiona bajo una misma época
/// (`merge_counter`). Los chequeos de conflicto sólo aplican dentro de una
/// época: dos productores de la misma url fusionados en tandas distintas son
/// una sobreescritura secuencial legítima (gana el más nuevo); dentro de la
/// misma tanda son escrituras concurrentes y se rechazan.
#[derive(Default)]
pub struct AggregateState {
    inner: Mutex<AggregateInner>,
}

#[derive(Default)]
struct AggregateInner {
    merge_counter: u32,
    inputs: HashMap<ObjectUrl, InputObject>,
    outputs: HashMap<ObjectUrl, OutputObject>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resuelve una url contra los outputs ya fusionados.
    pub fn resolve(&self, url: &ObjectUrl) -> Option<ObjectId> {
        self.inner.lock().expect("aggregate poisoned").outputs.get(url).map(|o| o.object_id)
    }

    pub fn outputs(&self) -> Vec<OutputObject> {
        self.inner.lock().expect("aggregate poisoned").outputs.values().cloned().collect()
    }

    pub fn inputs(&self) -> Vec<(ObjectUrl, InputObject)> {
        self.inner
            .lock()
            .expect("aggregate poisoned")
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Fusiona una tanda de hijos terminados bajo una única época nueva.
    ///
    /// Sólo los hijos exitosos aportan objetos; el resto se ignora acá (el
    /// caller ya plegó su status). El primer conflicto corta el merge.
    pub fn merge_children(&self, children: &[Arc<BuildStep>]) -> Result<(), BuildError> {
        let mut inner = self.inner.lock().expect("aggregate poisoned");
        inner.merge_counter += 1;
        let epoch = inner.merge_counter;

        for child in children {
            let status = child.status();
            if !matches!(status,
                         ResultStatus::Successful | ResultStatus::NotTriggeredWasSuccessful)
            {
                continue;
            }
            merge_one(&mut inner, epoch, child)?;
        }
        Ok(())
    }
}

fn merge_one(inner: &mut AggregateInner, epoch: u32, child: &Arc<BuildStep>) -> Result<(), BuildError> {
    let producer = child.execution_id().unwrap_or(0);
    let title = child.title().to_string();

    match child.kind() {
        StepKind::Command(slot) => {
            let Some(entry) = slot.result() else {
                return Ok(());
            };
            for url in entry.input_dependency_versions.keys() {
                if url.url_type == UrlType::File {
                    continue;
                }
                check_and_add_input(inner,
                                    url.clone(),
                                    InputObject { producer,
                                                  command_title: title.clone(),
                                                  counter: epoch })?;
            }
            for (url, id) in &entry.output_objects {
                let mut object = OutputObject::new(url.clone(), *id, producer, title.clone(), epoch);
                if let Some(tags) = entry.tags.get(url) {
                    object.tags = tags.clone();
                }
                check_and_add_output(inner, object)?;
            }
        }
        StepKind::List(_) | StepKind::Dynamic(_) => {
            let Some(aggregate) = child.aggregate() else {
                return Ok(());
            };
            for (url, mut input) in aggregate.inputs() {
                input.counter = epoch;
                check_and_add_input(inner, url, input)?;
            }
            for mut object in aggregate.outputs() {
                object.counter = epoch;
                check_and_add_output(inner, object)?;
            }
        }
        StepKind::Wait => {}
    }
    Ok(())
}

fn check_and_add_input(inner: &mut AggregateInner,
                       url: ObjectUrl,
                       input: InputObject)
                       -> Result<(), BuildError> {
    if let Some(writer) = inner.outputs.get(&url) {
        if writer.counter == input.counter && writer.producer != input.producer {
            return Err(BuildError::ReadWriteConflict { writer: writer.command_title.clone(),
                                                       reader: input.command_title.clone(),
                                                       url });
        }
    }
    inner.inputs.insert(url, input);
    Ok(())
}

fn check_and_add_output(inner: &mut AggregateInner, object: OutputObject) -> Result<(), BuildError> {
    if let Some(reader) = inner.inputs.get(&object.url) {
        if reader.counter == object.counter && reader.producer != object.producer {
            return Err(BuildError::ReadWriteConflict { writer: object.command_title.clone(),
                                                       reader: reader.command_title.clone(),
                                                       url: object.url });
        }
    }
    if let Some(existing) = inner.outputs.get(&object.url) {
        if existing.counter == object.counter
           && existing.producer != object.producer
           && existing.object_id != object.object_id
        {
            return Err(BuildError::DivergentWrite { first: existing.command_title.clone(),
                                                    second: object.command_title.clone(),
                                                    url: object.url });
        }
    }
    inner.outputs.insert(object.url.clone(), object);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandContext};
    use crate::hashing::HashSerializer;
    use crate::model::CommandResultEntry;
    use crate::sched::CancellationToken;
    use async_trait::async_trait;

    struct Dummy(String);

    #[async_trait]
    impl Command for Dummy {
        fn kind(&self) -> &'static str {
            "dummy"
        }

        fn title(&self) -> String {
            self.0.clone()
        }

        fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
            serializer.write_str(&self.0);
            Ok(())
        }

        async fn execute(&self,
                         _context: &mut dyn CommandContext,
                         _token: &CancellationToken)
                         -> Result<ResultStatus, BuildError> {
            Ok(ResultStatus::Successful)
        }

        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(Dummy(self.0.clone()))
        }
    }

    fn finished_producer(name: &str, execution: u64, url: ObjectUrl, id: ObjectId) -> Arc<BuildStep> {
        let step = BuildStep::command(Box::new(Dummy(name.into())));
        step.set_execution_id(execution);
        let mut entry = CommandResultEntry::new(name);
        entry.output_objects.insert(url, id);
        step.as_command().unwrap().set_result(entry);
        step.resolve(ResultStatus::Successful);
        step
    }

    #[test]
    fn sequential_merges_overwrite_silently() {
        let aggregate = AggregateState::new();
        let url = ObjectUrl::content("asset");
        let first = finished_producer("first", 1, url.clone(), ObjectId::new(b"v1"));
        let second = finished_producer("second", 2, url.clone(), ObjectId::new(b"v2"));

        aggregate.merge_children(&[first]).unwrap();
        aggregate.merge_children(&[second]).unwrap();
        assert_eq!(aggregate.resolve(&url), Some(ObjectId::new(b"v2")));
    }

    #[test]
    fn same_batch_divergent_writes_conflict() {
        let aggregate = AggregateState::new();
        let url = ObjectUrl::content("asset");
        let first = finished_producer("first", 1, url.clone(), ObjectId::new(b"v1"));
        let second = finished_producer("second", 2, url.clone(), ObjectId::new(b"v2"));

        let err = aggregate.merge_children(&[first, second]).unwrap_err();
        assert!(matches!(err, BuildError::DivergentWrite { .. }));
    }

    #[test]
    fn same_batch_identical_writes_are_allowed() {
        let aggregate = AggregateState::new();
        let url = ObjectUrl::content("asset");
        let first = finished_producer("first", 1, url.clone(), ObjectId::new(b"same"));
        let second = finished_producer("second", 2, url.clone(), ObjectId::new(b"same"));

        aggregate.merge_children(&[first, second]).unwrap();
        assert_eq!(aggregate.resolve(&url), Some(ObjectId::new(b"same")));
    }

    #[test]
    fn same_batch_read_write_conflicts() {
        let aggregate = AggregateState::new();
        let url = ObjectUrl::content("asset");

        let reader = BuildStep::command(Box::new(Dummy("reader".into())));
        reader.set_execution_id(1);
        let mut entry = CommandResultEntry::new("reader");
        entry.input_dependency_versions.insert(url.clone(), ObjectId::new(b"seen"));
        reader.as_command().unwrap().set_result(entry);
        reader.resolve(ResultStatus::Successful);

        let writer = finished_producer("writer", 2, url.clone(), ObjectId::new(b"new"));

        let err = aggregate.merge_children(&[reader, writer]).unwrap_err();
        assert!(matches!(err, BuildError::ReadWriteConflict { .. }));
    }

    #[test]
    fn failed_children_contribute_nothing() {
        let aggregate = AggregateState::new();
        let step = BuildStep::command(Box::new(Dummy("broken".into())));
        step.set_execution_id(1);
        step.resolve(ResultStatus::Failed);
        aggregate.merge_children(&[step]).unwrap();
        assert!(aggregate.outputs().is_empty());
    }
}
