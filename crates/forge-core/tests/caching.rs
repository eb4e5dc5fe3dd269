mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use forge_core::command::{Command, CommandContext};
use forge_core::errors::BuildError;
use forge_core::hashing::HashSerializer;
use forge_core::model::RemoteCommandSpec;
use forge_core::sched::CancellationToken;
use forge_core::store::{ContentStore, IndexMap, InMemoryContentStore, InMemoryIndexMap,
                        InMemoryResultStore};
use forge_core::{BuildResultCode, BuildStep, Builder, Mode, ObjectUrl, ResultStatus};

use common::{test_registry, TestCommand};

fn stores() -> (Arc<InMemoryContentStore>, Arc<InMemoryResultStore>, Arc<InMemoryIndexMap>) {
    (Arc::new(InMemoryContentStore::new()),
     Arc::new(InMemoryResultStore::new()),
     Arc::new(InMemoryIndexMap::new()))
}

fn pipeline(builder: &Builder, producer_runs: &Arc<AtomicUsize>, consumer_runs: &Arc<AtomicUsize>) {
    let producer = TestCommand::new("producer", "hello").with_output(ObjectUrl::content("data"))
                                                        .counted(producer_runs.clone());
    let consumer = TestCommand::new("consumer", "got:")
        .with_input(ObjectUrl::content("data"))
        .with_output(ObjectUrl::content_link("final"))
        .counted(consumer_runs.clone());
    builder.root().add_child(BuildStep::command(Box::new(producer))).unwrap();
    builder.root().add_child(BuildStep::command(Box::new(consumer))).unwrap();
}

#[test]
fn unchanged_commands_do_not_rerun() {
    let (content, results, index) = stores();
    let producer_runs = Arc::new(AtomicUsize::new(0));
    let consumer_runs = Arc::new(AtomicUsize::new(0));

    let first = Builder::new("run-1", content.clone(), results.clone(), index.clone());
    pipeline(&first, &producer_runs, &consumer_runs);
    assert_eq!(first.run(Mode::Build).unwrap(), BuildResultCode::Successful);
    assert_eq!(producer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(consumer_runs.load(Ordering::SeqCst), 1);

    let second = Builder::new("run-2", content.clone(), results, index.clone());
    pipeline(&second, &producer_runs, &consumer_runs);
    assert_eq!(second.run(Mode::Build).unwrap(), BuildResultCode::Successful);

    // Nada cambió: ambos comandos salen de la cache
    assert_eq!(producer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(consumer_runs.load(Ordering::SeqCst), 1);
    let id = index.get("final").unwrap();
    assert_eq!(content.get(&id).unwrap(), b"got:hello");
}

#[test]
fn changed_file_input_invalidates_cache() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("source.txt");
    std::fs::write(&input, "v1").unwrap();
    let input_url = ObjectUrl::file(input.to_string_lossy());

    let (content, results, index) = stores();
    let runs = Arc::new(AtomicUsize::new(0));

    let build = |name: &str| {
        let builder = Builder::new(name, content.clone(), results.clone(), index.clone());
        let command = TestCommand::new("hasher", "p").counted(runs.clone())
                                                     .with_input(input_url.clone());
        builder.root().add_child(BuildStep::command(Box::new(command))).unwrap();
        builder.run(Mode::Build).unwrap()
    };

    assert_eq!(build("run-1"), BuildResultCode::Successful);
    assert_eq!(build("run-2"), BuildResultCode::Successful);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    std::fs::write(&input, "v2 something longer").unwrap();
    assert_eq!(build("run-3"), BuildResultCode::Successful);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn identical_concurrent_commands_collapse_to_one_execution() {
    let (content, results, index) = stores();
    let mut builder = Builder::new("single-flight", content, results, index);
    builder.set_thread_count(2);
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let command = TestCommand::new("dup", "same").with_output(ObjectUrl::content("dup"))
                                                     .yielding()
                                                     .counted(runs.clone());
        builder.root().add_child(BuildStep::command(Box::new(command))).unwrap();
    }

    assert_eq!(builder.run(Mode::Build).unwrap(), BuildResultCode::Successful);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Comando que spawnea un `TestCommand` hijo durante su ejecución.
struct Spawner {
    runs: Arc<AtomicUsize>,
    child_runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Command for Spawner {
    fn kind(&self) -> &'static str {
        "spawner"
    }

    fn title(&self) -> String {
        "spawner".into()
    }

    fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
        serializer.write_str("spawner");
        Ok(())
    }

    fn remote_spec(&self) -> Option<RemoteCommandSpec> {
        Some(RemoteCommandSpec::new("spawner", json!({})))
    }

    async fn execute(&self,
                     context: &mut dyn CommandContext,
                     _token: &CancellationToken)
                     -> Result<ResultStatus, BuildError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let child = TestCommand::new("spawned", "s").with_output(ObjectUrl::content_link("spawned"))
                                                    .counted(self.child_runs.clone());
        let status = context.schedule_and_await_command(Box::new(child)).await;
        Ok(status)
    }

    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(Spawner { runs: self.runs.clone(), child_runs: self.child_runs.clone() })
    }
}

#[test]
fn cache_hit_replays_spawned_commands() {
    let (content, results, index) = stores();
    let spawner_runs = Arc::new(AtomicUsize::new(0));
    let child_runs = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(test_registry(child_runs.clone()));

    let build = |name: &str| {
        let mut builder = Builder::new(name, content.clone(), results.clone(), index.clone());
        builder.set_registry(registry.clone());
        let spawner = Spawner { runs: spawner_runs.clone(), child_runs: child_runs.clone() };
        builder.root().add_child(BuildStep::command(Box::new(spawner))).unwrap();
        builder.run(Mode::Build).unwrap()
    };

    assert_eq!(build("run-1"), BuildResultCode::Successful);
    assert_eq!(spawner_runs.load(Ordering::SeqCst), 1);
    assert_eq!(child_runs.load(Ordering::SeqCst), 1);

    assert_eq!(build("run-2"), BuildResultCode::Successful);
    // El spawner sale de cache; su spawn se replica y también acierta cache
    assert_eq!(spawner_runs.load(Ordering::SeqCst), 1);
    assert_eq!(child_runs.load(Ordering::SeqCst), 1);
    assert!(index.get("spawned").is_some());
}

#[test]
fn clean_recurses_into_spawned_commands() {
    let (content, results, index) = stores();
    let spawner_runs = Arc::new(AtomicUsize::new(0));
    let child_runs = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(test_registry(child_runs.clone()));

    let run = |name: &str, mode: Mode| {
        let mut builder = Builder::new(name, content.clone(), results.clone(), index.clone());
        builder.set_registry(registry.clone());
        let spawner = Spawner { runs: spawner_runs.clone(), child_runs: child_runs.clone() };
        builder.root().add_child(BuildStep::command(Box::new(spawner))).unwrap();
        builder.run(mode).unwrap()
    };

    assert_eq!(run("build-1", Mode::Build), BuildResultCode::Successful);
    assert_eq!(spawner_runs.load(Ordering::SeqCst), 1);
    assert_eq!(child_runs.load(Ordering::SeqCst), 1);

    assert_eq!(run("clean", Mode::Clean), BuildResultCode::Successful);

    // Si la cache del spawn sobreviviera al clean, el hijo se replicaría
    // desde ahí en vez de volver a correr
    assert_eq!(run("build-2", Mode::Build), BuildResultCode::Successful);
    assert_eq!(spawner_runs.load(Ordering::SeqCst), 2);
    assert_eq!(child_runs.load(Ordering::SeqCst), 2);
}

#[test]
fn clean_drops_cached_results() {
    let (content, results, index) = stores();
    let runs = Arc::new(AtomicUsize::new(0));

    let build = |name: &str, mode: Mode| {
        let builder = Builder::new(name, content.clone(), results.clone(), index.clone());
        let command = TestCommand::new("solo", "x").with_output(ObjectUrl::content_link("solo"))
                                                   .counted(runs.clone());
        builder.root().add_child(BuildStep::command(Box::new(command))).unwrap();
        builder.run(mode).unwrap()
    };

    assert_eq!(build("build-1", Mode::Build), BuildResultCode::Successful);
    assert_eq!(build("clean", Mode::Clean), BuildResultCode::Successful);
    assert_eq!(build("build-2", Mode::Build), BuildResultCode::Successful);
    // La cache fue purgada: el comando volvió a correr
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn clean_and_delete_also_removes_outputs() {
    let (content, results, index) = stores();
    let runs = Arc::new(AtomicUsize::new(0));

    let build = |name: &str, mode: Mode| {
        let builder = Builder::new(name, content.clone(), results.clone(), index.clone());
        let command = TestCommand::new("solo", "x").with_output(ObjectUrl::content_link("solo"))
                                                   .counted(runs.clone());
        builder.root().add_child(BuildStep::command(Box::new(command))).unwrap();
        builder.run(mode).unwrap()
    };

    assert_eq!(build("build", Mode::Build), BuildResultCode::Successful);
    let id = index.get("solo").unwrap();
    assert!(content.get(&id).is_some());

    assert_eq!(build("deep-clean", Mode::CleanAndDelete), BuildResultCode::Successful);
    assert!(content.get(&id).is_none());
    assert!(index.get("solo").is_none());
}
