use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::command::{compute_command_hash, Command, CommandRegistry, RemoteExecutor};
use crate::constants::{EXPECTED_VERSION, VERSION_FILE_NAME};
use crate::errors::BuildError;
use crate::model::{ObjectId, ObjectUrl, UrlType};
use crate::sched::{CancellationToken, Scheduler};
use crate::step::{BuildStep, ResultStatus};
use crate::store::{ContentStore, FileVersionTracker, IndexMap, InMemoryContentStore,
                   InMemoryIndexMap, InMemoryResultStore, ResultStore};

use super::context::BuilderContext;
use super::execute_context::ExecuteContext;

/// Qué hacer con el grafo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ejecutar los steps, con cache incremental.
    Build,
    /// Borrar los resultados cacheados de los comandos del grafo.
    Clean,
    /// Como `Clean`, y además borrar sus outputs del content store y del índice.
    CleanAndDelete,
}

/// Resultado global de un run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResultCode {
    Successful,
    BuildError,
    Cancelled,
}

/// Punto de entrada del orquestador.
///
/// Se arma el grafo colgando steps del `root()`, se configura registro,
/// stores y canal remoto, y se llama `run`. Un `Builder` ejecuta su grafo
/// una sola vez: los steps quedan resueltos y un segundo `run` es error.
pub struct Builder {
    name: String,
    threads: usize,
    max_processes: usize,
    database_path: Option<PathBuf>,
    content_store: Arc<dyn ContentStore>,
    result_store: Arc<dyn ResultStore>,
    index: Arc<dyn IndexMap>,
    registry: Arc<CommandRegistry>,
    remote: Option<Arc<dyn RemoteExecutor>>,
    root: Arc<BuildStep>,
    token: CancellationToken,
    ran: AtomicBool,
}

impl Builder {
    pub fn new(name: impl Into<String>,
               content_store: Arc<dyn ContentStore>,
               result_store: Arc<dyn ResultStore>,
               index: Arc<dyn IndexMap>)
               -> Self {
        let name = name.into();
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self { root: BuildStep::list(name.clone()),
               name,
               threads,
               max_processes: threads,
               database_path: None,
               content_store,
               result_store,
               index,
               registry: Arc::new(CommandRegistry::new()),
               remote: None,
               token: CancellationToken::new(),
               ran: AtomicBool::new(false) }
    }

    /// Builder efímero con stores en memoria.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name,
                  Arc::new(InMemoryContentStore::new()),
                  Arc::new(InMemoryResultStore::new()),
                  Arc::new(InMemoryIndexMap::new()))
    }

    pub fn set_thread_count(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    pub fn set_max_processes(&mut self, max: usize) {
        self.max_processes = max.max(1);
    }

    /// Directorio de base de datos para el chequeo de versión previo al run.
    pub fn set_database_path(&mut self, path: impl Into<PathBuf>) {
        self.database_path = Some(path.into());
    }

    pub fn set_registry(&mut self, registry: Arc<CommandRegistry>) {
        self.registry = registry;
    }

    pub fn set_remote(&mut self, remote: Arc<dyn RemoteExecutor>) {
        self.remote = Some(remote);
    }

    /// Lista raíz del grafo; los steps se cuelgan de acá antes de `run`.
    pub fn root(&self) -> &Arc<BuildStep> {
        &self.root
    }

    /// Token compartido del run; cancelarlo corta el build cooperativamente.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn run(&self, mode: Mode) -> Result<BuildResultCode, BuildError> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(BuildError::AlreadyRunning);
        }
        log::info!(target: "forge", "{} starting ({:?})", self.name, mode);
        let result = match mode {
            Mode::Build => self.run_build(),
            Mode::Clean | Mode::CleanAndDelete => self.run_clean(mode),
        };
        match &result {
            Ok(code) => log::info!(target: "forge", "{} finished: {:?}", self.name, code),
            Err(err) => log::error!(target: "forge", "{} aborted: {}", self.name, err),
        }
        result
    }

    fn run_build(&self) -> Result<BuildResultCode, BuildError> {
        self.check_database_version()?;

        let scheduler = Scheduler::new();
        let builder_context = Arc::new(BuilderContext::new(self.registry.clone(),
                                                           self.remote.clone(),
                                                           self.max_processes));
        let ctx = Arc::new(ExecuteContext::new(scheduler.clone(),
                                               self.token.clone(),
                                               builder_context,
                                               self.content_store.clone(),
                                               self.result_store.clone(),
                                               self.index.clone()));
        ctx.schedule_step(None, &self.root)?;

        std::thread::scope(|scope| {
            for _ in 0..self.threads {
                let scheduler = scheduler.clone();
                scope.spawn(move || loop {
                    scheduler.run();
                    if scheduler.live_count() == 0 {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                });
            }
        });

        let status = self.root.status();
        let conflicts = ctx.io_monitor().error_count();
        log::info!(target: "forge", "{}: {}", self.name, ctx.counter().summary());
        if conflicts > 0 {
            log::error!(target: "forge", "{}: {} I/O conflicts detected", self.name, conflicts);
        }

        if self.token.is_cancelled() || status == ResultStatus::Cancelled {
            return Ok(BuildResultCode::Cancelled);
        }
        if status.failed() || conflicts > 0 {
            return Ok(BuildResultCode::BuildError);
        }
        // El índice durable sólo se toca al final de un run exitoso
        ctx.transaction().merge_into_index();
        self.index.save()?;
        Ok(BuildResultCode::Successful)
    }

    /// Si la base de datos viene de un formato anterior, se purga entera:
    /// cache y contenido viejos no son interpretables y sólo ocupan espacio.
    fn check_database_version(&self) -> Result<(), BuildError> {
        let Some(dir) = &self.database_path else {
            return Ok(());
        };
        let version_file = dir.join(VERSION_FILE_NAME);
        let current = std::fs::read_to_string(&version_file)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        if current == Some(EXPECTED_VERSION) {
            return Ok(());
        }

        log::info!(target: "forge",
                   "database version {:?} != {}, purging stale content",
                   current, EXPECTED_VERSION);
        for id in self.content_store.enumerate() {
            self.content_store.delete(&id)?;
        }
        self.index.clear();
        self.index.save()?;
        std::fs::create_dir_all(dir)?;
        std::fs::write(&version_file, EXPECTED_VERSION.to_string())?;
        Ok(())
    }

    fn run_clean(&self, mode: Mode) -> Result<BuildResultCode, BuildError> {
        let versions = FileVersionTracker::new();
        let resolver = |url: &ObjectUrl| match url.url_type {
            UrlType::File => versions.compute_file_hash(Path::new(&url.path)).unwrap_or(ObjectId::EMPTY),
            _ => self.index.get(&url.path).unwrap_or(ObjectId::EMPTY),
        };

        let mut steps = Vec::new();
        self.root.collect_command_steps(&mut steps);

        let mut visited = HashSet::new();
        let mut cleaned = 0usize;
        for step in steps {
            let Some(slot) = step.as_command() else {
                continue;
            };
            self.clean_command(slot.command(), &resolver, mode, &mut visited, &mut cleaned)?;
        }

        if mode == Mode::CleanAndDelete {
            self.index.save()?;
        }
        log::info!(target: "forge", "{}: cleaned {} cached command results", self.name, cleaned);
        Ok(BuildResultCode::Successful)
    }

    /// Limpia la cache de un comando y, recursivamente, la de todo comando
    /// que sus entradas registren como spawneado.
    fn clean_command<F>(&self,
                        command: &dyn Command,
                        resolver: &F,
                        mode: Mode,
                        visited: &mut HashSet<ObjectId>,
                        cleaned: &mut usize)
                        -> Result<(), BuildError>
        where F: Fn(&ObjectUrl) -> ObjectId
    {
        let hash = match compute_command_hash(command, resolver) {
            Ok((hash, _)) => hash,
            Err(err) => {
                log::warn!(target: "forge", "skipping `{}`: {}", command.title(), err);
                return Ok(());
            }
        };
        if !visited.insert(hash) {
            return Ok(());
        }

        let entries = self.result_store.load(&hash);
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &entries {
            if mode == Mode::CleanAndDelete {
                for (url, id) in &entry.output_objects {
                    if let Err(err) = self.content_store.delete(id) {
                        log::warn!(target: "forge", "cannot delete {}: {}", url, err);
                    }
                    if url.url_type == UrlType::ContentLink {
                        self.index.remove(&url.path);
                    }
                }
            }
            for spec in &entry.spawned_commands {
                match self.registry.create(spec) {
                    Ok(spawned) => {
                        self.clean_command(spawned.as_ref(), resolver, mode, visited, cleaned)?
                    }
                    Err(err) => {
                        log::warn!(target: "forge", "cannot clean a spawn of `{}`: {}",
                                   entry.command_title, err)
                    }
                }
            }
        }
        self.result_store.delete(&hash)?;
        *cleaned += 1;
        Ok(())
    }
}
