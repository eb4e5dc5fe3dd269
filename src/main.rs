//! Binario de demostración del orquestador.
//!
//! Arma un pipeline chico (dos productores y un concatenador), lo corre
//! contra stores en disco y deja el resultado en el índice. Corrido dos
//! veces sin cambios, la segunda vuelta sale entera de la cache. Con
//! `--worker` el mismo binario actúa como proceso worker del canal remoto;
//! con `FORGE_REMOTE=1` el concatenador pide ejecutarse en uno.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;

use forge_core::command::{Command, CommandContext, CommandRegistry};
use forge_core::errors::BuildError;
use forge_core::hashing::HashSerializer;
use forge_core::model::RemoteCommandSpec;
use forge_core::sched::CancellationToken;
use forge_core::step::ResultStatus;
use forge_core::store::{ContentStore, FileContentStore, FileIndexMap, FileResultStore, IndexMap};
use forge_core::{BuildResultCode, BuildStep, Builder, Mode, ObjectUrl};
use forge_remote::{run_slave, RemoteCommandHost};

/// Logger plano a stderr; `FORGE_LOG=debug` sube el nivel.
struct StderrLogger {
    level: log::LevelFilter,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{:<5} [{}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging() {
    let level = match std::env::var("FORGE_LOG").as_deref() {
        Ok("debug") => log::LevelFilter::Debug,
        Ok("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    let _ = log::set_boxed_logger(Box::new(StderrLogger { level }));
    log::set_max_level(level);
}

/// Publica un texto fijo bajo una url de contenido.
struct EmitCommand {
    name: String,
    text: String,
    output: ObjectUrl,
}

#[async_trait]
impl Command for EmitCommand {
    fn kind(&self) -> &'static str {
        "emit"
    }

    fn title(&self) -> String {
        format!("emit {}", self.name)
    }

    fn output_location(&self) -> Option<ObjectUrl> {
        Some(self.output.clone())
    }

    fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
        serializer.write_str(&self.name);
        serializer.write_str(&self.text);
        Ok(())
    }

    fn remote_spec(&self) -> Option<RemoteCommandSpec> {
        Some(RemoteCommandSpec::new("emit",
                                    serde_json::json!({
                                        "name": self.name,
                                        "text": self.text,
                                        "output": self.output,
                                    })))
    }

    async fn execute(&self,
                     context: &mut dyn CommandContext,
                     _token: &CancellationToken)
                     -> Result<ResultStatus, BuildError> {
        let id = context.content_store().put(self.text.as_bytes())?;
        context.register_output(self.output.clone(), id);
        context.logger().info(format!("emitted {} bytes", self.text.len()));
        Ok(ResultStatus::Successful)
    }

    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(EmitCommand { name: self.name.clone(),
                               text: self.text.clone(),
                               output: self.output.clone() })
    }
}

/// Concatena el contenido de sus inputs, separados por espacio.
struct ConcatCommand {
    inputs: Vec<ObjectUrl>,
    output: ObjectUrl,
}

#[async_trait]
impl Command for ConcatCommand {
    fn kind(&self) -> &'static str {
        "concat"
    }

    fn title(&self) -> String {
        format!("concat -> {}", self.output)
    }

    fn input_files(&self) -> Vec<ObjectUrl> {
        self.inputs.clone()
    }

    fn output_location(&self) -> Option<ObjectUrl> {
        Some(self.output.clone())
    }

    fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
        serializer.write_str("concat");
        Ok(())
    }

    fn should_spawn_new_process(&self) -> bool {
        std::env::var_os("FORGE_REMOTE").is_some()
    }

    fn remote_spec(&self) -> Option<RemoteCommandSpec> {
        Some(RemoteCommandSpec::new("concat",
                                    serde_json::json!({
                                        "inputs": self.inputs,
                                        "output": self.output,
                                    })))
    }

    async fn execute(&self,
                     context: &mut dyn CommandContext,
                     _token: &CancellationToken)
                     -> Result<ResultStatus, BuildError> {
        let mut pieces = Vec::new();
        for input in &self.inputs {
            let id = context.resolve_content_id(input)
                            .ok_or_else(|| BuildError::Internal(format!("{} unresolved", input)))?;
            let bytes = context.content_store()
                               .get(&id)
                               .ok_or_else(|| BuildError::Internal(format!("{} missing", input)))?;
            pieces.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        let joined = pieces.join(" ");
        let id = context.content_store().put(joined.as_bytes())?;
        context.register_output(self.output.clone(), id);
        Ok(ResultStatus::Successful)
    }

    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(ConcatCommand { inputs: self.inputs.clone(), output: self.output.clone() })
    }
}

fn demo_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register("emit", |params| {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let text = params["text"].as_str().unwrap_or_default().to_string();
                let output = serde_json::from_value(params["output"].clone())?;
                Ok(Box::new(EmitCommand { name, text, output }))
            });
    registry.register("concat", |params| {
                let inputs = serde_json::from_value(params["inputs"].clone())?;
                let output = serde_json::from_value(params["output"].clone())?;
                Ok(Box::new(ConcatCommand { inputs, output }))
            });
    registry
}

fn build_graph(builder: &Builder) -> Result<(), BuildError> {
    let greeting = EmitCommand { name: "greeting".into(),
                                 text: "hola".into(),
                                 output: ObjectUrl::content("demo/greeting") };
    let subject = EmitCommand { name: "subject".into(),
                                text: "mundo".into(),
                                output: ObjectUrl::content("demo/subject") };
    let message = ConcatCommand { inputs: vec![ObjectUrl::content("demo/greeting"),
                                               ObjectUrl::content("demo/subject")],
                                  output: ObjectUrl::content_link("demo/message") };
    builder.root().add_child(BuildStep::command(Box::new(greeting)))?;
    builder.root().add_child(BuildStep::command(Box::new(subject)))?;
    builder.root().add_child(BuildStep::command(Box::new(message)))?;
    Ok(())
}

fn run_demo(database: PathBuf, mode: Mode) -> Result<BuildResultCode, BuildError> {
    let content = Arc::new(FileContentStore::new(&database)?);
    let results = Arc::new(FileResultStore::new(database.join("results"))?);
    let index = Arc::new(FileIndexMap::open(database.join("index.json"))?);

    let mut builder = Builder::new("demo", content.clone(), results, index.clone());
    builder.set_database_path(&database);
    builder.set_registry(Arc::new(demo_registry()));
    if let Ok(me) = std::env::current_exe() {
        let host = RemoteCommandHost::new(me).with_args(vec!["--worker".into()]);
        builder.set_remote(Arc::new(host));
    }
    build_graph(&builder)?;

    let code = builder.run(mode)?;
    if code == BuildResultCode::Successful && mode == Mode::Build {
        if let Some(bytes) = index.get("demo/message").and_then(|id| content.get(&id)) {
            println!("demo/message = {}", String::from_utf8_lossy(&bytes));
        }
    }
    Ok(code)
}

fn main() -> ExitCode {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--worker") {
        let registry = demo_registry();
        return match run_slave(&registry) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                log::error!(target: "forge", "worker failed: {}", err);
                ExitCode::FAILURE
            }
        };
    }

    let mode = if args.iter().any(|a| a == "--purge") {
        Mode::CleanAndDelete
    } else if args.iter().any(|a| a == "--clean") {
        Mode::Clean
    } else {
        Mode::Build
    };
    let database = args.iter()
                       .position(|a| a == "--database")
                       .and_then(|i| args.get(i + 1))
                       .map(PathBuf::from)
                       .unwrap_or_else(|| std::env::temp_dir().join("forge-demo"));

    match run_demo(database, mode) {
        Ok(BuildResultCode::Successful) => ExitCode::SUCCESS,
        Ok(code) => {
            log::error!(target: "forge", "build ended with {:?}", code);
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!(target: "forge", "fatal: {}", err);
            ExitCode::FAILURE
        }
    }
}
