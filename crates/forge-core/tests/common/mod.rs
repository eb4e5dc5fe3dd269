use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use forge_core::command::{Command, CommandContext, CommandRegistry};
use forge_core::errors::BuildError;
use forge_core::hashing::HashSerializer;
use forge_core::model::{ObjectUrl, RemoteCommandSpec};
use forge_core::sched::{yield_now, CancellationToken};
use forge_core::step::ResultStatus;

/// Comando de prueba configurable: concatena su payload con el contenido de
/// sus inputs y lo publica en su output.
pub struct TestCommand {
    pub name: String,
    pub payload: String,
    pub inputs: Vec<ObjectUrl>,
    pub output: Option<ObjectUrl>,
    pub fail: bool,
    pub panic: bool,
    pub yield_once: bool,
    pub cancel: Option<CancellationToken>,
    pub runs: Arc<AtomicUsize>,
    pub trace: Option<Arc<Mutex<Vec<String>>>>,
    pub rendezvous: Option<(Arc<AtomicUsize>, usize)>,
}

impl TestCommand {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { name: name.into(),
               payload: payload.into(),
               inputs: Vec::new(),
               output: None,
               fail: false,
               panic: false,
               yield_once: false,
               cancel: None,
               runs: Arc::new(AtomicUsize::new(0)),
               trace: None,
               rendezvous: None }
    }

    pub fn with_input(mut self, url: ObjectUrl) -> Self {
        self.inputs.push(url);
        self
    }

    pub fn with_output(mut self, url: ObjectUrl) -> Self {
        self.output = Some(url);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn yielding(mut self) -> Self {
        self.yield_once = true;
        self
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn counted(mut self, runs: Arc<AtomicUsize>) -> Self {
        self.runs = runs;
        self
    }

    pub fn traced(mut self, trace: Arc<Mutex<Vec<String>>>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// El comando no avanza hasta que `expected` comandos del grupo hayan
    /// arrancado; garantiza intervalos de ejecución solapados.
    pub fn rendezvous(mut self, group: Arc<AtomicUsize>, expected: usize) -> Self {
        self.rendezvous = Some((group, expected));
        self
    }
}

#[async_trait]
impl Command for TestCommand {
    fn kind(&self) -> &'static str {
        "test"
    }

    fn title(&self) -> String {
        format!("test {}", self.name)
    }

    fn input_files(&self) -> Vec<ObjectUrl> {
        self.inputs.clone()
    }

    fn output_location(&self) -> Option<ObjectUrl> {
        self.output.clone()
    }

    fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
        serializer.write_str(&self.name);
        serializer.write_str(&self.payload);
        Ok(())
    }

    fn remote_spec(&self) -> Option<RemoteCommandSpec> {
        Some(RemoteCommandSpec::new("test",
                                    json!({
                                        "name": self.name,
                                        "payload": self.payload,
                                        "inputs": self.inputs,
                                        "output": self.output,
                                    })))
    }

    async fn execute(&self,
                     context: &mut dyn CommandContext,
                     _token: &CancellationToken)
                     -> Result<ResultStatus, BuildError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(trace) = &self.trace {
            trace.lock().unwrap().push(self.name.clone());
        }
        if self.yield_once {
            yield_now().await;
        }
        if let Some((group, expected)) = &self.rendezvous {
            group.fetch_add(1, Ordering::SeqCst);
            while group.load(Ordering::SeqCst) < *expected {
                yield_now().await;
            }
        }
        if let Some(token) = &self.cancel {
            token.cancel();
            return Ok(ResultStatus::Cancelled);
        }
        if self.panic {
            panic!("{} imploded", self.name);
        }
        if self.fail {
            return Err(BuildError::Internal(format!("{} exploded", self.name)));
        }

        let mut data = self.payload.clone().into_bytes();
        for input in &self.inputs {
            let id = context.resolve_content_id(input)
                            .ok_or_else(|| BuildError::Internal(format!("{} unresolved", input)))?;
            let bytes = context.content_store()
                               .get(&id)
                               .ok_or_else(|| BuildError::Internal(format!("{} missing", input)))?;
            data.extend_from_slice(&bytes);
        }
        if let Some(output) = &self.output {
            let id = context.content_store().put(&data)?;
            context.register_output(output.clone(), id);
        }
        Ok(ResultStatus::Successful)
    }

    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(TestCommand { name: self.name.clone(),
                               payload: self.payload.clone(),
                               inputs: self.inputs.clone(),
                               output: self.output.clone(),
                               fail: self.fail,
                               panic: self.panic,
                               yield_once: self.yield_once,
                               cancel: self.cancel.clone(),
                               runs: self.runs.clone(),
                               trace: self.trace.clone(),
                               rendezvous: self.rendezvous.clone() })
    }
}

/// Registro con la fábrica de `TestCommand`, para replays y workers.
pub fn test_registry(runs: Arc<AtomicUsize>) -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register("test", move |params| {
        let name = params["name"].as_str().unwrap_or_default().to_string();
        let payload = params["payload"].as_str().unwrap_or_default().to_string();
        let inputs: Vec<ObjectUrl> =
            serde_json::from_value(params["inputs"].clone()).unwrap_or_default();
        let output: Option<ObjectUrl> =
            serde_json::from_value(params["output"].clone()).unwrap_or_default();
        let mut command = TestCommand::new(name, payload).counted(runs.clone());
        command.inputs = inputs;
        command.output = output;
        Ok(Box::new(command))
    });
    registry
}
