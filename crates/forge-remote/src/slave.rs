//! Lado worker del canal: corre un comando contra el contexto del master.

use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use async_trait::async_trait;

use forge_core::command::{Command, CommandContext, CommandRegistry};
use forge_core::errors::BuildError;
use forge_core::model::{ObjectId, ObjectUrl, OutputObject, StepLogger, UrlType};
use forge_core::sched::CancellationToken;
use forge_core::step::ResultStatus;
use forge_core::store::{ContentStore, FileVersionTracker};

use crate::messages::{MasterReply, SlaveRequest};

/// Canal request/reply hacia el master. El mutex hace atómico cada par
/// escritura/lectura, así los round-trips nunca se entrelazan.
trait MasterLink: Send + Sync {
    fn request(&self, request: &SlaveRequest) -> Result<MasterReply, BuildError>;
}

struct Channel<R, W> {
    inner: Mutex<(W, R)>,
}

impl<R: BufRead + Send, W: Write + Send> MasterLink for Channel<R, W> {
    fn request(&self, request: &SlaveRequest) -> Result<MasterReply, BuildError> {
        let mut guard = self.inner.lock().expect("master channel poisoned");
        let (output, input) = &mut *guard;
        let line = serde_json::to_string(request)?;
        writeln!(output, "{}", line)?;
        output.flush()?;

        let mut reply = String::new();
        input.read_line(&mut reply)?;
        if reply.trim().is_empty() {
            return Err(BuildError::Internal("master channel closed".into()));
        }
        Ok(serde_json::from_str(reply.trim())?)
    }
}

/// Atiende una sesión de worker sobre stdin/stdout del proceso.
pub fn run_slave(registry: &CommandRegistry) -> Result<(), BuildError> {
    serve(registry, BufReader::new(std::io::stdin()), std::io::stdout())
}

/// Corre una sesión completa del protocolo sobre un par lectura/escritura.
///
/// Pide el comando, chequea cancelación, lo ejecuta contra un contexto que
/// delega todo en el master, reenvía los logs capturados y reporta el status
/// final. Los errores del comando se degradan a `Failed` acá: el master
/// nunca ve un worker "a medias".
pub fn serve<R, W>(registry: &CommandRegistry, input: R, output: W) -> Result<(), BuildError>
    where R: BufRead + Send + 'static,
          W: Write + Send + 'static
{
    let link: Arc<dyn MasterLink> = Arc::new(Channel { inner: Mutex::new((output, input)) });

    let MasterReply::Command { spec } = link.request(&SlaveRequest::FetchCommand)? else {
        return Err(BuildError::Internal("unexpected reply to FetchCommand".into()));
    };
    let command = registry.create(&spec)?;

    // La cancelación se observa al arrancar; un run cancelado descarta el
    // resultado del worker de todos modos
    let token = CancellationToken::new();
    if let MasterReply::Cancellation { cancelled: true } =
        link.request(&SlaveRequest::CheckCancellation)?
    {
        link.request(&SlaveRequest::Complete { status: ResultStatus::Cancelled })?;
        return Ok(());
    }

    let mut context = SlaveCommandContext::new(link.clone(), command.title());
    let status = match block_on(command.execute(&mut context, &token)) {
        Ok(status) => status,
        Err(err) => {
            context.logger.error(format!("command failed in worker: {}", err));
            ResultStatus::Failed
        }
    };

    for message in context.logger.messages() {
        link.request(&SlaveRequest::Log { message })?;
    }
    link.request(&SlaveRequest::Complete { status })?;
    Ok(())
}

/// Contexto de comando que delega cada operación en el master.
struct SlaveCommandContext {
    link: Arc<dyn MasterLink>,
    logger: StepLogger,
    versions: FileVersionTracker,
    outputs: Vec<(ObjectUrl, ObjectId)>,
}

impl SlaveCommandContext {
    fn new(link: Arc<dyn MasterLink>, title: String) -> Self {
        Self { link,
               logger: StepLogger::new(title),
               versions: FileVersionTracker::new(),
               outputs: Vec::new() }
    }
}

#[async_trait]
impl CommandContext for SlaveCommandContext {
    fn logger(&self) -> &StepLogger {
        &self.logger
    }

    fn register_output(&mut self, url: ObjectUrl, id: ObjectId) {
        if let Err(err) = self.link.request(&SlaveRequest::RegisterOutput { url: url.clone(), id })
        {
            log::warn!(target: "forge", "cannot register output {}: {}", url, err);
        }
        self.outputs.push((url, id));
    }

    fn add_tag(&mut self, url: &ObjectUrl, tag: &str) {
        let request = SlaveRequest::AddTag { url: url.clone(), tag: tag.to_string() };
        if let Err(err) = self.link.request(&request) {
            log::warn!(target: "forge", "cannot tag {}: {}", url, err);
        }
    }

    fn resolve_content_id(&self, url: &ObjectUrl) -> Option<ObjectId> {
        match self.link.request(&SlaveRequest::ResolveContent { url: url.clone() }) {
            Ok(MasterReply::ContentId { id }) => id,
            _ => None,
        }
    }

    fn compute_input_hash(&self, url: &ObjectUrl) -> ObjectId {
        match url.url_type {
            UrlType::File => {
                self.versions.compute_file_hash(Path::new(&url.path)).unwrap_or(ObjectId::EMPTY)
            }
            _ => self.resolve_content_id(url).unwrap_or(ObjectId::EMPTY),
        }
    }

    fn content_store(&self) -> Arc<dyn ContentStore> {
        Arc::new(RemoteContentStore { link: self.link.clone() })
    }

    fn current_outputs(&self) -> Vec<(ObjectUrl, ObjectId)> {
        self.outputs.clone()
    }

    fn output_object_groups(&self) -> Vec<Vec<OutputObject>> {
        match self.link.request(&SlaveRequest::GetOutputObjects) {
            Ok(MasterReply::OutputObjects { groups }) => groups,
            _ => Vec::new(),
        }
    }

    async fn schedule_and_await_command(&mut self, command: Box<dyn Command>) -> ResultStatus {
        let Some(spec) = command.remote_spec() else {
            self.logger.error(format!("spawned command `{}` has no serializable form",
                                      command.title()));
            return ResultStatus::Failed;
        };
        match self.link.request(&SlaveRequest::SpawnCommand { spec }) {
            Ok(MasterReply::SpawnStatus { status }) => status,
            _ => ResultStatus::Failed,
        }
    }
}

/// Content store visto desde el worker: cada acceso es un round-trip.
struct RemoteContentStore {
    link: Arc<dyn MasterLink>,
}

impl ContentStore for RemoteContentStore {
    fn put(&self, bytes: &[u8]) -> Result<ObjectId, BuildError> {
        match self.link.request(&SlaveRequest::StoreObject { bytes: bytes.to_vec() })? {
            MasterReply::Stored { id } => Ok(id),
            _ => Err(BuildError::Internal("unexpected reply to StoreObject".into())),
        }
    }

    fn get(&self, id: &ObjectId) -> Option<Vec<u8>> {
        match self.link.request(&SlaveRequest::FetchObject { id: *id }) {
            Ok(MasterReply::Object { bytes }) => bytes,
            _ => None,
        }
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.get(id).is_some()
    }

    fn delete(&self, _id: &ObjectId) -> Result<(), BuildError> {
        Err(BuildError::Internal("content deletion is not available in a worker".into()))
    }

    fn enumerate(&self) -> Vec<ObjectId> {
        Vec::new()
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Executor mínimo del worker: acá los awaits resuelven por round-trips
/// síncronos o por delays, así que alcanza con re-sondear.
fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = Box::pin(future);
    let waker = Waker::from(Arc::new(NoopWake));
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use forge_core::hashing::HashSerializer;
    use forge_core::model::RemoteCommandSpec;

    struct Probe;

    #[async_trait]
    impl Command for Probe {
        fn kind(&self) -> &'static str {
            "probe"
        }

        fn title(&self) -> String {
            "probe".into()
        }

        fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
            serializer.write_str("probe");
            Ok(())
        }

        async fn execute(&self,
                         context: &mut dyn CommandContext,
                         _token: &CancellationToken)
                         -> Result<ResultStatus, BuildError> {
            let id = context.content_store().put(b"remote payload")?;
            context.register_output(ObjectUrl::content_link("remote/out"), id);
            context.logger().info("probe ran");
            Ok(ResultStatus::Successful)
        }

        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(Probe)
        }
    }

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted_replies(replies: &[MasterReply]) -> std::io::Cursor<Vec<u8>> {
        let mut raw = Vec::new();
        for reply in replies {
            raw.extend_from_slice(serde_json::to_string(reply).unwrap().as_bytes());
            raw.push(b'\n');
        }
        std::io::Cursor::new(raw)
    }

    #[test]
    fn session_runs_command_and_reports_back() {
        let mut registry = CommandRegistry::new();
        registry.register("probe", |_| Ok(Box::new(Probe)));

        let stored = ObjectId::new(b"remote payload");
        let input = scripted_replies(&[
            MasterReply::Command { spec: RemoteCommandSpec::new("probe", serde_json::json!({})) },
            MasterReply::Cancellation { cancelled: false },
            MasterReply::Stored { id: stored },
            MasterReply::Ack, // RegisterOutput
            MasterReply::Ack, // Log
            MasterReply::Ack, // Complete
        ]);
        let written = Arc::new(Mutex::new(Vec::new()));
        serve(&registry, input, SharedWriter(written.clone())).unwrap();

        let written = written.lock().unwrap();
        let requests: Vec<SlaveRequest> = String::from_utf8(written.clone()).unwrap()
                                                                            .lines()
                                                                            .map(|l| serde_json::from_str(l).unwrap())
                                                                            .collect();
        assert!(matches!(requests[0], SlaveRequest::FetchCommand));
        assert!(matches!(requests[1], SlaveRequest::CheckCancellation));
        assert!(matches!(&requests[2], SlaveRequest::StoreObject { bytes } if bytes == b"remote payload"));
        assert!(matches!(&requests[3],
                         SlaveRequest::RegisterOutput { url, id }
                         if url.path == "remote/out" && *id == stored));
        assert!(matches!(&requests[4], SlaveRequest::Log { message } if message.text == "probe ran"));
        assert!(matches!(requests[5],
                         SlaveRequest::Complete { status: ResultStatus::Successful }));
    }

    #[test]
    fn command_error_degrades_to_failed_status() {
        struct Bomb;

        #[async_trait]
        impl Command for Bomb {
            fn kind(&self) -> &'static str {
                "bomb"
            }

            fn title(&self) -> String {
                "bomb".into()
            }

            fn write_parameter_hash(&self, _s: &mut HashSerializer) -> Result<(), BuildError> {
                Ok(())
            }

            async fn execute(&self,
                             _context: &mut dyn CommandContext,
                             _token: &CancellationToken)
                             -> Result<ResultStatus, BuildError> {
                Err(BuildError::Internal("boom".into()))
            }

            fn clone_command(&self) -> Box<dyn Command> {
                Box::new(Bomb)
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register("bomb", |_| Ok(Box::new(Bomb)));

        let input = scripted_replies(&[
            MasterReply::Command { spec: RemoteCommandSpec::new("bomb", serde_json::json!({})) },
            MasterReply::Cancellation { cancelled: false },
            MasterReply::Ack, // Log del error
            MasterReply::Ack, // Complete
        ]);
        let written = Arc::new(Mutex::new(Vec::new()));
        serve(&registry, input, SharedWriter(written.clone())).unwrap();

        let written = written.lock().unwrap();
        let last: SlaveRequest = String::from_utf8(written.clone()).unwrap()
                                                                   .lines()
                                                                   .last()
                                                                   .map(|l| serde_json::from_str(l).unwrap())
                                                                   .unwrap();
        assert!(matches!(last, SlaveRequest::Complete { status: ResultStatus::Failed }));
    }
}
