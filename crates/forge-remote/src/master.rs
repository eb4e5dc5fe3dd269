//! Lado master del canal: lanza el proceso worker y le sirve el protocolo.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Stdio};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use async_trait::async_trait;

use forge_core::builder::BuilderContext;
use forge_core::command::{Command, CommandContext, RemoteExecutor};
use forge_core::errors::BuildError;
use forge_core::model::RemoteCommandSpec;
use forge_core::sched::{sleep, CancellationToken};
use forge_core::step::ResultStatus;

use crate::messages::{MasterReply, SlaveRequest};

/// Ejecutor remoto sobre procesos worker.
///
/// Por cada comando se lanza una instancia del binario worker con stdin y
/// stdout conectados por pipes. Un thread lector dedicado drena el stdout
/// (las lecturas bloqueantes no pueden vivir en un microthread) y encola las
/// requests; el microthread del step las atiende contra su propio contexto,
/// así los outputs y logs del worker aterrizan donde aterrizarían en una
/// ejecución local.
pub struct RemoteCommandHost {
    worker_path: PathBuf,
    worker_args: Vec<String>,
}

impl RemoteCommandHost {
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self { worker_path: worker_path.into(), worker_args: Vec::new() }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    fn spawn_worker(&self) -> Result<(Child, ChildStdin, Receiver<SlaveRequest>), BuildError> {
        let mut child = std::process::Command::new(&self.worker_path).args(&self.worker_args)
                                                                     .stdin(Stdio::piped())
                                                                     .stdout(Stdio::piped())
                                                                     .spawn()?;
        let stdin = child.stdin
                         .take()
                         .ok_or_else(|| BuildError::Internal("worker stdin unavailable".into()))?;
        let stdout = child.stdout
                          .take()
                          .ok_or_else(|| BuildError::Internal("worker stdout unavailable".into()))?;

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SlaveRequest>(&line) {
                    Ok(request) => {
                        if tx.send(request).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::error!(target: "forge", "malformed worker request: {}", err);
                        break;
                    }
                }
            }
            // Al cerrar stdout se suelta `tx` y el master ve Disconnected
        });
        Ok((child, stdin, rx))
    }
}

#[async_trait]
impl RemoteExecutor for RemoteCommandHost {
    async fn execute(&self,
                     command: &dyn Command,
                     context: &mut dyn CommandContext,
                     builder: &BuilderContext,
                     token: &CancellationToken)
                     -> Result<ResultStatus, BuildError> {
        let spec = command.remote_spec()
                          .ok_or_else(|| BuildError::MissingRemoteSpec(command.title()))?;
        let (mut child, mut stdin, requests) = self.spawn_worker()?;
        log::debug!(target: "forge", "worker spawned for `{}`", command.title());

        let outcome =
            serve_session(&mut stdin, requests, command, &spec, context, builder, token).await;
        let status = match outcome {
            Ok(status) => status,
            Err(err) => {
                // El worker quedaría colgado del pipe: matarlo antes de propagar
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        // Reap cooperativo del proceso
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            sleep(Duration::from_millis(2)).await;
        }
        Ok(status)
    }
}

async fn serve_session(stdin: &mut ChildStdin,
                       requests: Receiver<SlaveRequest>,
                       command: &dyn Command,
                       spec: &RemoteCommandSpec,
                       context: &mut dyn CommandContext,
                       builder: &BuilderContext,
                       token: &CancellationToken)
                       -> Result<ResultStatus, BuildError> {
    loop {
        match requests.try_recv() {
            Ok(SlaveRequest::Complete { status }) => {
                let _ = write_reply(stdin, &MasterReply::Ack);
                return Ok(status);
            }
            Ok(request) => {
                let reply = reply_for(request, spec, context, builder, token).await?;
                write_reply(stdin, &reply)?;
            }
            Err(TryRecvError::Empty) => {
                sleep(Duration::from_millis(2)).await;
            }
            Err(TryRecvError::Disconnected) => {
                log::error!(target: "forge",
                            "worker for `{}` exited without reporting a status",
                            command.title());
                return Ok(ResultStatus::Failed);
            }
        }
    }
}

async fn reply_for(request: SlaveRequest,
                   spec: &RemoteCommandSpec,
                   context: &mut dyn CommandContext,
                   builder: &BuilderContext,
                   token: &CancellationToken)
                   -> Result<MasterReply, BuildError> {
    Ok(match request {
        SlaveRequest::FetchCommand => MasterReply::Command { spec: spec.clone() },
        SlaveRequest::ResolveContent { url } => {
            MasterReply::ContentId { id: context.resolve_content_id(&url) }
        }
        SlaveRequest::FetchObject { id } => {
            MasterReply::Object { bytes: context.content_store().get(&id) }
        }
        SlaveRequest::StoreObject { bytes } => {
            MasterReply::Stored { id: context.content_store().put(&bytes)? }
        }
        SlaveRequest::GetOutputObjects => {
            MasterReply::OutputObjects { groups: context.output_object_groups() }
        }
        SlaveRequest::RegisterOutput { url, id } => {
            context.register_output(url, id);
            MasterReply::Ack
        }
        SlaveRequest::AddTag { url, tag } => {
            context.add_tag(&url, &tag);
            MasterReply::Ack
        }
        SlaveRequest::Log { message } => {
            context.logger().replay(&message);
            MasterReply::Ack
        }
        SlaveRequest::SpawnCommand { spec } => {
            let command = builder.registry().create(&spec)?;
            let status = context.schedule_and_await_command(command).await;
            MasterReply::SpawnStatus { status }
        }
        SlaveRequest::CheckCancellation => {
            MasterReply::Cancellation { cancelled: token.is_cancelled() }
        }
        // Complete se maneja en el loop; acá sólo queda el Ack de cortesía
        SlaveRequest::Complete { .. } => MasterReply::Ack,
    })
}

fn write_reply(stdin: &mut ChildStdin, reply: &MasterReply) -> Result<(), BuildError> {
    let line = serde_json::to_string(reply)?;
    writeln!(stdin, "{}", line)?;
    stdin.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::Future;
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};
    use std::time::Instant;

    use forge_core::command::CommandRegistry;
    use forge_core::hashing::HashSerializer;
    use forge_core::model::{ObjectId, ObjectUrl, OutputObject, StepLogger};
    use forge_core::store::{ContentStore, InMemoryContentStore};

    struct Stub;

    #[async_trait]
    impl Command for Stub {
        fn kind(&self) -> &'static str {
            "stub"
        }

        fn title(&self) -> String {
            "stub".into()
        }

        fn write_parameter_hash(&self, _s: &mut HashSerializer) -> Result<(), BuildError> {
            Ok(())
        }

        async fn execute(&self,
                         _context: &mut dyn CommandContext,
                         _token: &CancellationToken)
                         -> Result<ResultStatus, BuildError> {
            unreachable!("stub only runs through the remote channel")
        }

        fn remote_spec(&self) -> Option<RemoteCommandSpec> {
            Some(RemoteCommandSpec::new("stub", serde_json::json!({})))
        }

        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(Stub)
        }
    }

    struct StubContext {
        logger: StepLogger,
        store: Arc<dyn ContentStore>,
    }

    #[async_trait]
    impl CommandContext for StubContext {
        fn logger(&self) -> &StepLogger {
            &self.logger
        }

        fn register_output(&mut self, _url: ObjectUrl, _id: ObjectId) {}

        fn add_tag(&mut self, _url: &ObjectUrl, _tag: &str) {}

        fn resolve_content_id(&self, _url: &ObjectUrl) -> Option<ObjectId> {
            None
        }

        fn compute_input_hash(&self, _url: &ObjectUrl) -> ObjectId {
            ObjectId::EMPTY
        }

        fn content_store(&self) -> Arc<dyn ContentStore> {
            self.store.clone()
        }

        fn current_outputs(&self) -> Vec<(ObjectUrl, ObjectId)> {
            Vec::new()
        }

        fn output_object_groups(&self) -> Vec<Vec<OutputObject>> {
            Vec::new()
        }

        async fn schedule_and_await_command(&mut self, _command: Box<dyn Command>) -> ResultStatus {
            ResultStatus::Failed
        }
    }

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

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

    #[test]
    fn session_error_kills_the_worker() {
        // Un worker que pide spawnear un kind desconocido fuerza el camino de
        // error del master; con el error propagado, el proceso no debe quedar
        // vivo esperando una reply que nunca llega.
        let script = concat!(r#"printf '%s\n' "#,
                             r#"'{"SpawnCommand":{"spec":{"kind":"nope","params":null}}}'"#,
                             "; sleep 5");
        let host = RemoteCommandHost::new("/bin/sh").with_args(vec!["-c".into(), script.into()]);

        let registry = Arc::new(CommandRegistry::new());
        let builder = BuilderContext::new(registry, None, 1);
        let token = CancellationToken::new();
        let mut context = StubContext { logger: StepLogger::new("stub"),
                                        store: Arc::new(InMemoryContentStore::new()) };

        let started = Instant::now();
        let result = block_on(host.execute(&Stub, &mut context, &builder, &token));

        assert!(matches!(result, Err(BuildError::UnknownCommandKind(kind)) if kind == "nope"));
        assert!(started.elapsed() < Duration::from_secs(4),
                "the worker process outlived the failed session");
    }
}
