use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nivel de un mensaje capturado; se mapea 1:1 sobre la fachada `log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Mensaje de log capturado durante la ejecución de un comando.
///
/// Forma parte del `CommandResultEntry`: en un cache hit los mensajes se
/// re-emiten para que el consumidor vea efectos idénticos a una ejecución real.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub module: String,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(level: LogLevel, module: impl Into<String>, text: impl Into<String>) -> Self {
        Self { level,
               module: module.into(),
               text: text.into(),
               ts: Utc::now() }
    }
}

/// Logger por build step: captura los mensajes y los reenvía a la fachada `log`.
#[derive(Debug)]
pub struct StepLogger {
    module: String,
    messages: Mutex<Vec<LogMessage>>,
}

impl StepLogger {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into(),
               messages: Mutex::new(Vec::new()) }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn log(&self, level: LogLevel, text: impl Into<String>) {
        let message = LogMessage::new(level, self.module.clone(), text);
        log::log!(target: "forge", level.to_log(), "[{}] {}", message.module, message.text);
        self.messages.lock().expect("step logger poisoned").push(message);
    }

    /// Re-emite un mensaje previamente capturado (replay de cache).
    pub fn replay(&self, message: &LogMessage) {
        log::log!(target: "forge", message.level.to_log(), "[{}] {}", message.module, message.text);
        self.messages.lock().expect("step logger poisoned").push(message.clone());
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(LogLevel::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(LogLevel::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.log(LogLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(LogLevel::Error, text);
    }

    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages.lock().expect("step logger poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("step logger poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mensajes capturados a partir de la marca dada (delta de un comando).
    pub fn messages_since(&self, mark: usize) -> Vec<LogMessage> {
        let messages = self.messages.lock().expect("step logger poisoned");
        messages.get(mark..).map(|s| s.to_vec()).unwrap_or_default()
    }

    /// Copia los mensajes capturados hacia otro logger (merge de aggregates).
    pub fn copy_to(&self, other: &StepLogger) {
        let messages = self.messages();
        let mut dest = other.messages.lock().expect("step logger poisoned");
        dest.extend(messages);
    }
}
