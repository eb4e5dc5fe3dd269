use std::collections::HashMap;

use serde_json::Value;

use crate::errors::BuildError;
use crate::model::RemoteCommandSpec;

use super::command::Command;

type CommandFactory = Box<dyn Fn(Value) -> Result<Box<dyn Command>, BuildError> + Send + Sync>;

/// Registro kind → fábrica de comandos.
///
/// Reemplaza la clonación por reflexión del diseño original: cada tipo de
/// comando registra explícitamente cómo reconstruirse desde sus parámetros
/// serializados. Lo usan el slave remoto y el replay de spawns cacheados.
#[derive(Default)]
pub struct CommandRegistry {
    factories: HashMap<String, CommandFactory>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
        where F: Fn(Value) -> Result<Box<dyn Command>, BuildError> + Send + Sync + 'static
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, spec: &RemoteCommandSpec) -> Result<Box<dyn Command>, BuildError> {
        let factory = self.factories
                          .get(&spec.kind)
                          .ok_or_else(|| BuildError::UnknownCommandKind(spec.kind.clone()))?;
        factory(spec.params.clone())
    }
}
