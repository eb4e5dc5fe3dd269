use std::collections::BTreeMap;

use crate::constants::EXPECTED_VERSION;
use crate::errors::BuildError;
use crate::hashing::HashSerializer;
use crate::model::{ObjectId, ObjectUrl};

use super::command::Command;

/// Calcula la identidad de cache de un comando.
///
/// Entran: versión del formato de cache, kind, versión de la implementación,
/// parámetros propios y el contenido actual de cada input declarado (urls
/// ordenadas y deduplicadas, para que el orden de declaración no altere la
/// identidad). Devuelve también el mapa url → hash observado, que el caller
/// persiste como `input_dependency_versions`.
///
/// Un input irresoluble corta el cálculo: sin identidad estable no hay
/// entrada de cache posible y el step debe fallar con diagnóstico.
pub fn compute_command_hash<F>(command: &dyn Command,
                               input_hash: F)
                               -> Result<(ObjectId, BTreeMap<ObjectUrl, ObjectId>), BuildError>
    where F: Fn(&ObjectUrl) -> ObjectId
{
    let mut serializer = HashSerializer::new();
    serializer.write_u32(EXPECTED_VERSION);
    serializer.write_str(command.kind());
    serializer.write_u32(command.version());
    command.write_parameter_hash(&mut serializer)?;

    let mut inputs = command.input_files();
    inputs.sort();
    inputs.dedup();

    let mut versions = BTreeMap::new();
    for url in inputs {
        let id = input_hash(&url);
        if id.is_empty() {
            return Err(BuildError::DanglingDependency(url));
        }
        serializer.write_url(&url);
        serializer.write_object_id(&id);
        versions.insert(url, id);
    }

    Ok((serializer.finish(), versions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandContext;
    use crate::hashing;
    use crate::sched::CancellationToken;
    use crate::step::ResultStatus;
    use async_trait::async_trait;

    struct Probe {
        param: String,
        inputs: Vec<ObjectUrl>,
    }

    #[async_trait]
    impl Command for Probe {
        fn kind(&self) -> &'static str {
            "probe"
        }

        fn title(&self) -> String {
            format!("probe {}", self.param)
        }

        fn input_files(&self) -> Vec<ObjectUrl> {
            self.inputs.clone()
        }

        fn write_parameter_hash(&self, serializer: &mut HashSerializer) -> Result<(), BuildError> {
            serializer.write_str(&self.param);
            Ok(())
        }

        async fn execute(&self,
                         _context: &mut dyn CommandContext,
                         _token: &CancellationToken)
                         -> Result<ResultStatus, BuildError> {
            Ok(ResultStatus::Successful)
        }

        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(Probe { param: self.param.clone(), inputs: self.inputs.clone() })
        }
    }

    #[test]
    fn identity_covers_parameters_and_input_content() {
        let resolver = |url: &ObjectUrl| hashing::hash_bytes(url.path.as_bytes());
        let a = Probe { param: "x".into(), inputs: vec![ObjectUrl::content("dep")] };
        let b = Probe { param: "y".into(), inputs: vec![ObjectUrl::content("dep")] };

        let (hash_a, versions) = compute_command_hash(&a, resolver).unwrap();
        let (hash_b, _) = compute_command_hash(&b, resolver).unwrap();
        assert_ne!(hash_a, hash_b);
        assert_eq!(versions.len(), 1);

        // Mismo comando, contenido de input distinto: otra identidad
        let other = |_: &ObjectUrl| hashing::hash_bytes(b"changed");
        let (hash_c, _) = compute_command_hash(&a, other).unwrap();
        assert_ne!(hash_a, hash_c);
    }

    #[test]
    fn input_declaration_order_is_irrelevant() {
        let resolver = |url: &ObjectUrl| hashing::hash_bytes(url.path.as_bytes());
        let fwd = Probe { param: "p".into(),
                          inputs: vec![ObjectUrl::content("a"), ObjectUrl::content("b")] };
        let rev = Probe { param: "p".into(),
                          inputs: vec![ObjectUrl::content("b"), ObjectUrl::content("a")] };
        assert_eq!(compute_command_hash(&fwd, resolver).unwrap().0,
                   compute_command_hash(&rev, resolver).unwrap().0);
    }

    #[test]
    fn unresolvable_input_is_an_error() {
        let resolver = |_: &ObjectUrl| ObjectId::EMPTY;
        let probe = Probe { param: "p".into(), inputs: vec![ObjectUrl::content("missing")] };
        assert!(matches!(compute_command_hash(&probe, resolver),
                         Err(BuildError::DanglingDependency(_))));
    }
}
