use serde::{Deserialize, Serialize};

/// Estado terminal de un build step.
///
/// `NotProcessed` es el estado inicial y es inválido como valor terminal:
/// que sobreviva a la finalización es un defecto, no un resultado normal
/// (el boundary del builder lo loguea y lo mapea a `Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    NotProcessed,
    Successful,
    Failed,
    Cancelled,
    /// Cache hit: el comando no corrió porque nada cambió.
    NotTriggeredWasSuccessful,
    /// Un prerequisito falló; el comando nunca se invocó.
    NotTriggeredPrerequisiteFailed,
}

impl ResultStatus {
    pub fn failed(self) -> bool {
        matches!(self,
                 ResultStatus::Failed | ResultStatus::NotTriggeredPrerequisiteFailed)
    }

    pub fn is_terminal(self) -> bool {
        self != ResultStatus::NotProcessed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_covers_prerequisite_failure() {
        assert!(ResultStatus::Failed.failed());
        assert!(ResultStatus::NotTriggeredPrerequisiteFailed.failed());
        assert!(!ResultStatus::Cancelled.failed());
        assert!(!ResultStatus::NotTriggeredWasSuccessful.failed());
    }
}
