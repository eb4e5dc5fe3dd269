use std::collections::HashMap;
use std::sync::Mutex;

use crate::step::ResultStatus;

const SUMMARY_ORDER: [ResultStatus; 5] = [ResultStatus::Successful,
                                          ResultStatus::NotTriggeredWasSuccessful,
                                          ResultStatus::Failed,
                                          ResultStatus::NotTriggeredPrerequisiteFailed,
                                          ResultStatus::Cancelled];

/// Contador de resultados de comandos del run. Los steps estructurales
/// (listas, barreras) no cuentan: el resumen habla de trabajo real.
#[derive(Default)]
pub struct StepCounter {
    counts: Mutex<HashMap<ResultStatus, usize>>,
}

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: ResultStatus) {
        *self.counts.lock().expect("step counter poisoned").entry(status).or_insert(0) += 1;
    }

    pub fn count(&self, status: ResultStatus) -> usize {
        self.counts.lock().expect("step counter poisoned").get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().expect("step counter poisoned").values().sum()
    }

    /// Resumen legible, con orden estable de estados.
    pub fn summary(&self) -> String {
        let counts = self.counts.lock().expect("step counter poisoned");
        let mut parts = Vec::new();
        for status in SUMMARY_ORDER {
            if let Some(&count) = counts.get(&status) {
                parts.push(format!("{} {:?}", count, status));
            }
        }
        let total: usize = counts.values().sum();
        if parts.is_empty() {
            format!("{} commands processed", total)
        } else {
            format!("{} commands processed: {}", total, parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_has_stable_order() {
        let counter = StepCounter::new();
        counter.record(ResultStatus::Failed);
        counter.record(ResultStatus::Successful);
        counter.record(ResultStatus::Successful);
        counter.record(ResultStatus::NotTriggeredWasSuccessful);

        assert_eq!(counter.total(), 4);
        assert_eq!(counter.count(ResultStatus::Successful), 2);
        assert_eq!(counter.summary(),
                   "4 commands processed: 2 Successful, 1 NotTriggeredWasSuccessful, 1 Failed");
    }
}
