//! Step bookkeeping for multi-step workflows with compensation.
//!
//! Every side effect is recorded as a step once it is applied. On failure,
//! [`Saga::compensate`] walks the applied steps backwards and undoes those
//! whose compensation is still enabled. Releasing a step disables its
//! compensation for good.

use crate::CoreError;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Applied,
    /// Made permanent; can no longer be compensated.
    Released,
    Compensated,
    /// Could not be undone and was neutralized instead.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SagaStep<R> {
    pub name: String,
    pub resource: R,
    pub state: StepState,
    pub compensation_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Saga<R> {
    name: String,
    steps: Vec<SagaStep<R>>,
}

impl<R: fmt::Display> Saga<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Record an applied side effect. Returns its index.
    pub fn record(&mut self, name: impl Into<String>, resource: R, compensable: bool) -> usize {
        let name = name.into();
        debug!("{}: applied {name} ({resource})", self.name);
        self.steps.push(SagaStep {
            name,
            resource,
            state: StepState::Applied,
            compensation_enabled: compensable,
        });
        self.steps.len() - 1
    }

    pub fn mark_released(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.state = StepState::Released;
            step.compensation_enabled = false;
        }
    }

    /// Mark a step undone outside of [`Saga::compensate`], e.g. a resource
    /// discarded right after creation because it ended up empty.
    pub fn mark_compensated(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.state = StepState::Compensated;
            step.compensation_enabled = false;
        }
    }

    /// Like [`Saga::mark_compensated`], for a resource that was neutralized
    /// because it could not be removed.
    pub fn mark_skipped(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.state = StepState::Skipped;
            step.compensation_enabled = false;
        }
    }

    pub fn has_released(&self) -> bool {
        self.steps.iter().any(|s| s.state == StepState::Released)
    }

    pub fn steps(&self) -> &[SagaStep<R>] {
        &self.steps
    }

    /// Steps still standing: applied or released.
    pub fn live(&self) -> impl Iterator<Item = (usize, &SagaStep<R>)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, StepState::Applied | StepState::Released))
    }

    /// Undo applied steps in reverse order while their compensation is
    /// enabled. `undo` returns the state the step ends up in. Failed
    /// compensations are logged, left applied, and returned.
    pub fn compensate<F>(&mut self, mut undo: F) -> Vec<(String, CoreError)>
    where
        F: FnMut(&SagaStep<R>) -> Result<StepState, CoreError>,
    {
        let mut failures = Vec::new();
        for step in self.steps.iter_mut().rev() {
            if step.state != StepState::Applied || !step.compensation_enabled {
                continue;
            }
            match undo(step) {
                Ok(state) => {
                    debug!("{}: compensated {} -> {state:?}", self.name, step.name);
                    step.state = state;
                    step.compensation_enabled = false;
                }
                Err(e) => {
                    warn!(
                        "{}: could not compensate {} ({}): {e}",
                        self.name, step.name, step.resource
                    );
                    failures.push((step.name.clone(), e));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensation_runs_in_reverse_and_skips_released() {
        let mut saga: Saga<&str> = Saga::new("test");
        let a = saga.record("a", "A", true);
        saga.record("b", "B", true);
        saga.record("c", "C", false);
        saga.record("d", "D", true);
        saga.mark_released(a);

        let mut order = Vec::new();
        let failures = saga.compensate(|step| {
            order.push(step.resource);
            Ok(StepState::Compensated)
        });
        assert!(failures.is_empty());
        assert_eq!(order, vec!["D", "B"]);
        assert!(saga.has_released());
        let states: Vec<StepState> = saga.steps().iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                StepState::Released,
                StepState::Compensated,
                StepState::Applied,
                StepState::Compensated
            ]
        );
    }

    #[test]
    fn compensation_is_not_repeated() {
        let mut saga: Saga<&str> = Saga::new("test");
        saga.record("a", "A", true);
        let mut calls = 0;
        saga.compensate(|_| {
            calls += 1;
            Ok(StepState::Skipped)
        });
        saga.compensate(|_| {
            calls += 1;
            Ok(StepState::Compensated)
        });
        assert_eq!(calls, 1);
        assert_eq!(saga.steps()[0].state, StepState::Skipped);
    }

    #[test]
    fn failed_compensation_is_reported() {
        let mut saga: Saga<&str> = Saga::new("test");
        saga.record("a", "A", true);
        let failures = saga.compensate(|_| Err(CoreError::Cancelled));
        assert_eq!(failures.len(), 1);
        assert_eq!(saga.steps()[0].state, StepState::Applied);
        assert_eq!(saga.live().count(), 1);
    }
}
