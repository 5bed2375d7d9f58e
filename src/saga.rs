//! Compensating multi-store writes
//!
//! A [`Saga`] runs store actions in order and remembers, for every action that
//! succeeded, how to undo it. When a later action fails the recorded
//! compensations run newest first and the failure is returned. A compensation
//! that fails is logged and skipped; it is never retried and never replaces
//! the original error.

use tracing::{debug, error, info, warn};

use crate::store::{StoreError, StoreResult};

type Compensation<'a> = Box<dyn FnOnce() -> StoreResult<()> + 'a>;

/// The step that failed and why
#[derive(Debug)]
pub struct SagaFailure {
    pub step: &'static str,
    pub source: StoreError,
}

/// An in-flight sequence of compensable steps
pub struct Saga<'a> {
    name: &'static str,
    completed: Vec<(&'static str, Compensation<'a>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            completed: Vec::new(),
        }
    }

    /// Run `action`; on success register the compensation built from its output.
    pub fn step<T, C>(
        &mut self,
        label: &'static str,
        action: impl FnOnce() -> StoreResult<T>,
        compensate: impl FnOnce(&T) -> C,
    ) -> Result<T, SagaFailure>
    where
        C: FnOnce() -> StoreResult<()> + 'a,
    {
        let value = self.run(label, action)?;
        self.completed.push((label, Box::new(compensate(&value))));
        Ok(value)
    }

    /// Run a step that needs no compensation of its own (the last one)
    pub fn final_step<T>(
        &mut self,
        label: &'static str,
        action: impl FnOnce() -> StoreResult<T>,
    ) -> Result<T, SagaFailure> {
        self.run(label, action)
    }

    /// Labels of the steps that succeeded so far, in order
    pub fn completed_steps(&self) -> Vec<&'static str> {
        self.completed.iter().map(|(label, _)| *label).collect()
    }

    /// Finish successfully, discarding all compensations
    pub fn commit(self) {
        debug!(saga = self.name, steps = self.completed.len(), "saga committed");
    }

    fn run<T>(
        &mut self,
        label: &'static str,
        action: impl FnOnce() -> StoreResult<T>,
    ) -> Result<T, SagaFailure> {
        match action() {
            Ok(value) => {
                debug!(saga = self.name, step = label, "saga step succeeded");
                Ok(value)
            }
            Err(source) => {
                error!(saga = self.name, step = label, error = %source, "saga step failed");
                self.unwind();
                Err(SagaFailure { step: label, source })
            }
        }
    }

    fn unwind(&mut self) {
        while let Some((label, compensate)) = self.completed.pop() {
            match compensate() {
                Ok(()) => info!(saga = self.name, step = label, "compensated"),
                Err(e) => warn!(saga = self.name, step = label, error = %e, "compensation failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_all_steps_succeed() {
        let undone = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");

        let a = saga.step("a", || Ok(1), |_| || { undone.borrow_mut().push("a"); Ok(()) }).unwrap();
        let b = saga.step("b", || Ok(a + 1), |_| || { undone.borrow_mut().push("b"); Ok(()) }).unwrap();
        let c = saga.final_step("c", || Ok(b + 1)).unwrap();

        assert_eq!(c, 3);
        assert_eq!(saga.completed_steps(), vec!["a", "b"]);
        saga.commit();
        assert!(undone.borrow().is_empty());
    }

    #[test]
    fn test_failure_compensates_in_reverse_order() {
        let undone = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");

        saga.step("first", || Ok("x"), |v| {
            let v = v.to_string();
            let undone = &undone;
            move || { undone.borrow_mut().push(format!("first:{}", v)); Ok(()) }
        }).unwrap();
        saga.step("second", || Ok(()), |_| || { undone.borrow_mut().push("second".to_string()); Ok(()) }).unwrap();

        let failure = saga
            .final_step::<()>("third", || Err(StoreError::Backend("boom".into())))
            .unwrap_err();

        assert_eq!(failure.step, "third");
        assert!(matches!(failure.source, StoreError::Backend(_)));
        assert_eq!(*undone.borrow(), vec!["second".to_string(), "first:x".to_string()]);
        assert!(saga.completed_steps().is_empty());
    }

    #[test]
    fn test_failed_compensation_keeps_original_error_and_continues() {
        let undone = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");

        saga.step("first", || Ok(()), |_| || { undone.borrow_mut().push("first"); Ok(()) }).unwrap();
        saga.step("second", || Ok(()), |_| || Err(StoreError::Backend("cannot undo".into()))).unwrap();

        let failure = saga
            .step("third", || Err::<(), _>(StoreError::Conflict("original".into())), |_| || Ok(()))
            .unwrap_err();

        assert!(matches!(failure.source, StoreError::Conflict(ref m) if m == "original"));
        assert_eq!(*undone.borrow(), vec!["first"]);
    }

    #[test]
    fn test_first_step_failure_has_nothing_to_undo() {
        let mut saga = Saga::new("test");
        let failure = saga
            .step("only", || Err::<(), _>(StoreError::LockPoisoned), |_| || Ok(()))
            .unwrap_err();
        assert_eq!(failure.step, "only");
    }
}
