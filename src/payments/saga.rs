//! Compensating-transaction saga
//!
//! Multi-step payment sequences register an undo action per completed
//! step. On failure the undo actions run in reverse order; an undo that
//! itself fails is a [`CompensationFailure`]: it leaves a real monetary
//! inconsistency, so it is logged at error severity for manual
//! reconciliation, and the primary error is still what callers see.

use futures::future::BoxFuture;
use tracing::{error, info, warn};

use crate::types::RoadcallError;

/// A compensating action that failed to apply
#[derive(Debug)]
pub struct CompensationFailure {
    pub saga: &'static str,
    pub step: &'static str,
    pub error: RoadcallError,
}

type UndoThunk = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RoadcallError>> + Send>;

/// Ordered list of completed steps with their undo actions
pub struct Saga {
    name: &'static str,
    undo_stack: Vec<(&'static str, UndoThunk)>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            undo_stack: Vec::new(),
        }
    }

    /// Register the undo action for a step that just completed
    pub fn completed<F, Fut>(&mut self, step: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), RoadcallError>> + Send + 'static,
    {
        self.undo_stack.push((step, Box::new(move || Box::pin(undo()))));
    }

    /// All steps succeeded; discard the undo actions
    pub fn commit(mut self) {
        self.undo_stack.clear();
    }

    /// Run undo actions for all completed steps in reverse order,
    /// returning the failures (already logged).
    pub async fn unwind(mut self) -> Vec<CompensationFailure> {
        if !self.undo_stack.is_empty() {
            warn!(saga = self.name, steps = self.undo_stack.len(), "Unwinding saga");
        }

        let mut failures = Vec::new();
        while let Some((step, undo)) = self.undo_stack.pop() {
            match undo().await {
                Ok(()) => {
                    info!(saga = self.name, step = step, "Compensating action applied");
                }
                Err(err) => {
                    error!(
                        saga = self.name,
                        step = step,
                        error = %err,
                        "Compensation failed: manual reconciliation required"
                    );
                    failures.push(CompensationFailure {
                        saga: self.name,
                        step,
                        error: err,
                    });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_unwind_runs_in_reverse_order() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("test");

        let first = Arc::clone(&order);
        saga.completed("step_one", move || async move {
            first.lock().unwrap().push("step_one");
            Ok(())
        });
        let second = Arc::clone(&order);
        saga.completed("step_two", move || async move {
            second.lock().unwrap().push("step_two");
            Ok(())
        });

        let failures = saga.unwind().await;
        assert!(failures.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["step_two", "step_one"]);
    }

    #[tokio::test]
    async fn test_unwind_collects_failures_and_continues() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let mut saga = Saga::new("test");

        let first = Arc::clone(&order);
        saga.completed("good", move || async move {
            first.lock().unwrap().push("good");
            Ok(())
        });
        saga.completed("bad", || async {
            Err(RoadcallError::Internal("refund rejected".into()))
        });

        let failures = saga.unwind().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "bad");
        // The failing undo did not stop the earlier step's undo
        assert_eq!(*order.lock().unwrap(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_commit_discards_undo_actions() {
        let ran: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
        let mut saga = Saga::new("test");
        let flag = Arc::clone(&ran);
        saga.completed("step", move || async move {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        saga.commit();
        assert!(!*ran.lock().unwrap());
    }
}
