//! Partial-success collection for fan-out passes
//!
//! A policy reconcile touches many cards; one failing card must not stop
//! the others. [`FanOut`] keeps what succeeded next to what failed so the
//! caller decides explicitly whether the pass as a whole failed.

use crate::{Error, Result};

/// Results of a pass over many items
#[derive(Debug)]
pub struct FanOut<T> {
    succeeded: Vec<T>,
    errors: Vec<Error>,
}

impl<T> Default for FanOut<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> FanOut<T> {
    /// Start an empty pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a success
    pub fn push(&mut self, item: T) {
        self.succeeded.push(item);
    }

    /// Record a failure
    pub fn fail(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Record either outcome; `Ok(None)` is a tolerated skip
    pub fn record(&mut self, result: Result<Option<T>>) {
        match result {
            Ok(Some(item)) => self.push(item),
            Ok(None) => {}
            Err(e) => self.fail(e),
        }
    }

    /// Split into successes and, if anything failed, one aggregate error
    pub fn finish(self) -> (Vec<T>, Option<Error>) {
        let error = (!self.errors.is_empty()).then(|| Error::aggregate(&self.errors));
        (self.succeeded, error)
    }
}
