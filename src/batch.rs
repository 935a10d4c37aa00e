use std::{ops::Index, slice, vec};

use crate::work::{Outcome, Status};

/// The result of one element of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkResult<T> {
    index: usize,
    status: Status,
    payload: Option<T>,
    dispatched: bool,
}

impl<T> WorkResult<T> {
    pub(crate) fn from_outcome(index: usize, outcome: Outcome<T>) -> Self {
        Self {
            index,
            status: outcome.status,
            payload: outcome.payload,
            dispatched: true,
        }
    }

    /// An element which was never handed to the work function because the batch was stopped.
    pub(crate) fn skipped(index: usize) -> Self {
        Self {
            index,
            status: Status::Cancel,
            payload: None,
            dispatched: false,
        }
    }

    /// The position of the element in the input.
    pub fn index(&self) -> usize {
        self.index
    }

    /// How the work unit finished.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether the work unit stopped because cancellation was requested, or never ran.
    pub fn is_cancelled(&self) -> bool {
        self.status == Status::Cancel
    }

    /// Data returned by the work unit.
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Take ownership of the data returned by the work unit.
    pub fn into_payload(self) -> Option<T> {
        self.payload
    }

    /// Whether the work function was called for this element at all.
    pub fn was_dispatched(&self) -> bool {
        self.dispatched
    }
}

/// The results of a whole batch, one per element, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult<T> {
    results: Vec<WorkResult<T>>,
    interrupted: bool,
}

impl<T> BatchResult<T> {
    /// `results` may be in any order.
    pub(crate) fn new(mut results: Vec<WorkResult<T>>, interrupted: bool) -> Self {
        results.sort_by_key(WorkResult::index);
        Self {
            results,
            interrupted,
        }
    }

    /// The number of results, which is always the number of input elements.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch had no elements.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether an interrupt was delivered while the batch was running.
    ///
    /// In sequential mode this includes an interrupt which was held back until the end.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Whether any element was cancelled.
    pub fn any_cancelled(&self) -> bool {
        self.results.iter().any(WorkResult::is_cancelled)
    }

    /// Iterate over the results in input order.
    pub fn iter(&self) -> slice::Iter<'_, WorkResult<T>> {
        self.results.iter()
    }

    /// The results in input order.
    pub fn into_vec(self) -> Vec<WorkResult<T>> {
        self.results
    }
}

impl<T> Index<usize> for BatchResult<T> {
    type Output = WorkResult<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.results[index]
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = WorkResult<T>;
    type IntoIter = vec::IntoIter<WorkResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a BatchResult<T> {
    type Item = &'a WorkResult<T>;
    type IntoIter = slice::Iter<'a, WorkResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
