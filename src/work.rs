use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{gate::InterruptGate, output::Output, scoped::ScopedUnmask};

/// Process a single element of a batch.
///
/// Shared between all work units of a batch, which may run concurrently.
pub trait Work: 'static + Send + Sync {
    /// The type of each element in the batch.
    type Element: 'static + Send;
    /// Opaque data attached to each outcome.
    type Payload: 'static + Send;
    /// An unrecoverable failure. Aborts the batch.
    type Error: 'static + Send + Display + Debug;

    /// Process one element.
    ///
    /// Diagnostic output should be written to `output` rather than straight to stdout. It is
    /// flushed in one piece once this returns, so output from concurrent work units does not
    /// interleave.
    ///
    /// Cancellation is cooperative: check [`WorkItem::is_cancel_requested()`] and return
    /// [`Outcome::cancelled()`] to stop early.
    fn process(
        &self,
        item: WorkItem<Self::Element>,
        output: &mut Output,
    ) -> impl Future<Output = Result<Outcome<Self::Payload>, Self::Error>> + Send;
}

/// How a work unit finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completed.
    Ok,
    /// Stopped early, or never started, because cancellation was requested.
    Cancel,
    /// Completed, but the result was a failure, e.g. a test did not pass.
    Failed,
}

/// The value returned by [`Work::process()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub(crate) status: Status,
    pub(crate) payload: Option<T>,
}

impl<T> Outcome<T> {
    /// An outcome with an arbitrary status.
    pub fn new(status: Status, payload: Option<T>) -> Self {
        Self { status, payload }
    }

    /// Completed successfully.
    pub fn ok(payload: T) -> Self {
        Self::new(Status::Ok, Some(payload))
    }

    /// Completed unsuccessfully.
    pub fn failed(payload: T) -> Self {
        Self::new(Status::Failed, Some(payload))
    }

    /// Stopped because cancellation was requested.
    ///
    /// In sequential mode, every element dispatched after this one sees a cancellation request.
    pub fn cancelled() -> Self {
        Self::new(Status::Cancel, None)
    }

    /// How the work unit finished.
    pub fn status(&self) -> Status {
        self.status
    }
}

/// Extra parameters forwarded verbatim to every work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, String>);

impl Params {
    /// No parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over all parameters, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One cancellation flag per element of a batch. Flags only ever go from `false` to `true`.
#[derive(Debug)]
pub(crate) struct CancelFlags(Box<[AtomicBool]>);

impl CancelFlags {
    pub(crate) fn new(count: usize) -> Self {
        Self((0..count).map(|_| AtomicBool::new(false)).collect())
    }

    pub(crate) fn request(&self, index: usize) {
        if let Some(flag) = self.0.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    pub(crate) fn request_all(&self) {
        for flag in self.0.iter() {
            flag.store(true, Ordering::Release);
        }
    }

    pub(crate) fn is_requested(&self, index: usize) -> bool {
        self.0
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Read access to the cancellation flag of one element.
///
/// Cheap to clone, so it can be handed to tasks spawned by a work unit.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flags: Arc<CancelFlags>,
    index: usize,
}

impl CancelToken {
    pub(crate) fn new(flags: Arc<CancelFlags>, index: usize) -> Self {
        Self { flags, index }
    }

    /// Whether the executor has asked this element to stop.
    pub fn is_requested(&self) -> bool {
        self.flags.is_requested(self.index)
    }
}

/// One element of a batch, as handed to [`Work::process()`].
#[derive(Debug)]
pub struct WorkItem<E> {
    element: E,
    index: usize,
    count: usize,
    cancel: CancelToken,
    gate: Option<Arc<InterruptGate>>,
    params: Arc<Params>,
}

impl<E> WorkItem<E> {
    pub(crate) fn new(
        element: E,
        index: usize,
        count: usize,
        cancel: CancelToken,
        gate: Option<Arc<InterruptGate>>,
        params: Arc<Params>,
    ) -> Self {
        Self {
            element,
            index,
            count,
            cancel,
            gate,
            params,
        }
    }

    /// The element to process.
    pub fn element(&self) -> &E {
        &self.element
    }

    /// Take ownership of the element.
    pub fn into_element(self) -> E {
        self.element
    }

    /// The position of the element in the input, regardless of the order elements are dispatched.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The number of elements in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether this element has been asked to stop.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// The cancellation flag for this element.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// The batch's interrupt gate.
    ///
    /// Only present in sequential mode, where the gate is masked while work units run.
    pub fn gate(&self) -> Option<&Arc<InterruptGate>> {
        self.gate.as_ref()
    }

    /// Let interrupts through until the returned guard is dropped.
    ///
    /// Use around long-running steps which should react to Ctrl-C straight away. An interrupt
    /// delivered inside the window requests cancellation of this and all remaining elements. Does
    /// nothing when there is no gate.
    pub fn unmask_interrupts(&self) -> ScopedUnmask<'_> {
        ScopedUnmask::enter(self.gate.as_deref())
    }

    /// Extra parameters for the batch.
    pub fn params(&self) -> &Params {
        &self.params
    }
}
