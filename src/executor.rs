//! Applying work to every element of a batch.

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use bon::bon;
use tracing::{info, span, warn, Instrument, Level};

use crate::{
    batch::{BatchResult, WorkResult},
    error::{BatchError, RunResult},
    gate::{Interrupt, InterruptGate},
    interrupts::Interrupts,
    output::{Output, OutputSink},
    policies::{Mode, OnCancel, Order},
    pool::Pool,
    scoped::{ScopedMask, ScopedUnmask},
    work::{CancelFlags, CancelToken, Outcome, Params, Status, Work, WorkItem},
};

/// How long to wait for concurrent work units before giving up on the batch.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(0xFFFF);

/// Applies a unit of work to every element of a batch.
///
/// Work runs either sequentially or on a pool of worker tasks (see [`Mode`]). In both cases an
/// interrupt, e.g. an operator pressing Ctrl-C, never tears down a work unit part way through.
/// Instead, cancellation is requested and work units are expected to notice and stop cleanly.
///
/// Results are returned in input order, one per element.
pub struct Executor<W: Work> {
    name: String,
    work: Arc<W>,
    mode: Mode,
    order: Order,
    chunk_size: usize,
    pool_size: usize,
    on_cancel: OnCancel,
    wait_timeout: Duration,
    params: Arc<Params>,
    output: OutputSink,
    interrupts: Interrupts,
}

/// State shared between a running batch and its interrupt handler.
struct RunState {
    flags: Arc<CancelFlags>,
    interrupted: Arc<AtomicBool>,
    gate: Arc<InterruptGate>,
}

#[bon]
impl<W: Work> Executor<W> {
    /// Create a new executor.
    #[builder]
    pub fn new(
        /// Used in logs.
        name: impl Into<String>,
        /// Applied to every element.
        work: W,
        /// Sequential or concurrent.
        #[builder(default)]
        mode: Mode,
        /// The order elements are dispatched in.
        #[builder(default)]
        order: Order,
        /// The number of elements submitted to the worker pool at a time. Concurrent mode only.
        #[builder(default = 1)]
        chunk_size: usize,
        /// The number of worker tasks. Concurrent mode only. Defaults to the available
        /// parallelism.
        pool_size: Option<usize>,
        /// What to do with the remaining elements once one is cancelled. Sequential mode only.
        #[builder(default)]
        on_cancel: OnCancel,
        /// How long to wait for all work units to finish. Concurrent mode only.
        #[builder(default = DEFAULT_WAIT_TIMEOUT)]
        wait_timeout: Duration,
        /// Forwarded verbatim to every work unit.
        #[builder(default)]
        params: Params,
        /// Where captured output is written.
        #[builder(default)]
        output: OutputSink,
        /// Which interrupts to listen to.
        #[builder(default)]
        interrupts: Interrupts,
    ) -> Self {
        let pool_size = pool_size
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1);

        Self {
            name: name.into(),
            work: Arc::new(work),
            mode,
            order,
            chunk_size: chunk_size.max(1),
            pool_size,
            on_cancel,
            wait_timeout,
            params: Arc::new(params),
            output,
            interrupts,
        }
    }
}

impl<W: Work> Executor<W> {
    /// Process every element, and wait for the results.
    ///
    /// A new interrupt gate is used for each call. Interrupts received while the batch is running
    /// request cancellation of every element.
    pub async fn run(
        &self,
        elements: Vec<W::Element>,
    ) -> RunResult<BatchResult<W::Payload>, W::Error> {
        let count = elements.len();
        // Convert to u64 so tracing will treat this as an integer instead of a string.
        let span = span!(
            Level::INFO,
            "run batch",
            batch.name = %self.name,
            batch.size = count as u64,
            batch.mode = ?self.mode,
        );

        async move {
            let state = self.new_run_state(count);
            let _forwarders = self.interrupts.install(&state.gate)?;

            let mut elements: Vec<_> = elements.into_iter().enumerate().collect();
            self.order.arrange(&mut elements);

            let results = match self.mode {
                Mode::Sequential => self.run_sequentially(elements, &state).await?,
                Mode::Concurrent => {
                    let pool = Pool {
                        work: Arc::clone(&self.work),
                        params: Arc::clone(&self.params),
                        flags: Arc::clone(&state.flags),
                        output: self.output.clone(),
                        size: self.pool_size,
                        chunk_size: self.chunk_size,
                        wait_timeout: self.wait_timeout,
                    };
                    pool.run(elements).await?
                }
            };

            let interrupted = state.interrupted.load(Ordering::Acquire);
            info!(interrupted, "Batch '{}' finished", self.name);

            Ok(BatchResult::new(results, interrupted))
        }
        .instrument(span)
        .await
    }

    /// The gate's handler requests cancellation of everything.
    fn new_run_state(&self, count: usize) -> RunState {
        let flags = Arc::new(CancelFlags::new(count));
        let interrupted = Arc::new(AtomicBool::new(false));

        let gate = Arc::new(InterruptGate::new({
            let flags = Arc::clone(&flags);
            let interrupted = Arc::clone(&interrupted);
            let name = self.name.clone();
            move |interrupt: Interrupt| {
                warn!(
                    ?interrupt,
                    "Batch '{name}' interrupted, requesting cancellation of remaining work"
                );
                interrupted.store(true, Ordering::Release);
                flags.request_all();
            }
        }));

        RunState {
            flags,
            interrupted,
            gate,
        }
    }

    async fn run_sequentially(
        &self,
        elements: Vec<(usize, W::Element)>,
        state: &RunState,
    ) -> RunResult<Vec<WorkResult<W::Payload>>, W::Error> {
        let count = elements.len();
        let mut results = Vec::with_capacity(count);

        // Released on every exit path, which replays any interrupt held back in the meantime.
        let masked = ScopedMask::enter(Some(&state.gate));

        let mut cancelled = false;
        for (index, element) in elements {
            // An interrupt held back during the previous work unit takes effect here, before the
            // next one is dispatched.
            if state.gate.has_pending() {
                drop(ScopedUnmask::enter(Some(&state.gate)));
            }

            if cancelled || state.flags.is_requested(index) {
                match self.on_cancel {
                    OnCancel::Stop => {
                        results.push(WorkResult::skipped(index));
                        continue;
                    }
                    OnCancel::Continue => state.flags.request(index),
                }
            }

            let item = WorkItem::new(
                element,
                index,
                count,
                CancelToken::new(Arc::clone(&state.flags), index),
                Some(Arc::clone(&state.gate)),
                Arc::clone(&self.params),
            );

            let outcome = call_with_captured_output(&*self.work, item, &self.output)
                .await
                .map_err(|error| BatchError::WorkFailed { index, error })?;

            if outcome.status() == Status::Cancel {
                cancelled = true;
            }
            results.push(WorkResult::from_outcome(index, outcome));
        }

        drop(masked);

        Ok(results)
    }
}

impl<W: Work> fmt::Debug for Executor<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("order", &self.order)
            .field("chunk_size", &self.chunk_size)
            .field("pool_size", &self.pool_size)
            .field("on_cancel", &self.on_cancel)
            .field("wait_timeout", &self.wait_timeout)
            .field("params", &self.params)
            .field("interrupts", &self.interrupts)
            .finish_non_exhaustive()
    }
}

/// Run one work unit, then flush whatever it wrote in one piece.
pub(crate) async fn call_with_captured_output<W: Work>(
    work: &W,
    item: WorkItem<W::Element>,
    sink: &OutputSink,
) -> Result<Outcome<W::Payload>, W::Error> {
    let index = item.index();
    let span = span!(Level::DEBUG, "work unit", work.index = index as u64);

    let mut output = Output::default();
    let outcome = work.process(item, &mut output).instrument(span).await;
    sink.flush_captured(index, &output);

    outcome
}
