//! The worker pool behind concurrent mode.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, Instrument, Span};

use crate::{
    batch::WorkResult,
    error::{BatchError, RunResult},
    executor::call_with_captured_output,
    output::OutputSink,
    work::{CancelFlags, CancelToken, Outcome, Params, Work, WorkItem},
};

type Chunk<E> = Vec<(usize, E)>;
type ChunkOutcomes<P, E> = Vec<(usize, Result<Outcome<P>, E>)>;

/// Wait timeouts longer than this are treated as no bound at all.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Chunks waiting to be picked up by a worker.
type SubmissionQueue<E> = Arc<Mutex<VecDeque<Chunk<E>>>>;

/// A fixed number of worker tasks sharing one queue of submitted chunks.
pub(crate) struct Pool<W: Work> {
    pub work: Arc<W>,
    pub params: Arc<Params>,
    pub flags: Arc<CancelFlags>,
    pub output: OutputSink,
    pub size: usize,
    pub chunk_size: usize,
    pub wait_timeout: Duration,
}

impl<W: Work> Pool<W> {
    /// Process every element, and wait for all workers to finish.
    ///
    /// Work unit failures don't stop the other workers. The failure with the lowest index is
    /// returned once everything has finished.
    pub async fn run(
        self,
        elements: Vec<(usize, W::Element)>,
    ) -> RunResult<Vec<WorkResult<W::Payload>>, W::Error> {
        let count = elements.len();
        let deadline = (self.wait_timeout <= UNBOUNDED_WAIT)
            .then(|| Instant::now() + self.wait_timeout);

        let queue = submit(elements, self.chunk_size);
        let chunks = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        let size = self.size.min(chunks).max(1);
        debug!(pool.size = size as u64, chunks = chunks as u64, "Starting worker pool");

        let mut workers = JoinSet::new();
        for _ in 0..size {
            let worker = Worker {
                work: Arc::clone(&self.work),
                params: Arc::clone(&self.params),
                flags: Arc::clone(&self.flags),
                output: self.output.clone(),
                count,
                queue: Arc::clone(&queue),
            };
            workers.spawn(worker.run().instrument(Span::current()));
        }

        let mut outcomes = Vec::with_capacity(count);
        let mut panicked = false;
        loop {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, workers.join_next()).await,
                None => Ok(workers.join_next().await),
            };
            match joined {
                // Dropping the `JoinSet` aborts the remaining workers.
                Err(_elapsed) => return Err(BatchError::WaitTimeout(self.wait_timeout)),
                Ok(None) => break,
                Ok(Some(Ok(chunk_outcomes))) => outcomes.extend(chunk_outcomes),
                Ok(Some(Err(join_err))) => {
                    debug!("Worker did not finish: {join_err}");
                    panicked = true;
                }
            }
        }

        if panicked {
            return Err(BatchError::Panic);
        }

        outcomes.sort_by_key(|(index, _)| *index);
        debug_assert_eq!(outcomes.len(), count, "every element should have an outcome");

        outcomes
            .into_iter()
            .map(|(index, outcome)| match outcome {
                Ok(outcome) => Ok(WorkResult::from_outcome(index, outcome)),
                Err(error) => Err(BatchError::WorkFailed { index, error }),
            })
            .collect()
    }
}

struct Worker<W: Work> {
    work: Arc<W>,
    params: Arc<Params>,
    flags: Arc<CancelFlags>,
    output: OutputSink,
    count: usize,
    queue: SubmissionQueue<W::Element>,
}

impl<W: Work> Worker<W> {
    async fn run(self) -> ChunkOutcomes<W::Payload, W::Error> {
        let mut outcomes = Vec::new();

        while let Some(chunk) = self.next_chunk() {
            for (index, element) in chunk {
                let item = WorkItem::new(
                    element,
                    index,
                    self.count,
                    CancelToken::new(Arc::clone(&self.flags), index),
                    None,
                    Arc::clone(&self.params),
                );
                let outcome = call_with_captured_output(&*self.work, item, &self.output).await;
                outcomes.push((index, outcome));
            }
        }

        outcomes
    }

    fn next_chunk(&self) -> Option<Chunk<W::Element>> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

fn submit<E>(elements: Vec<(usize, E)>, chunk_size: usize) -> SubmissionQueue<E> {
    let chunk_size = chunk_size.max(1);

    let mut chunks = VecDeque::new();
    let mut elements = elements.into_iter().peekable();
    while elements.peek().is_some() {
        chunks.push_back(elements.by_ref().take(chunk_size).collect());
    }

    Arc::new(Mutex::new(chunks))
}
