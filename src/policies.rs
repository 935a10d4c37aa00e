use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// How work units are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Mode {
    /// One element at a time, on the calling task.
    ///
    /// Interrupts are masked while each work unit runs, and only take effect between elements
    /// (or inside a window opened with
    /// [`WorkItem::unmask_interrupts()`](crate::WorkItem::unmask_interrupts)).
    ///
    /// When a work unit returns [`Status::Cancel`](crate::Status::Cancel), every later element
    /// sees a cancellation request, see [`OnCancel`].
    #[default]
    Sequential,

    /// On a fixed-size pool of worker tasks.
    ///
    /// Interrupts are not masked. An interrupt requests cancellation of every element, but work
    /// units which are already running are left to finish.
    Concurrent,
}

/// The order elements are dispatched in.
///
/// Results are always returned in input order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Order {
    /// Input order.
    #[default]
    Input,

    /// A random permutation. With a seed, the permutation is reproducible.
    Random {
        /// Seed for the permutation.
        seed: Option<u64>,
    },
}

/// What to do with the remaining elements once a sequential work unit is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum OnCancel {
    /// Keep dispatching, with a cancellation request. Work units decide for themselves whether to
    /// stop.
    #[default]
    Continue,

    /// Stop dispatching. Remaining elements are reported as cancelled without being run.
    Stop,
}

impl Order {
    pub(crate) fn arrange<T>(&self, items: &mut [T]) {
        match self {
            Order::Input => {}
            Order::Random { seed: Some(seed) } => {
                items.shuffle(&mut StdRng::seed_from_u64(*seed));
            }
            Order::Random { seed: None } => {
                items.shuffle(&mut rand::rng());
            }
        }
    }
}
