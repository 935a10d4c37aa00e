//! Apply a unit of work to every element of a batch, without letting Ctrl-C tear anything down
//! half way through.
//!
//! An [`Executor`] runs a [`Work`] implementation against each element of a batch, either one at
//! a time or on a fixed-size pool of worker tasks. Results come back in input order, one per
//! element.
//!
//! Interrupts (SIGINT, SIGTERM, or triggered programmatically through an [`InterruptSource`]) are
//! turned into cooperative cancellation. In sequential mode they are held back by an
//! [`InterruptGate`] while each work unit runs, and only take effect between elements. In
//! concurrent mode they request cancellation of every element, but running work units are left
//! to finish.
//!
//! Work units can also cancel the rest of a sequential batch themselves, by returning
//! [`Outcome::cancelled()`].
//!
//! See the README for an example.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod batch;
pub mod error;
mod executor;
mod gate;
mod interrupts;
mod output;
mod policies;
mod pool;
mod scoped;
#[cfg(unix)]
mod signals;
mod work;

pub use batch::{BatchResult, WorkResult};
pub use error::BatchError;
pub use executor::{Executor, DEFAULT_WAIT_TIMEOUT};
pub use gate::{Interrupt, InterruptGate, InterruptHandler};
pub use interrupts::{InterruptSource, Interrupts};
pub use output::{Output, OutputSink};
pub use policies::{Mode, OnCancel, Order};
pub use scoped::{ScopedMask, ScopedUnmask};
pub use work::{CancelToken, Outcome, Params, Status, Work, WorkItem};
