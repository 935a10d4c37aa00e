//! Deferring interrupts until a safe point.

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use tracing::debug;

/// Where an interrupt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[non_exhaustive]
pub enum Interrupt {
    /// SIGINT, or Ctrl-C on a console.
    CtrlC = 1,
    /// SIGTERM.
    Terminate = 2,
    /// Raised programmatically, e.g. through an [`InterruptSource`](crate::InterruptSource).
    Requested = 3,
}

impl Interrupt {
    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            1 => Interrupt::CtrlC,
            2 => Interrupt::Terminate,
            _ => Interrupt::Requested,
        }
    }
}

/// What happens when an interrupt is delivered to an unmasked gate.
pub type InterruptHandler = Box<dyn Fn(Interrupt) + Send + Sync>;

const UNMASKED: u8 = 0;
const MASKED: u8 = 0b01;
const PENDING: u8 = 0b10;

/// A switch which can hold back an asynchronous interrupt.
///
/// While unmasked, every delivered [`Interrupt`] is passed straight to the handler. While masked,
/// the interrupt is captured instead: at most one occurrence is remembered, and it is replayed to
/// the handler exactly once when the gate is unmasked again.
///
/// Delivery may happen from any thread or task at any time, so all state transitions are
/// lock-free.
pub struct InterruptGate {
    /// `MASKED`, optionally with `PENDING`. `PENDING` is never set without `MASKED`.
    state: AtomicU8,
    /// The captured interrupt. Only meaningful while `state` has `PENDING` set.
    pending: AtomicU8,
    handler: InterruptHandler,
}

impl InterruptGate {
    /// Create an unmasked gate which passes interrupts to `handler`.
    pub fn new(handler: impl Fn(Interrupt) + Send + Sync + 'static) -> Self {
        Self {
            state: AtomicU8::new(UNMASKED),
            pending: AtomicU8::new(0),
            handler: Box::new(handler),
        }
    }

    /// Start capturing interrupts instead of handling them.
    ///
    /// Returns `false` if the gate was already masked, in which case nothing changes.
    pub fn mask(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(UNMASKED, MASKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            debug!("Interrupts masked");
        }
        changed
    }

    /// Stop capturing interrupts, then replay a captured interrupt if there is one.
    ///
    /// The handler runs synchronously on the calling thread, after the gate has been unmasked.
    ///
    /// Returns `false` if the gate was not masked, in which case nothing changes.
    pub fn unmask(&self) -> bool {
        let previous = self.state.swap(UNMASKED, Ordering::AcqRel);
        if previous & MASKED == 0 {
            return false;
        }
        debug!("Interrupts unmasked");

        if previous & PENDING != 0 {
            let interrupt = Interrupt::from_code(self.pending.load(Ordering::Acquire));
            debug!(?interrupt, "Delivering delayed interrupt");
            (self.handler)(interrupt);
        }
        true
    }

    /// Deliver an interrupt to the gate.
    ///
    /// Handled immediately when unmasked, otherwise captured until the next [`unmask`](Self::unmask).
    pub fn deliver(&self, interrupt: Interrupt) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & MASKED == 0 {
                (self.handler)(interrupt);
                return;
            }

            // Overwriting an earlier capture is fine, only one replay happens either way.
            self.pending.store(interrupt as u8, Ordering::Release);
            match self.state.compare_exchange_weak(
                state,
                MASKED | PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(?interrupt, "Interrupt received while masked, delaying delivery");
                    return;
                }
                Err(actual) => state = actual,
            }
        }
    }

    /// Whether interrupts are currently being captured.
    pub fn is_masked(&self) -> bool {
        self.state.load(Ordering::Acquire) & MASKED != 0
    }

    /// Whether a captured interrupt is waiting to be replayed.
    pub fn has_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) & PENDING != 0
    }
}

impl fmt::Debug for InterruptGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptGate")
            .field("masked", &self.is_masked())
            .field("pending", &self.has_pending())
            .finish_non_exhaustive()
    }
}
