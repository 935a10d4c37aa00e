//! RAII guards which mask or unmask an [`InterruptGate`] for the duration of a scope.
//!
//! Both guards accept an optional gate. Without one they do nothing, so code can be written once
//! and run with or without interrupt masking.

use std::panic::{self, AssertUnwindSafe};

use crate::gate::InterruptGate;

/// Masks the gate until dropped.
///
/// When dropped, the gate is unmasked (replaying any captured interrupt) only if this guard was
/// the one which masked it.
#[derive(Debug)]
#[must_use = "the gate is unmasked again as soon as the guard is dropped"]
pub struct ScopedMask<'a> {
    gate: Option<&'a InterruptGate>,
    changed: bool,
}

/// Unmasks the gate until dropped.
///
/// Opens an interruptible window inside a masked region: interrupts arriving while the guard is
/// alive are handled straight away. When dropped, the gate is masked again only if this guard was
/// the one which unmasked it.
#[derive(Debug)]
#[must_use = "the gate is masked again as soon as the guard is dropped"]
pub struct ScopedUnmask<'a> {
    gate: Option<&'a InterruptGate>,
    changed: bool,
}

impl<'a> ScopedMask<'a> {
    /// Mask `gate`, if there is one.
    pub fn enter(gate: Option<&'a InterruptGate>) -> Self {
        let changed = gate.is_some_and(InterruptGate::mask);
        Self { gate, changed }
    }
}

impl Drop for ScopedMask<'_> {
    fn drop(&mut self) {
        if let (true, Some(gate)) = (self.changed, self.gate) {
            gate.unmask();
        }
    }
}

impl<'a> ScopedUnmask<'a> {
    /// Unmask `gate`, if there is one.
    ///
    /// Unmasking replays any captured interrupt, which runs the gate's handler. If that panics,
    /// the gate is masked again before the panic continues.
    pub fn enter(gate: Option<&'a InterruptGate>) -> Self {
        let Some(gate) = gate else {
            return Self {
                gate: None,
                changed: false,
            };
        };

        match panic::catch_unwind(AssertUnwindSafe(|| gate.unmask())) {
            Ok(changed) => Self {
                gate: Some(gate),
                changed,
            },
            Err(payload) => {
                // The gate was already unmasked when the handler ran.
                gate.mask();
                panic::resume_unwind(payload)
            }
        }
    }
}

impl Drop for ScopedUnmask<'_> {
    fn drop(&mut self) {
        if let (true, Some(gate)) = (self.changed, self.gate) {
            gate.mask();
        }
    }
}
