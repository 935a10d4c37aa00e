//! Where interrupts come from.
//!
//! Each batch gets its own [`InterruptGate`]. For the duration of the batch, background tasks
//! forward interrupts from the configured sources into the gate.

use std::{io, sync::Arc};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::debug;

use crate::gate::{Interrupt, InterruptGate};
#[cfg(unix)]
use crate::signals;

/// Triggers interrupts programmatically.
///
/// Useful for tests, or for a supervising task which wants to stop a batch the same way an
/// operator pressing Ctrl-C would.
///
/// Cheap to clone. Clones trigger the same batches.
#[derive(Debug, Clone)]
pub struct InterruptSource {
    tx: broadcast::Sender<Interrupt>,
}

impl InterruptSource {
    /// Create a new source. Nothing listens to it until it is passed to an executor.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    /// Interrupt every batch currently listening to this source.
    pub fn trigger(&self, interrupt: Interrupt) {
        if self.tx.send(interrupt).is_err() {
            debug!(?interrupt, "Interrupt triggered but no batch is listening");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Interrupt> {
        self.tx.subscribe()
    }
}

impl Default for InterruptSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Which interrupts a batch listens to.
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    os_signals: bool,
    source: Option<InterruptSource>,
}

impl Interrupts {
    /// Don't listen to any interrupts.
    pub fn none() -> Self {
        Self::default()
    }

    /// Listen to SIGINT and SIGTERM (Ctrl-C on Windows).
    ///
    /// While a batch is running, these signals no longer terminate the process. On Unix, the
    /// previous handling is restored once no batch is listening any more. On Windows, the console
    /// handler stays installed for the rest of the process.
    pub fn os_signals() -> Self {
        Self::none().with_os_signals()
    }

    /// Also listen to SIGINT and SIGTERM (Ctrl-C on Windows).
    pub fn with_os_signals(self) -> Self {
        Self {
            os_signals: true,
            ..self
        }
    }

    /// Also listen to `source`.
    pub fn with_source(self, source: InterruptSource) -> Self {
        Self {
            source: Some(source),
            ..self
        }
    }

    /// Start forwarding interrupts into `gate`.
    ///
    /// Forwarding stops when the returned value is dropped.
    pub(crate) fn install(&self, gate: &Arc<InterruptGate>) -> io::Result<Forwarders> {
        let mut forwarders = Forwarders::default();

        if self.os_signals {
            forward_os_signals(&mut forwarders, Arc::clone(gate))?;
        }

        if let Some(source) = &self.source {
            // Subscribe now rather than inside the task, so nothing triggered from here on is missed.
            let mut rx = source.subscribe();
            let gate = Arc::clone(gate);
            forwarders.handles.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(interrupt) => gate.deliver(interrupt),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Interrupt listener lagged");
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }));
        }

        Ok(forwarders)
    }
}

/// Aborts the forwarding tasks when dropped.
#[derive(Debug, Default)]
pub(crate) struct Forwarders {
    handles: Vec<JoinHandle<()>>,
    /// Dropped after the tasks have been aborted.
    #[cfg(unix)]
    signals: Option<signals::Registration>,
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(unix)]
fn forward_os_signals(forwarders: &mut Forwarders, gate: Arc<InterruptGate>) -> io::Result<()> {
    let (registration, mut listener) = signals::listen()?;

    forwarders.handles.push(tokio::spawn(async move {
        while let Some(interrupt) = listener.recv().await {
            gate.deliver(interrupt);
        }
    }));
    forwarders.signals = Some(registration);

    Ok(())
}

#[cfg(windows)]
fn forward_os_signals(forwarders: &mut Forwarders, gate: Arc<InterruptGate>) -> io::Result<()> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    forwarders.handles.push(tokio::spawn(async move {
        while let Some(()) = ctrl_c.recv().await {
            gate.deliver(Interrupt::CtrlC);
        }
    }));

    Ok(())
}
