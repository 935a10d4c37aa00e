use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::warn;

/// Output captured from a single work unit.
///
/// Write to it with [`write!`] / [`writeln!`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    buf: String,
}

impl Output {
    /// Everything written so far.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl fmt::Write for Output {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        Ok(())
    }
}

/// Where captured output ends up.
///
/// Cheap to clone. Clones share the same writer.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<dyn Write + Send>>,
}

impl OutputSink {
    /// Write captured output to `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write captured output to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Discard captured output.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Write the output of one work unit in a single piece.
    ///
    /// Failing to write is not fatal to the batch.
    pub(crate) fn flush_captured(&self, index: usize, output: &Output) {
        if output.is_empty() {
            return;
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writer
            .write_all(output.as_str().as_bytes())
            .and_then(|()| writer.flush())
        {
            warn!(work.index = index as u64, "Unable to write captured output: {err}");
        }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}
