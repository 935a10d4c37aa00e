#![allow(dead_code)]

use std::{
    fmt::Write as _,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use interruptible_batch::{
    Executor, Interrupt, InterruptGate, InterruptSource, Outcome, Output, Status, Work, WorkItem,
};

/// One element of a test batch, scripted to finish in a particular way.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub status: Status,
    pub delay: Duration,
    pub fail: bool,
    pub panic: bool,
}

impl Job {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Ok,
            delay: Duration::ZERO,
            fail: false,
            panic: false,
        }
    }

    pub fn cancel(name: &str) -> Self {
        Self {
            status: Status::Cancel,
            ..Self::ok(name)
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name)
        }
    }

    pub fn panicking(name: &str) -> Self {
        Self {
            panic: true,
            ..Self::ok(name)
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

/// Builds `count` jobs named `job-0`, `job-1`, ...
pub fn jobs(count: usize) -> Vec<Job> {
    (0..count).map(|i| Job::ok(&format!("job-{i}"))).collect()
}

/// What a work unit saw when it was called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub index: usize,
    pub count: usize,
    pub cancel_requested: bool,
    /// `None` when the work unit was not given a gate.
    pub gate_masked: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<Call>>>);

impl Calls {
    pub fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn all(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.all().into_iter().map(|c| c.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<Call> {
        self.all().into_iter().find(|c| c.name == name)
    }
}

/// Does what each [`Job`] says, recording every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWork {
    pub calls: Calls,
    /// Return `Cancel` straight away when cancellation has been requested.
    pub honour_cancel: bool,
    /// Keep a reference to the gate, to inspect it after the batch.
    pub gate: Arc<Mutex<Option<Arc<InterruptGate>>>>,
}

impl ScriptedWork {
    pub fn honouring_cancel() -> Self {
        Self {
            honour_cancel: true,
            ..Self::default()
        }
    }

    pub fn gate_is_masked(&self) -> Option<bool> {
        self.gate.lock().unwrap().as_ref().map(|g| g.is_masked())
    }
}

impl Work for ScriptedWork {
    type Element = Job;
    type Payload = String;
    type Error = String;

    async fn process(
        &self,
        item: WorkItem<Job>,
        output: &mut Output,
    ) -> Result<Outcome<String>, String> {
        let cancel_requested = item.is_cancel_requested();
        let job = item.element().clone();

        self.calls.record(Call {
            name: job.name.clone(),
            index: item.index(),
            count: item.count(),
            cancel_requested,
            gate_masked: item.gate().map(|g| g.is_masked()),
        });

        if let Some(gate) = item.gate() {
            *self.gate.lock().unwrap() = Some(Arc::clone(gate));
        }

        if self.honour_cancel && cancel_requested {
            return Ok(Outcome::cancelled());
        }

        writeln!(output, "{}: start", job.name).unwrap();
        if !job.delay.is_zero() {
            tokio::time::sleep(job.delay).await;
        }
        writeln!(output, "{}: end", job.name).unwrap();

        if job.panic {
            panic!("{} panicked", job.name);
        }
        if job.fail {
            return Err(format!("{} failed", job.name));
        }

        Ok(Outcome::new(job.status, Some(format!("{} processed", job.name))))
    }
}

/// Triggers an interrupt while processing one element.
#[derive(Debug, Clone)]
pub struct InterruptingWork {
    pub calls: Calls,
    pub source: InterruptSource,
    pub interrupt_at: usize,
    /// Open an interruptible window around the interrupt.
    pub unmask: bool,
}

impl Work for InterruptingWork {
    type Element = Job;
    type Payload = bool;
    type Error = String;

    /// The payload is whether the cancellation request was visible after the interrupt.
    async fn process(
        &self,
        item: WorkItem<Job>,
        _output: &mut Output,
    ) -> Result<Outcome<bool>, String> {
        self.calls.record(Call {
            name: item.element().name.clone(),
            index: item.index(),
            count: item.count(),
            cancel_requested: item.is_cancel_requested(),
            gate_masked: item.gate().map(|g| g.is_masked()),
        });

        if item.index() != self.interrupt_at {
            return Ok(Outcome::ok(item.is_cancel_requested()));
        }

        let _window = self.unmask.then(|| item.unmask_interrupts());

        self.source.trigger(Interrupt::Requested);
        // Give the forwarding task a chance to deliver it.
        tokio::time::sleep(Duration::from_millis(1)).await;

        if item.is_cancel_requested() {
            Ok(Outcome::new(Status::Cancel, Some(true)))
        } else {
            Ok(Outcome::ok(false))
        }
    }
}

/// An in-memory writer which can be inspected after the batch.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.0.lock().unwrap(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct NotCloneable {}

#[derive(Debug, Clone)]
struct WorkWithNonCloneableIO;

impl Work for WorkWithNonCloneableIO {
    type Element = NotCloneable;
    type Payload = NotCloneable;
    type Error = String;

    async fn process(
        &self,
        item: WorkItem<NotCloneable>,
        _output: &mut Output,
    ) -> Result<Outcome<NotCloneable>, String> {
        Ok(Outcome::ok(item.into_element()))
    }
}

/// An [Executor] should accept elements and payloads which can't be cloned.
#[allow(unused)]
fn accepts_non_cloneable_elements() -> Executor<WorkWithNonCloneableIO> {
    Executor::builder()
        .name("non_cloneable")
        .work(WorkWithNonCloneableIO)
        .build()
}
