//! SIGINT and SIGTERM handling, installed only while at least one batch listens for them.
//!
//! The signal handler writes one byte per signal into a pipe owned by each listening batch. Once
//! the last listener is gone, the dispositions which were in place beforehand are restored, so
//! Ctrl-C terminates the process again.

use std::{
    io, mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr,
    sync::{
        atomic::{AtomicI32, Ordering},
        Mutex, PoisonError,
    },
};

use tokio::net::unix::pipe;
use tracing::{debug, warn};

use crate::gate::Interrupt;

const SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

const MAX_LISTENERS: usize = 64;

/// Write ends of the listeners' pipes. `-1` marks a free slot.
static SLOTS: [AtomicI32; MAX_LISTENERS] = [const { AtomicI32::new(-1) }; MAX_LISTENERS];

static INSTALLED: Mutex<Option<Installed>> = Mutex::new(None);

struct Installed {
    listeners: usize,
    /// Same order as `SIGNALS`.
    previous: [libc::sigaction; 2],
}

/// Keeps the handler installed until dropped.
#[derive(Debug)]
pub(crate) struct Registration {
    slot: usize,
    // Closed only after the slot has been released.
    _write: OwnedFd,
}

/// Receives the signals caught while the matching [`Registration`] is alive.
#[derive(Debug)]
pub(crate) struct Listener {
    receiver: pipe::Receiver,
}

/// Start listening for SIGINT and SIGTERM.
///
/// The first listener installs the handler, remembering the dispositions it replaces.
pub(crate) fn listen() -> io::Result<(Registration, Listener)> {
    let (read, write) = nonblocking_pipe()?;
    let receiver = pipe::Receiver::from_owned_fd(read)?;

    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);

    let slot = SLOTS
        .iter()
        .position(|slot| {
            slot.compare_exchange(-1, write.as_raw_fd(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
        .ok_or_else(|| io::Error::other("too many batches listening for OS signals"))?;

    match installed.as_mut() {
        Some(installed) => installed.listeners += 1,
        None => match install() {
            Ok(previous) => {
                *installed = Some(Installed {
                    listeners: 1,
                    previous,
                })
            }
            Err(err) => {
                SLOTS[slot].store(-1, Ordering::Release);
                return Err(err);
            }
        },
    }

    Ok((
        Registration {
            slot,
            _write: write,
        },
        Listener { receiver },
    ))
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        SLOTS[self.slot].store(-1, Ordering::Release);

        if let Some(state) = installed.as_mut() {
            state.listeners -= 1;
            if state.listeners == 0 {
                restore(&SIGNALS, &state.previous);
                *installed = None;
                debug!("Restored previous SIGINT and SIGTERM handling");
            }
        }
    }
}

impl Listener {
    /// The next signal, or `None` once the pipe is broken.
    pub(crate) async fn recv(&mut self) -> Option<Interrupt> {
        let mut byte = [0u8; 1];
        loop {
            if let Err(err) = self.receiver.readable().await {
                debug!("Signal pipe failed: {err}");
                return None;
            }
            match self.receiver.try_read(&mut byte) {
                Ok(0) => return None,
                Ok(_) => return Some(Interrupt::from_code(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    debug!("Signal pipe failed: {err}");
                    return None;
                }
            }
        }
    }
}

extern "C" fn on_signal(signal: libc::c_int) {
    let code = if signal == libc::SIGTERM {
        Interrupt::Terminate as u8
    } else {
        Interrupt::CtrlC as u8
    };

    for slot in &SLOTS {
        let fd = slot.load(Ordering::Acquire);
        if fd >= 0 {
            // A full pipe already has a signal waiting, so a failed write loses nothing.
            unsafe { libc::write(fd, ptr::addr_of!(code).cast(), 1) };
        }
    }
}

fn install() -> io::Result<[libc::sigaction; 2]> {
    // SAFETY: `sigaction` is plain old data, and all zeroes is a valid value.
    let mut previous: [libc::sigaction; 2] = unsafe { mem::zeroed() };

    for (i, signal) in SIGNALS.iter().enumerate() {
        // SAFETY: as above.
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_signal as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;

        // SAFETY: both pointers are valid for the duration of the calls. `on_signal` only does
        // atomic loads and `write`, which are async-signal-safe.
        let failed = unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(*signal, &action, &mut previous[i]) != 0
        };
        if failed {
            let err = io::Error::last_os_error();
            restore(&SIGNALS[..i], &previous[..i]);
            return Err(err);
        }
    }

    debug!("Installed SIGINT and SIGTERM handlers");
    Ok(previous)
}

fn restore(signals: &[libc::c_int], previous: &[libc::sigaction]) {
    for (signal, action) in signals.iter().zip(previous) {
        // SAFETY: `action` was filled in by a successful `sigaction` call.
        if unsafe { libc::sigaction(*signal, action, ptr::null_mut()) } != 0 {
            warn!(
                signal,
                "Unable to restore signal handling: {}",
                io::Error::last_os_error()
            );
        }
    }
}

fn nonblocking_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for both descriptors.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created, and nothing else owns them.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    for fd in [&read, &write] {
        let fd = fd.as_raw_fd();
        // SAFETY: `fd` is open for the duration of these calls.
        let failed = unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            flags < 0
                || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0
                || libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0
        };
        if failed {
            return Err(io::Error::last_os_error());
        }
    }

    Ok((read, write))
}
