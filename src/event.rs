//! Completion event for the producer/consumer hand-off
//!
//! A binary wait/signal pair: `wait` blocks until `signal` has been called at
//! least once since the last successful wait. Both calls act as a full
//! ordering fence, which is what lets the input buffer keep its shared cursor
//! on relaxed atomics. Uses eventfd on Linux, a condition variable elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

#[cfg(not(target_os = "linux"))]
use std::sync::{Condvar, Mutex};

#[cfg(target_os = "linux")]
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
    sys::eventfd::{eventfd, EfdFlags},
    unistd,
};

use crate::error::{LogpipeError, Result};

/// Binary completion event with full-fence wait/signal semantics
#[derive(Debug)]
pub struct CompletionEvent {
    /// Event file descriptor for Linux eventfd notifications
    #[cfg(target_os = "linux")]
    event_fd: OwnedFd,
    /// Fallback condition variable for non-Linux systems
    #[cfg(not(target_os = "linux"))]
    signalled: Mutex<bool>,
    #[cfg(not(target_os = "linux"))]
    condvar: Condvar,
    /// Statistics
    signal_count: AtomicU64,
    wait_count: AtomicU64,
}

impl CompletionEvent {
    /// Create a new completion event
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        let event_fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|e| LogpipeError::platform(format!("failed to create eventfd: {}", e)))?;

        Ok(Self {
            #[cfg(target_os = "linux")]
            event_fd,
            #[cfg(not(target_os = "linux"))]
            signalled: Mutex::new(false),
            #[cfg(not(target_os = "linux"))]
            condvar: Condvar::new(),
            signal_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        })
    }

    /// Signal the event, waking the waiter if one is blocked.
    ///
    /// Multiple signals between waits coalesce into one. Never blocks.
    pub fn signal(&self) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);

        #[cfg(target_os = "linux")]
        {
            let buf = 1u64.to_ne_bytes();
            match unistd::write(self.event_fd.as_raw_fd(), &buf) {
                Ok(_) => {}
                // Counter saturated; the waiter is already runnable.
                Err(Errno::EAGAIN) => {}
                Err(_) => {}
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let mut signalled = self.signalled.lock().unwrap();
            *signalled = true;
            self.condvar.notify_all();
        }
    }

    /// Block until the event has been signalled since the last successful
    /// wait, then clear it.
    ///
    /// Unexpected poll failures are treated as spurious wakeups; every caller
    /// re-checks its condition in a loop.
    pub fn wait(&self) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);

        #[cfg(target_os = "linux")]
        {
            loop {
                let mut fds = [PollFd::new(&self.event_fd, PollFlags::POLLIN)];
                match poll(&mut fds, -1) {
                    Ok(n) if n > 0 => {
                        // Clear the eventfd by reading its counter
                        let mut buf = [0u8; 8];
                        let _ = unistd::read(self.event_fd.as_raw_fd(), &mut buf);
                        return;
                    }
                    Ok(_) => continue,
                    Err(Errno::EINTR) => continue,
                    Err(_) => return,
                }
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let signalled = self.signalled.lock().unwrap();
            let mut signalled = self
                .condvar
                .wait_while(signalled, |s| !*s)
                .unwrap();
            *signalled = false;
        }
    }

    /// Get the file descriptor for external polling (Linux only)
    #[cfg(target_os = "linux")]
    pub fn event_fd(&self) -> RawFd {
        self.event_fd.as_raw_fd()
    }

    /// Get wait/signal statistics
    pub fn stats(&self) -> EventStats {
        EventStats {
            signal_count: self.signal_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a completion event
#[derive(Debug, Clone)]
pub struct EventStats {
    /// Number of signals issued
    pub signal_count: u64,
    /// Number of waits performed
    pub wait_count: u64,
}
