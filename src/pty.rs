//! The pseudo-terminal interface consumed by the terminal core.
//!
//! Spawning and reaping the child belong to the embedder; the core only
//! needs non-blocking reads and writes against the master side, plus window
//! size propagation. `Ok(0)` from `read`/`write` means the call would have
//! blocked; the embedder is expected to wait for readiness before calling
//! again.

use rustix::io::Errno;
use std::os::fd::{AsFd, OwnedFd};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TtyError {
    /// The child exited; carries the exit status when known.
    #[error("child exited with status {0}")]
    Exited(i32),
    /// An unrecoverable I/O error on the master fd.
    #[error("pty I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Non-blocking pty access.
pub trait Tty {
    /// Reads available bytes. `Ok(0)` means the read would block.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TtyError>;

    /// Writes bytes. `Ok(0)` means the write would block; partial writes
    /// are normal.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TtyError>;

    /// Propagates the window size to the child.
    fn resize(&mut self, rows: u16, cols: u16) -> Result<(), TtyError>;
}

/// A `Tty` over an already-open, non-blocking pty master fd.
pub struct MasterTty {
    master: OwnedFd,
}

impl MasterTty {
    /// Wraps a master fd. The fd must already be in non-blocking mode.
    pub fn new(master: OwnedFd) -> Self {
        Self { master }
    }
}

impl Tty for MasterTty {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TtyError> {
        match rustix::io::read(&self.master, buf) {
            Ok(0) => Err(TtyError::Exited(0)), // EOF: the slave side is gone
            Ok(n) => Ok(n),
            Err(Errno::AGAIN) => Ok(0),
            // EIO is how Linux reports a vanished session leader.
            Err(Errno::IO) => Err(TtyError::Exited(0)),
            Err(e) => Err(TtyError::Io(e.into())),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TtyError> {
        match rustix::io::write(&self.master, buf) {
            Ok(n) => Ok(n),
            Err(Errno::AGAIN) => Ok(0),
            Err(e) => Err(TtyError::Io(e.into())),
        }
    }

    fn resize(&mut self, rows: u16, cols: u16) -> Result<(), TtyError> {
        let winsize = rustix::termios::Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        rustix::termios::tcsetwinsize(self.master.as_fd(), winsize)
            .map_err(|e| TtyError::Io(e.into()))
    }
}
