// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blocking pipe ends with fixed-size integer framing.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use crate::error::WireError;

/// Creates a pipe whose ends are closed on `exec`.
pub fn pipe() -> Result<(PipeReader, PipeWriter), WireError> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid two-element array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(WireError::Io(io::Error::last_os_error()));
    }
    // SAFETY: both descriptors were just returned by pipe(2) and are owned here.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        // SAFETY: valid descriptor.
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(WireError::Io(io::Error::last_os_error()));
        }
    }
    Ok((
        PipeReader {
            file: File::from(read),
            timeout: None,
        },
        PipeWriter {
            file: File::from(write),
        },
    ))
}

/// The reading end of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    file: File,
    timeout: Option<Duration>,
}

impl PipeReader {
    /// Bounds every subsequent read. `None` blocks indefinitely.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fills `buf`, failing with [`WireError::Closed`] on end of file.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), WireError> {
        let deadline = self.timeout.map(|t| (t, Instant::now() + t));
        let mut filled = 0;
        while filled < buf.len() {
            if let Some((timeout, deadline)) = deadline {
                self.wait_readable(timeout, deadline)?;
            }
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => return Err(WireError::Closed),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::Io(e)),
            }
        }
        Ok(())
    }

    /// Reads one byte, returning `None` on a clean end of file.
    pub fn read_byte(&mut self) -> Result<Option<u8>, WireError> {
        let mut b = [0u8; 1];
        match self.read_exact(&mut b) {
            Ok(()) => Ok(Some(b[0])),
            Err(WireError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn wait_readable(&self, timeout: Duration, deadline: Instant) -> Result<(), WireError> {
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(WireError::Timeout(timeout));
            }
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ms = left.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
            // SAFETY: `pfd` is a valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
            match rc {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(WireError::Io(err));
                    }
                }
                0 => continue,
                // Readable, or hung up; the read reports which.
                _ => return Ok(()),
            }
        }
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// The writing end of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
}

impl PipeWriter {
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), WireError> {
        match self.file.write_all(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(WireError::Closed),
            Err(e) => Err(WireError::Io(e)),
        }
    }

    pub fn write_byte(&mut self, b: u8) -> Result<(), WireError> {
        self.write_all(&[b])
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), WireError> {
        self.write_all(&v.to_le_bytes())
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
