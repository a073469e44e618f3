// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forking a worker process.
//!
//! The child never returns into the caller's code: it detaches from the
//! parent's stdin and logging, runs the command loop on its half of the
//! channel, and leaves through `_exit` so no parent-owned destructor or
//! `atexit` handler runs twice.

use std::ffi::CString;
use std::io;

use forkdb_core::{Engine, EvictionPolicy, ForkDbError, WorkerId};
use forkdb_wire::{Channel, ChannelParts, Endpoint};

use crate::command_loop::CommandLoop;
use crate::sessions::SessionTable;

/// Longest name `PR_SET_NAME` keeps, excluding the terminator.
const MAX_TITLE_LEN: usize = 15;

/// Settings the child needs at startup.
#[derive(Debug, Clone)]
pub struct ChildOptions {
    pub process_title: String,
    pub session_capacity: usize,
    pub eviction: EvictionPolicy,
}

/// A freshly forked worker, seen from the parent.
pub struct Spawned {
    pub pid: libc::pid_t,
    pub channel: Channel,
}

/// Forks a child serving `worker` over `parts`.
pub fn spawn_worker<E: Engine>(
    engine: &E,
    worker: WorkerId,
    parts: ChannelParts,
    options: &ChildOptions,
) -> Result<Spawned, ForkDbError> {
    let (channel, endpoint) = parts.split(worker);
    // SAFETY: getpid has no preconditions.
    let parent = unsafe { libc::getpid() };

    // SAFETY: the child branch only runs the command loop and exits with
    // `_exit`; it never unwinds into the caller.
    match unsafe { libc::fork() } {
        -1 => Err(ForkDbError::channel(worker, io::Error::last_os_error())),
        0 => {
            drop(channel);
            child_main(engine, worker, endpoint, parent, options)
        }
        pid => {
            drop(endpoint);
            Ok(Spawned { pid, channel })
        }
    }
}

fn child_main<E: Engine>(
    engine: &E,
    worker: WorkerId,
    endpoint: Endpoint,
    parent: libc::pid_t,
    options: &ChildOptions,
) -> ! {
    // The parent's subscriber may hold locks or buffered writers.
    let _quiet = tracing::subscriber::set_default(tracing::subscriber::NoSubscriber::default());

    reset_signals();
    die_with_parent();
    set_process_title(&options.process_title, worker);
    detach_stdin();

    let code = match endpoint.shared_buffer().cancel_epoch() {
        Ok(epoch) => {
            let sessions =
                SessionTable::new(options.session_capacity, options.eviction, epoch);
            CommandLoop::new(engine, endpoint, sessions, Some(parent))
                .run()
                .code()
        }
        Err(_) => 1,
    };

    // SAFETY: terminates only this process, skipping inherited destructors.
    unsafe { libc::_exit(code) }
}

fn reset_signals() {
    // SAFETY: restoring default dispositions has no preconditions.
    unsafe {
        libc::signal(libc::SIGTERM, libc::SIG_DFL);
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

#[cfg(target_os = "linux")]
fn die_with_parent() {
    // SAFETY: PR_SET_PDEATHSIG takes a signal number and no pointers.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
    }
}

#[cfg(not(target_os = "linux"))]
fn die_with_parent() {}

/// `"{title} {worker}"`, cut to what the kernel keeps.
pub fn process_title(title: &str, worker: WorkerId) -> String {
    let mut name = format!("{title} {worker}");
    let mut end = name.len().min(MAX_TITLE_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.truncate(end);
    name
}

#[cfg(target_os = "linux")]
fn set_process_title(title: &str, worker: WorkerId) {
    if let Ok(name) = CString::new(process_title(title, worker)) {
        // SAFETY: `name` is a valid NUL-terminated string of at most 16 bytes.
        unsafe {
            libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_process_title(_title: &str, _worker: WorkerId) {}

fn detach_stdin() {
    let Ok(devnull) = CString::new("/dev/null") else {
        return;
    };
    // SAFETY: plain descriptor calls on a path we own.
    unsafe {
        let fd = libc::open(devnull.as_ptr(), libc::O_RDONLY);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            if fd != libc::STDIN_FILENO {
                libc::close(fd);
            }
        }
    }
}
