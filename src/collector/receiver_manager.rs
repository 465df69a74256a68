// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Spawns the reporter sidecar.
//!
//! The reporter is forked at setup time, while the process is still
//! healthy: forking from a signal handler would have to dodge atfork
//! handlers and allocator locks. The child shares our executable image, so
//! symbolication over there sees the same binaries the crash happened in.

use crate::receiver;
use crate::shared::configuration::CrashOptions;
use nix::unistd::{fork, pipe, ForkResult};
use std::os::unix::io::{IntoRawFd, RawFd};

#[derive(Debug, thiserror::Error)]
pub enum ReporterSpawnError {
    #[error("Failed to create the crash pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("Failed to fork the crash reporter: {0}")]
    Fork(#[source] nix::Error),
}

/// The victim's handle on its reporter: the write end of the pipe and the
/// child to reap.
#[derive(Debug, Clone, Copy)]
pub struct ReporterHandle {
    pub fd: RawFd,
    pub pid: libc::pid_t,
}

/// Creates the crash pipe and forks the reporter. The child never returns:
/// it closes stdin/stdout, serves one crash record, and exits.
pub fn spawn_reporter(options: &CrashOptions) -> Result<ReporterHandle, ReporterSpawnError> {
    let (read_end, write_end) = pipe().map_err(ReporterSpawnError::Pipe)?;
    // SAFETY: called during setup, before the host spins up threads that
    // would make fork-plus-allocation hazardous in the child.
    match unsafe { fork() }.map_err(ReporterSpawnError::Fork)? {
        ForkResult::Child => {
            // The reporter owns nothing but the read end and stderr.
            // SAFETY: closing well-known descriptors we own.
            unsafe {
                libc::close(libc::STDIN_FILENO);
                libc::close(libc::STDOUT_FILENO);
            }
            drop(write_end);
            receiver::reporter_main(std::fs::File::from(read_end), options);
            // SAFETY: plain process exit without running atexit handlers
            // inherited from the parent.
            unsafe { libc::_exit(0) }
        }
        ForkResult::Parent { child } => {
            drop(read_end);
            Ok(ReporterHandle {
                fd: write_end.into_raw_fd(),
                pid: child.as_raw(),
            })
        }
    }
}
