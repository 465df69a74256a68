// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scoped signal quieting for the fatal path.
//!
//! The handler itself can provoke SIGPIPE: the reporter may already be dead
//! when the victim starts writing the record, and the default action would
//! kill the process before the fallback output gets out. The guard parks
//! SIGPIPE on SIG_IGN and restores the previous action on drop (the fatal
//! paths never return, so in practice it stays quiet until abort).
//!
//! SIGCHLD is deliberately left alone: ignoring it makes the kernel
//! auto-reap the reporter, and `waitpid` would lose the exit status the
//! victim reports in its closing banner.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

pub struct SaGuard {
    saved: SigAction,
}

impl SaGuard {
    pub fn new() -> nix::Result<Self> {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: installing SIG_IGN has no handler to misbehave.
        let saved = unsafe { signal::sigaction(Signal::SIGPIPE, &ignore)? };
        Ok(Self { saved })
    }
}

impl Drop for SaGuard {
    fn drop(&mut self) {
        // SAFETY: restores an action previously returned by sigaction.
        let _ = unsafe { signal::sigaction(Signal::SIGPIPE, &self.saved) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_disposition() -> anyhow::Result<()> {
        let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let before = unsafe { signal::sigaction(Signal::SIGPIPE, &probe)? };
        unsafe { signal::sigaction(Signal::SIGPIPE, &before)? };

        {
            let _guard = SaGuard::new()?;
            let during = unsafe { signal::sigaction(Signal::SIGPIPE, &probe)? };
            assert_eq!(during.handler(), SigHandler::SigIgn);
            unsafe { signal::sigaction(Signal::SIGPIPE, &during)? };
        }

        let after = unsafe { signal::sigaction(Signal::SIGPIPE, &probe)? };
        assert_eq!(after.handler(), before.handler());
        unsafe { signal::sigaction(Signal::SIGPIPE, &after)? };
        Ok(())
    }
}
