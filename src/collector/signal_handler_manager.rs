// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Alternate-stack provisioning and signal handler installation.

use super::crash_handler::faultline_signal_handler;
use libc::{
    mmap, sigaltstack, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
    SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;

/// The fatal signals this crate traps.
pub const FATAL_SIGNALS: [Signal; 3] = [Signal::SIGSEGV, Signal::SIGBUS, Signal::SIGABRT];

static ALTSTACK_INIT: AtomicBool = AtomicBool::new(false);

/// Allocates the alternate signal stack with a guard page below it, so a
/// handler overflow faults instead of silently trampling the heap.
/// Allocated once for the life of the process, never freed.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
///
/// SAFETY:
///     No preconditions; mutates process-wide signal state.
pub unsafe fn create_alt_stack() -> anyhow::Result<()> {
    if ALTSTACK_INIT.load(SeqCst) {
        return Ok(());
    }

    // The default SIGSTKSZ (8KB on many systems) is not comfortable for a
    // handler that walks and resolves stacks; take 16 pages if larger.
    let page_size = page_size::get();
    let stack_size = std::cmp::max(SIGSTKSZ, 16 * page_size);
    let stackp = mmap(
        ptr::null_mut(),
        stack_size + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(stackp != MAP_FAILED, "failed to allocate an alternate stack");
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternate stack guard page"
    );
    let stackp = stackp.add(page_size);

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: stack_size,
    };
    let rval = sigaltstack(&stack, ptr::null_mut());
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    ALTSTACK_INIT.store(true, SeqCst);
    Ok(())
}

/// Points SIGSEGV, SIGBUS and SIGABRT at the crash handler, on the
/// alternate stack so stack overflows still get a report.
///
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
///     No other crash-handler functions should be called concurrently.
pub fn install_crash_handlers() -> anyhow::Result<()> {
    let sig_action = SigAction::new(
        SigHandler::SigAction(faultline_signal_handler),
        SaFlags::SA_SIGINFO | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        // SAFETY: the handler only touches async-signal-safe state.
        if let Err(e) = unsafe { signal::sigaction(signal, &sig_action) } {
            eprintln!("sigaction({signal:?}): {e}");
        }
    }
    Ok(())
}

/// Puts the fatal signals back on their default dispositions. Called first
/// thing on every fatal path so a fault inside the handler core-dumps
/// instead of recursing.
pub fn restore_default_handlers() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in FATAL_SIGNALS {
        // SAFETY: restoring SIG_DFL cannot introduce a handler.
        let _ = unsafe { signal::sigaction(signal, &default) };
    }
}
