// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Victim-side machinery: setup, the fault handlers, and the live
//! call-stack dump.

pub(crate) mod crash_handler;
pub(crate) mod emitters;
pub(crate) mod frame_filter;
pub(crate) mod platform;
pub(crate) mod receiver_manager;
pub(crate) mod saguard;
pub(crate) mod signal_handler_manager;
pub(crate) mod unhandled_exception_handler;
pub(crate) mod unwinder;

pub use crash_handler::crash_assert;

use crate::shared::configuration::CrashOptions;
use crate::symbols::paths;
use emitters::ResolveSink;
use frame_filter::{process_pc, FrameFilter};

/// Installs crash reporting: resolves the executable path, forks the
/// reporter sidecar, publishes the options, hooks panics, provisions the
/// alternate stack and traps the fatal signals.
///
/// Failure policy follows the reference behavior: a failed `sigaltstack`
/// is fatal to setup (the handlers would be useless on an overflowing
/// stack); a failed pipe or fork only disables the sidecar, and crashes
/// fall back to raw stderr output.
///
/// PRECONDITIONS:
///     Call once, early, before the host spawns threads.
/// SAFETY:
///     Crash-tracking functions are not guaranteed to be reentrant.
pub fn generate_dump_on_crash(mut options: CrashOptions) -> anyhow::Result<()> {
    options.current_executable = paths::resolve_executable(&options.current_executable);

    let handle = match receiver_manager::spawn_reporter(&options) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("crash reporter disabled: {e}");
            None
        }
    };
    crash_handler::install(options, handle);

    unhandled_exception_handler::install_panic_hook();

    // An alternate stack is needed so a stack overflow can still report.
    if let Err(e) = unsafe { signal_handler_manager::create_alt_stack() } {
        eprintln!("sigaltstack: {e:#}");
        std::process::exit(libc::EXIT_FAILURE);
    }
    signal_handler_manager::install_crash_handlers()
}

/// Dumps the current thread's call stack to standard error, symbolicated,
/// without crashing anything. Returns the unused frame budget.
///
/// This is the steady-state entry point: lock-free and read-only against
/// the crash globals, so any number of threads may call it concurrently.
#[no_mangle]
pub fn print_current_call_stack(max_frames: usize) -> usize {
    let names = ["print_current_call_stack"];
    let mut filter = FrameFilter::new(Some(&names));
    let mut sink = ResolveSink {
        current_executable: crash_handler::current_executable(),
    };
    // SAFETY: off-signal unwind of our own thread.
    unsafe {
        unwinder::stack_trace(
            &mut |pc| process_pc(pc, &mut filter, &mut sink),
            max_frames,
        )
    }
}
