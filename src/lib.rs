// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! An in-process crash reporter built around catching UNIX signals,
//! panics, and assertion violations, and shipping a structured report out
//! of the dying process.
//!
//! Architecturally, it consists of two parts:
//! 1. The fault handlers in the crashed process ("victim"): a signal
//!    handler for SIGSEGV/SIGBUS/SIGABRT running on an alternate stack, a
//!    panic hook, and an assertion trap. The signal handler runs under a
//!    constrained environment where many standard operations are illegal
//!    (<https://man7.org/linux/man-pages/man7/signal-safety.7.html>); in
//!    particular memory allocation and locking are potentially UB. It
//!    therefore does as little as possible in process: it restores default
//!    signal dispositions (so a second fault core-dumps instead of
//!    recursing), walks the stack, and streams a tag-length-value record
//!    over a pipe to a reporter process forked at startup. It then reaps
//!    the reporter's exit status and aborts so debuggers find a dump.
//! 2. The reporter process, which shares our executable image. It blocks
//!    reading the pipe; when a record arrives it resolves each frame to a
//!    demangled function name and source location (DWARF line and
//!    subprogram lookups, `atos` on macOS), renders the crash for the
//!    terminal, formats the payload as plain text or a Sentry JSON event,
//!    hands it to the host-supplied sender, and exits.
//!
//! Data collected: the cause (signal number and fault address, panic
//! payload and type, or assertion site), the filtered stack trace of the
//! crashing thread, a host-supplied context string naming the logical
//! executor, and recent breadcrumbs from the host's logger.
//!
//! Build notes for useful stacks: link with `--export-dynamic` so the
//! loader can name symbols in the main executable, keep debug info
//! (`debug = 1` is enough for lines), and on platforms using the manual
//! frame-pointer walker build with frame pointers.

#![cfg(unix)]

pub(crate) mod collector;
pub mod crash_info;
pub(crate) mod receiver;
pub mod shared;
pub(crate) mod symbols;

pub use collector::{crash_assert, generate_dump_on_crash, print_current_call_stack};
pub use crash_info::{Breadcrumb, CrashCause, CrashReport, ResolvedFrame};
pub use shared::configuration::{
    BreadcrumbVisitor, BreadcrumbsFn, ContextFn, ConvertPanicFn, CrashOptions, PrepareFn,
    SendFormat, SenderFn,
};

/// Name of the enclosing function, for the assertion macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __function_name {
    () => {{
        fn marker() {}
        fn name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = name_of(marker);
        // Drop the "::marker" suffix.
        &name[..name.len() - 8]
    }};
}

/// Always-on assertion: on violation, records a crash report and aborts.
#[macro_export]
macro_rules! ensure {
    ($cond:expr) => {
        if !($cond) {
            $crate::crash_assert(
                $crate::__function_name!(),
                file!(),
                line!(),
                stringify!($cond),
                "",
            );
        }
    };
}

/// Always-on assertion with an explanation for the report.
#[macro_export]
macro_rules! ensure_text {
    ($cond:expr, $text:expr) => {
        if !($cond) {
            $crate::crash_assert(
                $crate::__function_name!(),
                file!(),
                line!(),
                stringify!($cond),
                $text,
            );
        }
    };
}

/// Debug-build assertion; compiled out of release builds.
#[macro_export]
macro_rules! expect {
    ($cond:expr) => {
        if cfg!(debug_assertions) && !($cond) {
            $crate::crash_assert(
                $crate::__function_name!(),
                file!(),
                line!(),
                stringify!($cond),
                "",
            );
        }
    };
}

/// Debug-build assertion with an explanation.
#[macro_export]
macro_rules! expect_text {
    ($cond:expr, $text:expr) => {
        if cfg!(debug_assertions) && !($cond) {
            $crate::crash_assert(
                $crate::__function_name!(),
                file!(),
                line!(),
                stringify!($cond),
                $text,
            );
        }
    };
}
