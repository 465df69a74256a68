// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fault handler: signal, assertion, and record finishing.
//!
//! All three fatal entry points share one shape: restore default signal
//! dispositions (a second fault core-dumps instead of recursing), quiet
//! SIGPIPE, emit the cause and the filtered stack over the pipe, then
//! finish the record and abort. When the reporter pipe was never
//! established, the cause and a raw stack go to standard error instead.
//!
//! Signal-path discipline, per signal-safety(7): no heap allocation, no
//! locks, no formatted stdio beyond direct writes. The global state below
//! is all atomics; the options block is published once at setup through an
//! `AtomicPtr` and only ever read afterwards.

use super::emitters::{self, PipeSink, StderrSink};
use super::frame_filter::{process_pc, FrameFilter};
use super::platform::MAX_STACK_TRACE;
use super::receiver_manager::ReporterHandle;
use super::saguard::SaGuard;
use super::signal_handler_manager::restore_default_handlers;
use super::unwinder;
use crate::shared::codec::Encoder;
use crate::shared::configuration::CrashOptions;
use crate::shared::term;
use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CStr;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr};
use std::time::Duration;

static REPORTER_FD: AtomicI32 = AtomicI32::new(-1);
static REPORTER_PID: AtomicI32 = AtomicI32::new(0);
// Published once at setup, read-only from fatal paths. Mutexes are off the
// table in a signal handler, so an AtomicPtr to a leaked box it is.
static OPTIONS: AtomicPtr<CrashOptions> = AtomicPtr::new(ptr::null_mut());
static ASSERTION_BUSY: AtomicBool = AtomicBool::new(false);

/// Publishes the options and the reporter handle. Must run before the
/// handlers are installed; everything fatal reads these.
///
/// ATOMICITY:
///     Swaps an atomic pointer. A repeated setup leaks the previous block:
///     another thread may still hold a reference from before the swap, and
///     setup is a once-per-process affair anyway.
pub(crate) fn install(options: CrashOptions, handle: Option<ReporterHandle>) {
    let box_ptr = Box::into_raw(Box::new(options));
    OPTIONS.swap(box_ptr, SeqCst);
    if let Some(handle) = handle {
        REPORTER_FD.store(handle.fd, SeqCst);
        REPORTER_PID.store(handle.pid, SeqCst);
    }
}

pub(crate) fn options() -> Option<&'static CrashOptions> {
    let ptr = OPTIONS.load(SeqCst);
    if ptr.is_null() {
        None
    } else {
        // SAFETY: published once via install() and never freed afterwards.
        Some(unsafe { &*ptr })
    }
}

pub(crate) fn reporter_fd() -> RawFd {
    REPORTER_FD.load(SeqCst)
}

pub(crate) fn current_executable() -> &'static str {
    options()
        .map(|options| options.current_executable.as_str())
        .unwrap_or("")
}

/// Prints the crash banner line for a signal, using only `strsignal` and
/// direct writes.
fn print_signal_banner(signum: c_int, fault_address: u64) {
    // SAFETY: strsignal returns a pointer to a static message table entry.
    let name = unsafe {
        let ptr = libc::strsignal(signum);
        if ptr.is_null() {
            "signal"
        } else {
            CStr::from_ptr(ptr).to_str().unwrap_or("signal")
        }
    };
    eprintln!("=== CRASH ===");
    eprintln!("{name} ({signum}) on address {fault_address:#x}.");
}

/// Handler frames to drop from the top of a signal-path stack. On macOS
/// the trampoline is what shows up; on FreeBSD the manual walker starts at
/// the interrupted frame, so there is nothing to strip.
#[cfg(target_os = "macos")]
const SIGNAL_FILTER: Option<&[&str]> = Some(&["_sigtramp"]);
#[cfg(target_os = "freebsd")]
const SIGNAL_FILTER: Option<&[&str]> = None;
#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
const SIGNAL_FILTER: Option<&[&str]> = Some(&["faultline_signal_handler"]);

/// The signal handler proper, registered for SIGSEGV, SIGBUS and SIGABRT.
/// Unmangled so the frame filter can find it by name through the loader.
#[no_mangle]
pub extern "C" fn faultline_signal_handler(
    signum: c_int,
    info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    let fault_address = if !info.is_null() && (signum == libc::SIGSEGV || signum == libc::SIGBUS) {
        // SAFETY: the kernel filled this siginfo for a fault signal.
        unsafe { (*info).si_addr() as usize as u64 }
    } else {
        0
    };
    restore_default_handlers();
    let _quiet = SaGuard::new().ok();

    let mut filter = FrameFilter::new(SIGNAL_FILTER);
    let fd = reporter_fd();
    if fd < 0 {
        print_signal_banner(signum, fault_address);
        let mut sink = StderrSink;
        // SAFETY: we are in the signal handler the context belongs to.
        unsafe {
            unwinder::stack_trace_signal(
                &mut |pc| process_pc(pc, &mut filter, &mut sink),
                ucontext,
                MAX_STACK_TRACE,
            );
        }
    } else {
        let enc = Encoder::new(fd);
        emitters::emit_signal(&enc, signum, fault_address);
        let mut sink = PipeSink::new(enc);
        // SAFETY: as above.
        unsafe {
            unwinder::stack_trace_signal(
                &mut |pc| process_pc(pc, &mut filter, &mut sink),
                ucontext,
                MAX_STACK_TRACE,
            );
        }
    }
    finish_report()
}

/// Records an assertion violation and dies. The always-on `ensure!` and
/// debug-only `expect!` macros land here; hosts can also call it directly.
///
/// A thread that re-enters while a report is being written sleeps forever:
/// one crash, one record, no interleaving.
#[no_mangle]
pub fn crash_assert(function: &str, file: &str, line: u32, condition: &str, explanation: &str) -> ! {
    if ASSERTION_BUSY.swap(true, SeqCst) {
        loop {
            std::thread::sleep(Duration::from_secs(1));
        }
    }
    restore_default_handlers();
    let _quiet = SaGuard::new().ok();

    let names = ["crash_assert"];
    let mut filter = FrameFilter::new(Some(&names));
    let fd = reporter_fd();
    if fd < 0 {
        eprintln!("=== CRASH ===");
        eprintln!("Assertion violation in {function} [{file}:{line}]: {condition}.");
        let mut sink = StderrSink;
        // SAFETY: assertion context, not a signal handler; still single
        // fatal entrant by the guard above.
        unsafe {
            unwinder::stack_trace(
                &mut |pc| process_pc(pc, &mut filter, &mut sink),
                MAX_STACK_TRACE,
            );
        }
    } else {
        let enc = Encoder::new(fd);
        emitters::emit_assert(&enc, function, file, line, condition, explanation);
        let mut sink = PipeSink::new(enc);
        // SAFETY: as above.
        unsafe {
            unwinder::stack_trace(
                &mut |pc| process_pc(pc, &mut filter, &mut sink),
                MAX_STACK_TRACE,
            );
        }
    }
    finish_report()
}

/// Emits the record tail (context, breadcrumbs, FINISH), drains the pipe by
/// closing it, reaps the reporter, and aborts so debuggers get a dump.
pub(crate) fn finish_report() -> ! {
    let fd = reporter_fd();
    if fd < 0 {
        std::process::abort();
    }
    let enc = Encoder::new(fd);
    if let Some(options) = options() {
        if let Some(get_context) = &options.get_context {
            emitters::emit_context(&enc, &get_context());
        }
        if let Some(get_breadcrumbs) = &options.get_breadcrumbs {
            get_breadcrumbs(&mut |level, timestamp, message| {
                emitters::emit_breadcrumb(&enc, level, timestamp, message);
            });
        }
    }
    emitters::emit_finish(&enc);
    // SAFETY: closing the pipe we own; signals EOF to the reporter.
    unsafe { libc::close(fd) };

    let pid = REPORTER_PID.load(SeqCst);
    if pid > 0 {
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Err(Errno::EINTR) => continue,
                Ok(WaitStatus::Exited(_, status)) => {
                    if status != 0 {
                        eprintln!(
                            "{b} CRASH REPORTER stopped with status {status} {b}",
                            b = term::BAR
                        );
                    }
                    break;
                }
                Ok(WaitStatus::Signaled(..)) => {
                    eprintln!("{b} CRASH REPORTER stopped abnormally {b}", b = term::BAR);
                    break;
                }
                _ => break,
            }
        }
    }
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_roundtrip_through_global() {
        let mut options = CrashOptions::new();
        options.current_executable = "/tmp/tester".to_string();
        install(options, None);
        assert_eq!(current_executable(), "/tmp/tester");
        // No reporter handle: the fd sentinel stays disabled.
        assert_eq!(reporter_fd(), -1);

        // Replacing the options block keeps the published pointer valid.
        let mut replacement = CrashOptions::new();
        replacement.current_executable = "/tmp/other".to_string();
        install(replacement, None);
        assert_eq!(current_executable(), "/tmp/other");
    }
}
