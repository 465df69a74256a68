// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The uncaught-failure trap: a panic hook that turns the panic into a
//! crash record.
//!
//! Unlike the signal path this runs in an ordinary context, so allocation
//! is legal. Payload rendering tries the host's `convert_panic` first
//! (guarded, so a misbehaving converter cannot take down the report),
//! then the standard string downcasts. Once a record is emitted the
//! process aborts: a panic that reached the hook is treated as fatal, the
//! same way the reference implementation treated an uncaught exception.

use super::crash_handler;
use super::emitters::{self, PipeSink, ResolveSink};
use super::frame_filter::{process_pc, FrameFilter};
use super::platform::MAX_STACK_TRACE;
use super::saguard::SaGuard;
use super::signal_handler_manager::restore_default_handlers;
use super::unwinder;
use crate::shared::codec::Encoder;
use crate::symbols::demangle_type;
use std::any::Any;
use std::panic::{AssertUnwindSafe, PanicHookInfo};

/// Frames between the panic site and this handler. `rust_panic` is the
/// unmangled marker the runtime plants for debuggers; our own hook frame
/// carries its exported name.
const PANIC_FILTER: &[&str] = &["faultline_panic_handler", "rust_panic"];

pub(crate) fn install_panic_hook() {
    std::panic::set_hook(Box::new(faultline_panic_handler));
}

/// Renders the payload: `(static type name, human description)`. Rust
/// erases payload types, so the type name is only known for the two
/// payloads the standard library produces; everything else needs the
/// host's converter for a useful description.
fn describe_panic(payload: &(dyn Any + Send)) -> (&'static str, String) {
    let type_name = if payload.is::<&str>() {
        "&str"
    } else if payload.is::<String>() {
        "alloc::string::String"
    } else {
        ""
    };

    let mut description = None;
    if let Some(options) = crash_handler::options() {
        if let Some(convert) = &options.convert_panic {
            // The converter is host code; a panic inside it must not lose
            // the record.
            description = std::panic::catch_unwind(AssertUnwindSafe(|| convert(payload)))
                .ok()
                .flatten()
                .filter(|rendered| !rendered.is_empty());
        }
    }
    let description = description
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    (type_name, description)
}

/// The hook itself. Unmangled so the frame filter can drop it by name.
#[no_mangle]
pub fn faultline_panic_handler(info: &PanicHookInfo<'_>) {
    restore_default_handlers();
    let _quiet = SaGuard::new().ok();
    let (type_name, description) = describe_panic(info.payload());

    let mut filter = FrameFilter::new(Some(PANIC_FILTER));
    let fd = crash_handler::reporter_fd();
    if fd < 0 {
        eprintln!("=== CRASH ===");
        eprintln!(
            "Uncaught exception of type {}: {}",
            demangle_type(type_name),
            description
        );
        // No reporter to symbolicate for us; do it here, live.
        let mut sink = ResolveSink {
            current_executable: crash_handler::current_executable(),
        };
        // SAFETY: single fatal entrant; ordinary (non-signal) context.
        unsafe {
            unwinder::stack_trace(
                &mut |pc| process_pc(pc, &mut filter, &mut sink),
                MAX_STACK_TRACE,
            );
        }
        std::process::abort();
    }

    let enc = Encoder::new(fd);
    emitters::emit_uncaught_exception(&enc, &description, type_name);
    let mut sink = PipeSink::new(enc);
    // SAFETY: as above.
    unsafe {
        unwinder::stack_trace(
            &mut |pc| process_pc(pc, &mut filter, &mut sink),
            MAX_STACK_TRACE,
        );
    }
    crash_handler::finish_report()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let (type_name, description) = describe_panic(payload.as_ref());
        assert_eq!(type_name, "&str");
        assert_eq!(description, "boom");
    }

    #[test]
    fn describes_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("kaput"));
        let (type_name, description) = describe_panic(payload.as_ref());
        assert_eq!(type_name, "alloc::string::String");
        assert_eq!(description, "kaput");
    }

    #[test]
    fn unknown_payload_without_converter_is_empty() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        let (type_name, description) = describe_panic(payload.as_ref());
        assert_eq!(type_name, "");
        assert_eq!(description, "");
    }
}
