// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Demo driver: crashes on purpose, one way per mode.
//!
//! ```text
//! crashtest 1   # wild write (SIGSEGV at 0x42)
//! crashtest 2   # panic with a typed payload, rendered by convert_panic
//! crashtest 3   # ensure!(false)
//! crashtest 4   # plain panic
//! crashtest 0   # no crash, exits quietly
//! ```

use faultline::{generate_dump_on_crash, print_current_call_stack, CrashOptions, SendFormat};
use std::borrow::Cow;

fn crash(mode: u32) {
    match mode {
        1 => unsafe { std::ptr::write_volatile(0x42 as *mut u8, 0x42) },
        2 => std::panic::panic_any(42u32),
        3 => faultline::ensure!(false),
        _ => panic!("foobar"),
    }
}

fn bar(mode: u32) {
    print_current_call_stack(30);
    crash(mode);
}

fn foo(mode: u32) {
    bar(mode);
}

fn main() -> anyhow::Result<()> {
    let mut options = CrashOptions::new();
    options.set_command_line(std::env::args());
    options.send_format = SendFormat::JsonSentry;
    options.path = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    options.get_context = Some(Box::new(|| Cow::Borrowed("my-context")));
    options.get_breadcrumbs = Some(Box::new(|emit: faultline::BreadcrumbVisitor| {
        emit("error", 42, b"breadcrumb 0");
        emit("info", 37, b"breadcrumb 1");
    }));
    options.convert_panic = Some(Box::new(|payload| {
        payload.downcast_ref::<u32>().map(|n| format!("number: {n}"))
    }));
    generate_dump_on_crash(options)?;

    let mode: u32 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);
    if mode != 0 {
        foo(mode);
    }
    Ok(())
}
