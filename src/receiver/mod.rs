// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The reporter sidecar.
//!
//! Forked by the victim at setup with stdin/stdout closed, it blocks on the
//! read end of the crash pipe, renders the record for humans as it streams
//! in, then builds the configured payload and hands it to the host's sender
//! (or standard error). One record, then exit; the victim reaps us.

pub(crate) mod format;
pub(crate) mod receive_report;

use crate::shared::configuration::{CrashOptions, SendFormat};
use std::ffi::CStr;
use std::fs::File;

/// Serves one crash record from `pipe` and dispatches the payload.
pub(crate) fn reporter_main(pipe: File, options: &CrashOptions) {
    if let Some(prepare) = &options.prepare {
        prepare(options.send_format);
    }

    let Some(report) = receive_report::read_crash(pipe, options) else {
        // Framing error or the victim exited without crashing; no payload.
        return;
    };

    let payload = match options.send_format {
        SendFormat::None => return,
        SendFormat::PlainText => format::plain_text(&report, options),
        SendFormat::JsonSentry => match format::sentry_json(&report, options) {
            Ok(payload) => payload,
            Err(e) => {
                eprintln!("Failed to format crash report: {e:#}");
                return;
            }
        },
    };

    match &options.sender {
        Some(sender) => {
            if !sender(options.send_format, &payload) {
                eprintln!("Failed to send crash report.");
            }
        }
        None => eprintln!("{payload}"),
    }
}

/// Human name of a signal, via `strsignal(3)`.
pub(crate) fn signal_name(signum: i32) -> String {
    // SAFETY: strsignal returns a pointer into a static message table.
    unsafe {
        let ptr = libc::strsignal(signum);
        if ptr.is_null() {
            format!("signal {signum}")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names_are_human() {
        let name = signal_name(libc::SIGSEGV);
        assert!(!name.is_empty());
        // glibc and the BSDs both call it this.
        assert_eq!(name, "Segmentation fault");
    }
}
