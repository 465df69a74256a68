// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLV ingest: turns the pipe stream into a [`CrashReport`].
//!
//! The reporter prints the human-readable dump eagerly, tag by tag, so a
//! watching terminal shows the crash even if the stream dies halfway. The
//! structured record only materializes when `FINISH` arrives on a good
//! decoder; everything else is a framing error and the partial record is
//! discarded (no payload, clean exit).

use crate::crash_info::{Breadcrumb, CrashCause, CrashReport, ResolvedFrame};
use crate::shared::codec::Decoder;
use crate::shared::configuration::CrashOptions;
use crate::shared::constants::CrashTag;
use crate::shared::term;
use crate::symbols::{demangle_type, resolve_and_print_pc, resolve_and_print_symbol};
use chrono::{Local, TimeZone};
use std::io::Read;

/// Pads breadcrumb levels to a fixed width so messages line up.
fn level_padding(level: &str) -> &'static str {
    let spacing = "       ";
    &spacing[level.len().min(7)..]
}

fn print_banner(time_banner: &str) {
    if term::color_enabled() {
        eprintln!(
            "\n\n{red}{bar}{reset} CRASH {red}{bar}{dim}{time_banner}{reset}",
            red = term::RED,
            bar = term::BAR,
            dim = term::DIM,
            reset = term::RESET,
        );
    } else {
        eprintln!("\n\n{bar} CRASH {bar}{time_banner}", bar = term::BAR);
    }
}

fn print_signal(signum: i32, fault_address: u64) {
    let name = super::signal_name(signum);
    if term::color_enabled() {
        eprintln!(
            "{name} {dim}({signum}) on address {reset}{fault_address:#x}{dim}.{reset}",
            dim = term::DIM,
            reset = term::RESET,
        );
    } else {
        eprintln!("{name} ({signum}) on address {fault_address:#x}.");
    }
}

fn print_uncaught(type_display: &str, description: &str) {
    if term::color_enabled() {
        eprintln!(
            "{type_display} {dim}exception: {reset}{description}{dim}.{reset}",
            dim = term::DIM,
            reset = term::RESET,
        );
    } else {
        eprintln!("{type_display} exception: {description}.");
    }
}

fn print_assert(function: &str, file: &str, line: u32, condition: &str, explanation: &str) {
    if term::color_enabled() {
        eprintln!(
            "{dim}Assertion violation in {full}{function}{dim} [{file}:{line}]: \
             {reset}{condition}.\n{dim}This is due to: {reset}{explanation}{dim}.{reset}",
            dim = term::DIM,
            full = term::FULL,
            reset = term::RESET,
        );
    } else {
        eprintln!(
            "Assertion violation in {function} [{file}:{line}]: {condition}.\n\
             This is due to: {explanation}"
        );
    }
}

fn print_context(context: &str, options: &CrashOptions) {
    if term::color_enabled() {
        eprintln!(
            "{green}{ctx_sym}{reset}{full}{context}{reset}\n\
             {red}{cmd_sym}{reset}{full} {command}\n    \
             {dim}in{reset} {path}\n    \
             {dim}of{reset} {environment}/{dist} [{release}]",
            green = term::GREEN,
            red = term::RED,
            ctx_sym = term::SYMBOL_CONTEXT,
            cmd_sym = term::SYMBOL_COMMANDLINE,
            full = term::FULL,
            dim = term::DIM,
            reset = term::RESET,
            command = options.command,
            path = options.path,
            environment = options.environment,
            dist = options.dist,
            release = options.release,
        );
    } else {
        eprintln!(
            "{ctx_sym}{context}\n{cmd_sym} {command}\n    in {path}\n    of \
             {environment}/{dist} [{release}]",
            ctx_sym = term::SYMBOL_CONTEXT,
            cmd_sym = term::SYMBOL_COMMANDLINE,
            command = options.command,
            path = options.path,
            environment = options.environment,
            dist = options.dist,
            release = options.release,
        );
    }
}

fn print_breadcrumb(level: &str, timestamp: u64, message: &str) {
    let time = Local
        .timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|t| t.format("%F %T").to_string())
        .unwrap_or_default();
    if term::color_enabled() {
        eprintln!(
            "{blue}{log_sym}{reset}{time}{pad} [{level}] {reset}{message}",
            blue = term::BLUE,
            log_sym = term::SYMBOL_LOG,
            reset = term::RESET,
            pad = level_padding(level),
        );
    } else {
        eprintln!(
            "{log_sym}{time}{pad} [{level}] {message}",
            log_sym = term::SYMBOL_LOG,
            pad = level_padding(level),
        );
    }
}

/// Reads one crash record off `src`. Returns `None` on any framing error:
/// wrong opening tag, unknown tag, short read, oversized string.
pub(crate) fn read_crash(src: impl Read, options: &CrashOptions) -> Option<CrashReport> {
    let mut dec = Decoder::new(src);

    let start = dec.read(0u32);
    if !dec.good() || start != CrashTag::Start as u32 {
        return None;
    }

    let now = Local::now();
    let time_banner = now.format(" [%F %T %z]").to_string();
    print_banner(&time_banner);

    let mut signal: Option<(i32, u64)> = None;
    let mut exception: Option<(String, String)> = None;
    let mut assertion: Option<(String, String, u32, String, String)> = None;
    let mut context = String::new();
    let mut frames: Vec<ResolvedFrame> = Vec::new();
    let mut breadcrumbs: Vec<Breadcrumb> = Vec::new();

    loop {
        let tag = dec.read(0u32);
        if !dec.good() {
            return None;
        }
        match CrashTag::from_u32(tag)? {
            CrashTag::Finish => break,
            CrashTag::Start => return None,
            CrashTag::Signal => {
                let signum = dec.read(0u32) as i32;
                let fault_address = dec.read(0u64);
                if !dec.good() {
                    return None;
                }
                print_signal(signum, fault_address);
                signal = Some((signum, fault_address));
            }
            CrashTag::UncaughtException => {
                let description = dec.read(String::new());
                let type_name = dec.read(String::new());
                if !dec.good() {
                    return None;
                }
                let type_display = demangle_type(&type_name);
                print_uncaught(&type_display, &description);
                exception = Some((description, type_display));
            }
            CrashTag::Assert => {
                let function = dec.read(String::new());
                let file = dec.read(String::new());
                let line = dec.read(0u32);
                let condition = dec.read(String::new());
                let explanation = dec.read(String::new());
                if !dec.good() {
                    return None;
                }
                print_assert(&function, &file, line, &condition, &explanation);
                assertion = Some((function, file, line, condition, explanation));
            }
            CrashTag::Library => {
                let symbol = dec.read(String::new());
                let library = dec.read(String::new());
                let offset_in_library = dec.read(0u32);
                let pc = dec.read(0u64);
                if !dec.good() {
                    return None;
                }
                let symbol = if symbol.is_empty() {
                    None
                } else {
                    Some(symbol.as_str())
                };
                let info = resolve_and_print_symbol(
                    symbol,
                    &library,
                    offset_in_library,
                    pc,
                    &options.current_executable,
                );
                frames.push(ResolvedFrame {
                    function: info.function,
                    library: info.library,
                    source_file: info.source_file,
                    line: info.line,
                    column: info.column,
                });
            }
            CrashTag::Pc => {
                let pc = dec.read(0u64);
                if !dec.good() {
                    return None;
                }
                let info = resolve_and_print_pc(pc, &options.current_executable);
                frames.push(ResolvedFrame {
                    function: info.function,
                    library: options.current_executable.clone(),
                    source_file: info.source_file,
                    line: info.line,
                    column: info.column,
                });
            }
            CrashTag::Context => {
                context = dec.read(String::new());
                if !dec.good() {
                    return None;
                }
                print_context(&context, options);
            }
            CrashTag::Breadcrumb => {
                let level = dec.read(String::new());
                let timestamp = dec.read(0u64);
                let message = dec.read(String::new());
                if !dec.good() {
                    return None;
                }
                print_breadcrumb(&level, timestamp, &message);
                breadcrumbs.push(Breadcrumb {
                    level,
                    timestamp,
                    message,
                });
            }
        }
    }

    let cause = if let Some((signum, fault_address)) = signal {
        Some(CrashCause::Signal {
            signum,
            fault_address,
        })
    } else if let Some((description, type_name)) = exception {
        Some(CrashCause::UncaughtException {
            description,
            type_name,
        })
    } else {
        assertion.map(
            |(function, file, line, condition, explanation)| CrashCause::AssertionViolation {
                function,
                file,
                line,
                condition,
                explanation,
            },
        )
    };

    Some(CrashReport {
        cause,
        frames,
        context,
        breadcrumbs,
        timestamp: now.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::emitters::{self, FrameSink};
    use crate::shared::codec::Encoder;
    use std::io::Cursor;
    use std::os::unix::io::AsRawFd;

    fn capture(emit: impl FnOnce(&Encoder)) -> Vec<u8> {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        emit(&Encoder::new(write_end.as_raw_fd()));
        drop(write_end);
        let mut out = Vec::new();
        std::fs::File::from(read_end).read_to_end(&mut out).unwrap();
        out
    }

    /// Options whose executable fails to open fast, keeping symbolication
    /// out of the parse-logic tests.
    fn test_options() -> CrashOptions {
        let mut options = CrashOptions::new();
        options.current_executable = "/no/such/tester".to_string();
        options
    }

    fn full_signal_record() -> Vec<u8> {
        capture(|enc| {
            emitters::emit_signal(enc, libc::SIGSEGV, 0x42);
            let mut sink = emitters::PipeSink::new(*enc);
            sink.library_frame(
                Some("_ZN6tester5crashEv"),
                "/no/such/tester",
                0x1040,
                0x55aa_1040,
            );
            sink.pc_frame(0xdead0);
            emitters::emit_context(enc, "my-context");
            emitters::emit_breadcrumb(enc, "error", 42, b"breadcrumb 0");
            emitters::emit_breadcrumb(enc, "info", 37, b"breadcrumb 1");
            emitters::emit_finish(enc);
        })
    }

    #[test]
    fn parses_complete_signal_record() {
        let options = test_options();
        let report = read_crash(Cursor::new(full_signal_record()), &options).unwrap();
        assert_eq!(
            report.cause,
            Some(CrashCause::Signal {
                signum: libc::SIGSEGV,
                fault_address: 0x42
            })
        );
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[0].function, "tester::crash()");
        assert_eq!(report.context, "my-context");
        assert_eq!(report.breadcrumbs.len(), 2);
        assert_eq!(report.breadcrumbs[0].level, "error");
        assert_eq!(report.breadcrumbs[0].timestamp, 42);
        assert_eq!(report.breadcrumbs[0].message, "breadcrumb 0");
        assert_eq!(report.breadcrumbs[1].level, "info");
        assert_eq!(report.breadcrumbs[1].timestamp, 37);
    }

    #[test]
    fn truncation_at_every_offset_discards_record() {
        let bytes = full_signal_record();
        let options = test_options();
        for cut in 0..bytes.len() {
            assert!(
                read_crash(Cursor::new(bytes[..cut].to_vec()), &options).is_none(),
                "prefix of {cut} bytes produced a record"
            );
        }
    }

    #[test]
    fn stream_must_open_with_start() {
        let options = test_options();
        let bytes = capture(|enc| {
            enc.write_u32(CrashTag::Signal as u32);
            enc.write_u32(libc::SIGSEGV as u32);
            enc.write_u64(0);
        });
        assert!(read_crash(Cursor::new(bytes), &options).is_none());
    }

    #[test]
    fn unknown_tag_discards_record() {
        let options = test_options();
        let bytes = capture(|enc| {
            enc.write_u32(CrashTag::Start as u32);
            enc.write_u32(0xfffe);
        });
        assert!(read_crash(Cursor::new(bytes), &options).is_none());
    }

    #[test]
    fn double_start_discards_record() {
        let options = test_options();
        let bytes = capture(|enc| {
            enc.write_u32(CrashTag::Start as u32);
            enc.write_u32(CrashTag::Start as u32);
        });
        assert!(read_crash(Cursor::new(bytes), &options).is_none());
    }

    #[test]
    fn assert_record_round_trips() {
        let options = test_options();
        let bytes = capture(|enc| {
            emitters::emit_assert(enc, "bar", "tester.rs", 27, "false", "");
            emitters::emit_finish(enc);
        });
        let report = read_crash(Cursor::new(bytes), &options).unwrap();
        assert_eq!(
            report.cause,
            Some(CrashCause::AssertionViolation {
                function: "bar".into(),
                file: "tester.rs".into(),
                line: 27,
                condition: "false".into(),
                explanation: String::new(),
            })
        );
        assert!(report.frames.is_empty());
    }

    #[test]
    fn uncaught_exception_type_is_demangled() {
        let options = test_options();
        let bytes = capture(|enc| {
            emitters::emit_uncaught_exception(enc, "number: 42", "_ZN4core3fooEv");
            emitters::emit_finish(enc);
        });
        let report = read_crash(Cursor::new(bytes), &options).unwrap();
        assert_eq!(
            report.cause,
            Some(CrashCause::UncaughtException {
                description: "number: 42".into(),
                type_name: "core::foo()".into(),
            })
        );
    }

    #[test]
    fn signal_wins_cause_precedence() {
        let options = test_options();
        let bytes = capture(|enc| {
            emitters::emit_assert(enc, "bar", "tester.rs", 27, "false", "");
            enc.write_u32(CrashTag::Signal as u32);
            enc.write_u32(libc::SIGBUS as u32);
            enc.write_u64(0x10);
            emitters::emit_finish(enc);
        });
        let report = read_crash(Cursor::new(bytes), &options).unwrap();
        assert!(matches!(
            report.cause,
            Some(CrashCause::Signal {
                signum,
                fault_address: 0x10
            }) if signum == libc::SIGBUS
        ));
    }
}
