// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload formatting: the plain-text dump and the Sentry event envelope.
//!
//! The Sentry schema is external and consumed field-for-field by the
//! service, so the structs below spell out every member rather than going
//! through a generic value tree. Optional members are omitted, never
//! emitted empty: a `filename: ""` frame would poison grouping on the
//! server side.

use crate::crash_info::{CrashCause, CrashReport};
use crate::shared::configuration::CrashOptions;
use chrono::{Local, TimeZone};
use serde::Serialize;
use uuid::Uuid;

/// The plain-text payload: the same content the terminal dump shows,
/// uncolored, as one string.
pub(crate) fn plain_text(report: &CrashReport, options: &CrashOptions) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let time_banner = Local
        .timestamp_opt(report.timestamp, 0)
        .single()
        .map(|t| t.format(" [%F %T %z]").to_string())
        .unwrap_or_default();
    let _ = writeln!(out, "=== CRASH ==={time_banner}");

    match &report.cause {
        Some(CrashCause::Signal {
            signum,
            fault_address,
        }) => {
            let _ = writeln!(
                out,
                "{} ({signum}) on address {fault_address:#x}.",
                super::signal_name(*signum)
            );
        }
        Some(CrashCause::UncaughtException {
            description,
            type_name,
        }) => {
            let _ = writeln!(out, "{type_name} exception: {description}.");
        }
        Some(CrashCause::AssertionViolation {
            function,
            file,
            line,
            condition,
            explanation,
        }) => {
            let _ = writeln!(
                out,
                "Assertion violation in {function} [{file}:{line}]: {condition}."
            );
            if !explanation.is_empty() {
                let _ = writeln!(out, "This is due to {explanation}.");
            }
        }
        None => {}
    }

    for frame in &report.frames {
        if !frame.source_file.is_empty() {
            let _ = writeln!(
                out,
                "  at {} [{}:{}]",
                frame.function, frame.source_file, frame.line
            );
        } else if !frame.function.is_empty() {
            let _ = writeln!(out, "  at {}", frame.function);
        } else {
            let _ = writeln!(out, "  at (unknown)");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Command: {}", options.command);
    let _ = writeln!(out, "   Path: {}", options.path);
    let _ = writeln!(out);
    for crumb in &report.breadcrumbs {
        let time = Local
            .timestamp_opt(crumb.timestamp as i64, 0)
            .single()
            .map(|t| t.format("%F %T").to_string())
            .unwrap_or_default();
        let spacing = "       ";
        let pad = &spacing[crumb.level.len().min(7)..];
        let _ = writeln!(out, "{time}{pad} [{}] {}", crumb.level, crumb.message);
    }
    out
}

#[derive(Serialize)]
struct SentryEvent<'a> {
    event_id: String,
    contexts: Contexts,
    tags: Tags<'a>,
    timestamp: i64,
    platform: &'static str,
    logger: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    release: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    dist: &'a str,
    environment: &'a str,
    level: &'static str,
    server_name: String,
    exception: Exception,
    breadcrumbs: Breadcrumbs<'a>,
}

#[derive(Serialize)]
struct Contexts {
    os: OsContext,
    device: DeviceContext,
}

#[derive(Serialize)]
struct OsContext {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct DeviceContext {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    arch: String,
}

#[derive(Serialize)]
struct Tags<'a> {
    path: &'a str,
    commandline: &'a str,
}

#[derive(Serialize)]
struct Exception {
    values: Vec<ExceptionValue>,
}

#[derive(Serialize)]
struct ExceptionValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    mechanism: Option<Mechanism>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stacktrace: Option<Stacktrace>,
    user: User,
}

#[derive(Serialize)]
struct Mechanism {
    #[serde(rename = "type")]
    kind: &'static str,
    handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<MechanismData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<MechanismMeta>,
}

#[derive(Serialize)]
struct MechanismData {
    relevant_address: String,
}

#[derive(Serialize)]
struct MechanismMeta {
    signal: SignalMeta,
}

#[derive(Serialize)]
struct SignalMeta {
    number: i32,
}

#[derive(Serialize)]
struct Stacktrace {
    frames: Vec<SentryFrame>,
}

#[derive(Serialize)]
struct SentryFrame {
    function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lineno: Option<u32>,
}

#[derive(Serialize)]
struct User {
    id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

#[derive(Serialize)]
struct Breadcrumbs<'a> {
    values: Vec<BreadcrumbValue<'a>>,
}

#[derive(Serialize)]
struct BreadcrumbValue<'a> {
    message: &'a str,
    timestamp: u64,
    #[serde(skip_serializing_if = "str::is_empty")]
    level: &'a str,
}

/// The Sentry event for this record, as a JSON string.
pub(crate) fn sentry_json(report: &CrashReport, options: &CrashOptions) -> anyhow::Result<String> {
    let uname = nix::sys::utsname::uname()?;
    let sysname = uname.sysname().to_string_lossy().into_owned();
    let os_release = uname.release().to_string_lossy();
    let machine = uname.machine().to_string_lossy();
    let nodename = uname.nodename().to_string_lossy().into_owned();

    let mechanism_and_cause = report.cause.as_ref().map(|cause| match cause {
        CrashCause::Signal {
            signum,
            fault_address,
        } => {
            let data = if *signum == libc::SIGSEGV || *signum == libc::SIGBUS {
                Some(MechanismData {
                    relevant_address: format!("{fault_address:#x}"),
                })
            } else {
                None
            };
            let name = super::signal_name(*signum);
            (
                Mechanism {
                    kind: "signalhandler",
                    handled: false,
                    data,
                    meta: Some(MechanismMeta {
                        signal: SignalMeta { number: *signum },
                    }),
                },
                name.clone(),
                format!("{name} ({signum}) on address {fault_address:#x}."),
            )
        }
        CrashCause::UncaughtException {
            description,
            type_name,
        } => (
            Mechanism {
                kind: "UncaughtExceptionHandler",
                handled: false,
                data: None,
                meta: None,
            },
            type_name.clone(),
            format!("{type_name} exception: {description}."),
        ),
        CrashCause::AssertionViolation {
            function,
            file,
            line,
            condition,
            explanation,
        } => (
            Mechanism {
                kind: "AssertionViolation",
                handled: false,
                data: None,
                meta: None,
            },
            "assert".to_string(),
            format!(
                "assertion {condition} in {function} [{file}:{line}] violated, due to \
                 {explanation}."
            ),
        ),
    });
    let (mechanism, kind, value) = match mechanism_and_cause {
        Some((mechanism, kind, value)) => (Some(mechanism), kind, value),
        None => (None, String::new(), String::new()),
    };

    // Sentry wants the oldest frame first; capture order is innermost
    // first, so flip, and drop frames with nothing to show.
    let frames: Vec<SentryFrame> = report
        .frames
        .iter()
        .rev()
        .filter_map(|frame| {
            if !frame.source_file.is_empty() {
                Some(SentryFrame {
                    function: frame.function.clone(),
                    package: Some(frame.library.clone()),
                    filename: Some(frame.source_file.clone()),
                    lineno: Some(frame.line),
                })
            } else if !frame.function.is_empty() {
                Some(SentryFrame {
                    function: frame.function.clone(),
                    package: None,
                    filename: None,
                    lineno: None,
                })
            } else {
                None
            }
        })
        .collect();

    let uid = nix::unistd::getuid();
    let username = if options.report_username {
        // Can pull in NSS modules through the dynamic loader; risky in a
        // sibling of a corrupted process, which is why it is opt-in.
        nix::unistd::User::from_uid(uid)
            .ok()
            .flatten()
            .map(|user| user.name)
    } else {
        None
    };

    let event = SentryEvent {
        event_id: Uuid::new_v4().simple().to_string(),
        contexts: Contexts {
            os: OsContext {
                name: sysname,
                version: format!("{os_release} {machine}"),
            },
            device: DeviceContext {
                name: nodename.clone(),
                model: machine_model(),
                arch: machine.into_owned(),
            },
        },
        tags: Tags {
            path: &options.path,
            commandline: &options.command,
        },
        timestamp: report.timestamp,
        platform: "c",
        logger: "faultline",
        release: &options.release,
        dist: &options.dist,
        environment: &options.environment,
        level: "fatal",
        server_name: nodename,
        exception: Exception {
            values: vec![ExceptionValue {
                mechanism,
                kind,
                value,
                thread_id: (!report.context.is_empty()).then(|| report.context.clone()),
                stacktrace: (!frames.is_empty()).then_some(Stacktrace { frames }),
                user: User {
                    id: uid.as_raw(),
                    username,
                },
            }],
        },
        breadcrumbs: Breadcrumbs {
            values: report
                .breadcrumbs
                .iter()
                .map(|crumb| BreadcrumbValue {
                    message: &crumb.message,
                    timestamp: crumb.timestamp,
                    level: &crumb.level,
                })
                .collect(),
        },
    };
    Ok(serde_json::to_string(&event)?)
}

/// Marketing-free machine model, FreeBSD and macOS only; Linux has no
/// cheap equivalent.
#[cfg(any(target_os = "freebsd", target_os = "macos"))]
fn machine_model() -> Option<String> {
    let mut buffer = [0u8; 256];
    let mut len = buffer.len();
    // SAFETY: sysctlbyname writes at most `len` bytes and updates it.
    let rc = unsafe {
        libc::sysctlbyname(
            c"hw.model".as_ptr(),
            buffer.as_mut_ptr() as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    let raw = String::from_utf8_lossy(&buffer[..len]);
    let mut model: String = raw
        .trim_end_matches('\0')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c.is_ascii_punctuation() {
                c
            } else {
                ' '
            }
        })
        .collect();
    for noise in ["(R)", "(TM)", "CPU"] {
        model = model.replace(noise, "");
    }
    while model.contains("  ") {
        model = model.replace("  ", " ");
    }
    Some(model.trim().to_string())
}

#[cfg(not(any(target_os = "freebsd", target_os = "macos")))]
fn machine_model() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash_info::{Breadcrumb, ResolvedFrame};

    fn report_with(cause: Option<CrashCause>) -> CrashReport {
        CrashReport {
            cause,
            frames: vec![
                ResolvedFrame {
                    function: "tester::crash()".into(),
                    library: "./tester".into(),
                    source_file: "src/tester.rs".into(),
                    line: 17,
                    column: 5,
                },
                ResolvedFrame {
                    function: "tester::bar()".into(),
                    library: String::new(),
                    source_file: String::new(),
                    line: 0,
                    column: 0,
                },
                ResolvedFrame::default(),
            ],
            context: "my-context".into(),
            breadcrumbs: vec![
                Breadcrumb {
                    level: "error".into(),
                    timestamp: 42,
                    message: "breadcrumb 0".into(),
                },
                Breadcrumb {
                    level: "info".into(),
                    timestamp: 37,
                    message: "breadcrumb 1".into(),
                },
            ],
            timestamp: 1_700_000_000,
        }
    }

    fn options() -> CrashOptions {
        let mut options = CrashOptions::new();
        options.path = "/srv/app".into();
        options.command = "\"./tester\" \"1\"".into();
        options.release = "deadbeef".into();
        options.dist = "42".into();
        options
    }

    fn event_for(cause: CrashCause) -> serde_json::Value {
        let payload = sentry_json(&report_with(Some(cause)), &options()).unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[test]
    fn segfault_event_matches_schema() {
        let event = event_for(CrashCause::Signal {
            signum: libc::SIGSEGV,
            fault_address: 0x42,
        });
        assert_eq!(event["platform"], "c");
        assert_eq!(event["level"], "fatal");
        assert_eq!(event["logger"], "faultline");
        assert_eq!(event["environment"], "local");
        assert_eq!(event["release"], "deadbeef");
        assert_eq!(event["dist"], "42");
        assert_eq!(event["tags"]["path"], "/srv/app");
        assert_eq!(event["tags"]["commandline"], "\"./tester\" \"1\"");
        assert_eq!(event["timestamp"], 1_700_000_000i64);
        assert_eq!(event["event_id"].as_str().unwrap().len(), 32);

        let value = &event["exception"]["values"][0];
        assert_eq!(value["mechanism"]["type"], "signalhandler");
        assert_eq!(value["mechanism"]["handled"], false);
        assert_eq!(value["mechanism"]["data"]["relevant_address"], "0x42");
        assert_eq!(
            value["mechanism"]["meta"]["signal"]["number"],
            libc::SIGSEGV
        );
        assert_eq!(value["type"], "Segmentation fault");
        assert_eq!(
            value["value"],
            format!("Segmentation fault ({}) on address 0x42.", libc::SIGSEGV)
        );
        assert_eq!(value["thread_id"], "my-context");
        assert!(value["user"]["id"].is_u64());
        assert!(value["user"].get("username").is_none());
    }

    #[test]
    fn frames_are_outermost_first_and_never_empty() {
        let event = event_for(CrashCause::Signal {
            signum: libc::SIGSEGV,
            fault_address: 0,
        });
        let frames = event["exception"]["values"][0]["stacktrace"]["frames"]
            .as_array()
            .unwrap();
        // The all-empty frame is dropped; the remaining two come reversed.
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["function"], "tester::bar()");
        assert!(frames[0].get("filename").is_none());
        assert_eq!(frames[1]["function"], "tester::crash()");
        assert_eq!(frames[1]["package"], "./tester");
        assert_eq!(frames[1]["filename"], "src/tester.rs");
        assert_eq!(frames[1]["lineno"], 17);
        for frame in frames {
            if let Some(filename) = frame.get("filename") {
                assert_ne!(filename, "");
            }
        }
    }

    #[test]
    fn abort_signal_has_no_relevant_address() {
        let event = event_for(CrashCause::Signal {
            signum: libc::SIGABRT,
            fault_address: 0,
        });
        let mechanism = &event["exception"]["values"][0]["mechanism"];
        assert_eq!(mechanism["type"], "signalhandler");
        assert!(mechanism.get("data").is_none());
        assert_eq!(mechanism["meta"]["signal"]["number"], libc::SIGABRT);
    }

    #[test]
    fn uncaught_exception_event() {
        let event = event_for(CrashCause::UncaughtException {
            description: "number: 42".into(),
            type_name: "unsigned int".into(),
        });
        let value = &event["exception"]["values"][0];
        assert_eq!(value["mechanism"]["type"], "UncaughtExceptionHandler");
        assert_eq!(value["mechanism"]["handled"], false);
        assert_eq!(value["type"], "unsigned int");
        assert_eq!(value["value"], "unsigned int exception: number: 42.");
    }

    #[test]
    fn assertion_event() {
        let event = event_for(CrashCause::AssertionViolation {
            function: "bar".into(),
            file: "tester.rs".into(),
            line: 27,
            condition: "false".into(),
            explanation: "".into(),
        });
        let value = &event["exception"]["values"][0];
        assert_eq!(value["mechanism"]["type"], "AssertionViolation");
        assert_eq!(value["type"], "assert");
        assert_eq!(
            value["value"],
            "assertion false in bar [tester.rs:27] violated, due to ."
        );
    }

    #[test]
    fn breadcrumbs_keep_insertion_order() {
        let event = event_for(CrashCause::Signal {
            signum: libc::SIGSEGV,
            fault_address: 0,
        });
        let values = event["breadcrumbs"]["values"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["message"], "breadcrumb 0");
        assert_eq!(values[0]["timestamp"], 42);
        assert_eq!(values[0]["level"], "error");
        assert_eq!(values[1]["message"], "breadcrumb 1");
        assert_eq!(values[1]["timestamp"], 37);
        assert_eq!(values[1]["level"], "info");
    }

    #[test]
    fn empty_context_omits_thread_id() {
        let mut report = report_with(Some(CrashCause::Signal {
            signum: libc::SIGSEGV,
            fault_address: 0,
        }));
        report.context = String::new();
        let payload = sentry_json(&report, &options()).unwrap();
        let event: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(event["exception"]["values"][0].get("thread_id").is_none());
    }

    #[test]
    fn plain_text_contains_cause_frames_and_breadcrumbs() {
        let report = report_with(Some(CrashCause::AssertionViolation {
            function: "bar".into(),
            file: "tester.rs".into(),
            line: 27,
            condition: "false".into(),
            explanation: "lost invariant".into(),
        }));
        let text = plain_text(&report, &options());
        assert!(text.contains("=== CRASH ==="));
        assert!(text.contains("Assertion violation in bar [tester.rs:27]: false."));
        assert!(text.contains("This is due to lost invariant."));
        assert!(text.contains("  at tester::crash() [src/tester.rs:17]"));
        assert!(text.contains("  at tester::bar()"));
        assert!(text.contains("  at (unknown)"));
        assert!(text.contains("Command: \"./tester\" \"1\""));
        assert!(text.contains("   Path: /srv/app"));
        assert!(text.contains("[error] breadcrumb 0"));
        assert!(text.contains("[info] breadcrumb 1"));
    }

    #[test]
    fn username_appears_only_when_requested() {
        let mut with_username = options();
        with_username.report_username = true;
        let payload = sentry_json(
            &report_with(Some(CrashCause::Signal {
                signum: libc::SIGSEGV,
                fault_address: 0,
            })),
            &with_username,
        )
        .unwrap();
        let event: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let user = &event["exception"]["values"][0]["user"];
        // The password database should know whoever runs the tests.
        assert!(user["username"].as_str().is_some());
    }
}
