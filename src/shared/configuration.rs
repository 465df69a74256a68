// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-facing configuration for crash reporting.
//!
//! `CrashOptions` is built once by the host and handed to
//! [`generate_dump_on_crash`](crate::generate_dump_on_crash). After the
//! reporter fork, both processes hold a copy: the reporter uses the
//! formatting fields and the `prepare`/`sender` hooks, the crashed process
//! keeps only the subset reachable from signal-safe code (the context and
//! breadcrumb callbacks).

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

/// What the reporter hands to the sender, if anything.
///
/// There is deliberately no built-in transport: uploading to an HTTPS
/// endpoint is the host's job, through the `sender` hook.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFormat {
    /// Terminal output only; no payload is built or dispatched.
    #[default]
    None = 0,
    /// The human-readable dump, as one string.
    PlainText = 1,
    /// A single JSON object in the Sentry event schema.
    JsonSentry = 2,
}

/// Invoked in the reporter before it blocks on the pipe.
pub type PrepareFn = Box<dyn Fn(SendFormat) + Send + Sync>;

/// Invoked in the reporter with the formatted payload; returns success.
pub type SenderFn = Box<dyn Fn(SendFormat, &str) -> bool + Send + Sync>;

/// Names the logical executor (thread, fiber, job) of the crash. Called on
/// the fatal path; prefer returning borrowed data.
pub type ContextFn = Box<dyn Fn() -> Cow<'static, str> + Send + Sync>;

/// Receives `(level, unix timestamp, message bytes)` per breadcrumb.
pub type BreadcrumbVisitor<'a> = &'a mut dyn FnMut(&str, u64, &[u8]);

/// Streams breadcrumbs, oldest first, into the visitor. Called on the fatal
/// path, so the host should replay entries out of a preallocated ring
/// instead of building them on the fly.
pub type BreadcrumbsFn = Box<dyn Fn(BreadcrumbVisitor<'_>) + Send + Sync>;

/// Renders a panic payload the standard downcasts cannot, e.g. a typed
/// value passed to `std::panic::panic_any`.
pub type ConvertPanicFn = Box<dyn Fn(&(dyn Any + Send)) -> Option<String> + Send + Sync>;

/// Everything the host can configure, in one record. No hidden globals
/// beyond this, the pipe descriptor and the reporter pid.
#[derive(Default)]
pub struct CrashOptions {
    /// Resolved at setup; the reporter needs it to symbolicate frames from
    /// the main executable.
    pub current_executable: String,
    pub send_format: SendFormat,
    pub prepare: Option<PrepareFn>,
    pub sender: Option<SenderFn>,
    pub get_context: Option<ContextFn>,
    pub get_breadcrumbs: Option<BreadcrumbsFn>,
    pub convert_panic: Option<ConvertPanicFn>,
    /// Suggestion: the git revision.
    pub release: String,
    /// Distribution, e.g. a CI pipeline id.
    pub dist: String,
    pub environment: String,
    /// The quoted command line, as captured by
    /// [`set_command_line`](CrashOptions::set_command_line).
    pub command: String,
    pub path: String,
    /// Look up the username via the password database when formatting.
    /// Off by default: `getpwuid_r` can touch the dynamic loader, which has
    /// been seen to crash the reporter of a corrupted process.
    pub report_username: bool,
}

impl CrashOptions {
    pub fn new() -> Self {
        Self {
            environment: "local".to_string(),
            ..Default::default()
        }
    }

    /// Captures the command line for the report and takes the executable
    /// path from the first argument, the way shells hand it to us.
    pub fn set_command_line<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut command = String::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i == 0 {
                self.current_executable = arg.as_ref().to_string();
            } else {
                command.push(' ');
            }
            command.push('"');
            for c in arg.as_ref().chars() {
                if c == '"' || c == '\\' {
                    command.push('\\');
                }
                command.push(c);
            }
            command.push('"');
        }
        self.command = command;
    }
}

impl fmt::Debug for CrashOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashOptions")
            .field("current_executable", &self.current_executable)
            .field("send_format", &self.send_format)
            .field("prepare", &self.prepare.is_some())
            .field("sender", &self.sender.is_some())
            .field("get_context", &self.get_context.is_some())
            .field("get_breadcrumbs", &self.get_breadcrumbs.is_some())
            .field("convert_panic", &self.convert_panic.is_some())
            .field("release", &self.release)
            .field("dist", &self.dist)
            .field("environment", &self.environment)
            .field("command", &self.command)
            .field("path", &self.path)
            .field("report_username", &self.report_username)
            .finish()
    }
}
