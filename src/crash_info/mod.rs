// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The crash record as the reporter reconstructs it from the pipe.

/// Why the process died. The three variants share nothing but the tail of
/// the wire record, so this is a plain sum, not a trait hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashCause {
    Signal {
        signum: i32,
        /// Fault address; only meaningful for SIGSEGV and SIGBUS.
        fault_address: u64,
    },
    UncaughtException {
        /// Human description, e.g. a panic message.
        description: String,
        /// Static type name as captured, possibly mangled; demangled for
        /// display by the reporter.
        type_name: String,
    },
    AssertionViolation {
        function: String,
        file: String,
        line: u32,
        condition: String,
        explanation: String,
    },
}

/// A stack frame after reporter-side symbolication. Every field is
/// best-effort; empty means unresolved and the formatter degrades
/// accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedFrame {
    pub function: String,
    pub library: String,
    pub source_file: String,
    pub line: u32,
    pub column: u32,
}

/// One host log entry captured before the crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub level: String,
    pub timestamp: u64,
    pub message: String,
}

/// A complete crash record: one cause plus everything the victim managed to
/// push through the pipe before aborting.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    pub cause: Option<CrashCause>,
    /// Innermost first, as captured.
    pub frames: Vec<ResolvedFrame>,
    /// The logical executor the crash happened on.
    pub context: String,
    /// Insertion order preserved.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Unix seconds at which the reporter started reading the record.
    pub timestamp: i64,
}

impl ResolvedFrame {
    pub fn is_unresolved(&self) -> bool {
        self.function.is_empty() && self.source_file.is_empty()
    }
}
