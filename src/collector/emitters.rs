// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLV emission from the crashed process.
//!
//! Everything here runs on the fatal path, so signal-handler rules apply:
//! write straight to the pipe descriptor, no allocation, no formatted stdio
//! beyond what `write(2)` can carry, and oversize strings become empty
//! strings instead of being truncated (a safe truncation would need a copy
//! buffer).

use crate::shared::codec::Encoder;
use crate::shared::constants::{CrashTag, BREADCRUMB_MAX, STRING_MAX};

/// Where captured frames go. The crash path targets the pipe; the fallback
/// path and live call-stack printing target standard error.
pub trait FrameSink {
    fn library_frame(&mut self, symbol: Option<&str>, library: &str, offset_in_library: u32, pc: u64);
    fn pc_frame(&mut self, pc: u64);
}

/// Writes a string with the victim-side cap: oversize goes out as empty.
pub fn write_string(enc: &Encoder, s: &str) {
    if s.len() >= STRING_MAX {
        enc.write_bytes(b"");
    } else {
        enc.write_bytes(s.as_bytes());
    }
}

pub fn emit_signal(enc: &Encoder, signum: i32, fault_address: u64) {
    enc.write_u32(CrashTag::Start as u32);
    enc.write_u32(CrashTag::Signal as u32);
    enc.write_u32(signum as u32);
    enc.write_u64(fault_address);
}

pub fn emit_uncaught_exception(enc: &Encoder, description: &str, type_name: &str) {
    enc.write_u32(CrashTag::Start as u32);
    enc.write_u32(CrashTag::UncaughtException as u32);
    write_string(enc, description);
    write_string(enc, type_name);
}

pub fn emit_assert(
    enc: &Encoder,
    function: &str,
    file: &str,
    line: u32,
    condition: &str,
    explanation: &str,
) {
    enc.write_u32(CrashTag::Start as u32);
    enc.write_u32(CrashTag::Assert as u32);
    write_string(enc, function);
    write_string(enc, file);
    enc.write_u32(line);
    write_string(enc, condition);
    write_string(enc, explanation);
}

pub fn emit_context(enc: &Encoder, context: &str) {
    enc.write_u32(CrashTag::Context as u32);
    write_string(enc, context);
}

/// Breadcrumb bodies are truncated rather than zeroed: they come out of a
/// host buffer the visitor already owns, so a shorter slice is free.
pub fn emit_breadcrumb(enc: &Encoder, level: &str, timestamp: u64, message: &[u8]) {
    enc.write_u32(CrashTag::Breadcrumb as u32);
    write_string(enc, level);
    enc.write_u64(timestamp);
    enc.write_bytes(&message[..message.len().min(BREADCRUMB_MAX)]);
}

pub fn emit_finish(enc: &Encoder) {
    enc.write_u32(CrashTag::Finish as u32);
}

/// Frames onto the crash pipe.
pub struct PipeSink {
    enc: Encoder,
}

impl PipeSink {
    pub fn new(enc: Encoder) -> Self {
        Self { enc }
    }
}

impl FrameSink for PipeSink {
    fn library_frame(
        &mut self,
        symbol: Option<&str>,
        library: &str,
        offset_in_library: u32,
        pc: u64,
    ) {
        self.enc.write_u32(CrashTag::Library as u32);
        write_string(&self.enc, symbol.unwrap_or(""));
        write_string(&self.enc, library);
        self.enc.write_u32(offset_in_library);
        self.enc.write_u64(pc);
    }

    fn pc_frame(&mut self, pc: u64) {
        self.enc.write_u32(CrashTag::Pc as u32);
        self.enc.write_u64(pc);
    }
}

/// Raw frames to standard error, for when the reporter never came up.
/// Names stay mangled; demangling allocates and this runs inside the
/// handler.
pub struct StderrSink;

impl FrameSink for StderrSink {
    fn library_frame(
        &mut self,
        symbol: Option<&str>,
        library: &str,
        offset_in_library: u32,
        pc: u64,
    ) {
        eprintln!(
            "~~> {}+{offset_in_library:#x} in {} ({pc:#x})",
            symbol.unwrap_or("?"),
            crate::symbols::paths::base_name(library),
        );
    }

    fn pc_frame(&mut self, pc: u64) {
        eprintln!("~~> {pc:#x}");
    }
}

/// Symbolicates and prints each frame as it arrives; used by the live,
/// non-fatal call-stack dump where allocation is fine.
pub struct ResolveSink<'a> {
    pub current_executable: &'a str,
}

impl FrameSink for ResolveSink<'_> {
    fn library_frame(
        &mut self,
        symbol: Option<&str>,
        library: &str,
        offset_in_library: u32,
        pc: u64,
    ) {
        crate::symbols::resolve_and_print_symbol(
            symbol,
            library,
            offset_in_library,
            pc,
            self.current_executable,
        );
    }

    fn pc_frame(&mut self, pc: u64) {
        crate::symbols::resolve_and_print_pc(pc, self.current_executable);
    }
}
