// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frame filtering and dynamic-loader resolution.
//!
//! The top of any captured stack is the crash machinery itself, which the
//! user does not care about. A filter list of handler symbol names drops
//! everything up to and including the first match; frames whose symbol is
//! on the list are dropped wherever they appear. What survives is resolved
//! through `dladdr` into library frames, or emitted as bare PCs when the
//! loader knows nothing.

use super::emitters::FrameSink;
use std::ffi::CStr;

/// Skip-until-match filter over symbol names. Exact string equality, like
/// the loader gives exact symbol names.
pub struct FrameFilter<'a> {
    filter: Option<&'a [&'a str]>,
    skip_until_match: bool,
}

impl<'a> FrameFilter<'a> {
    pub fn new(filter: Option<&'a [&'a str]>) -> Self {
        Self {
            filter,
            skip_until_match: true,
        }
    }

    /// Should a frame with this symbol be emitted?
    pub fn display(&mut self, name: Option<&str>) -> bool {
        let Some(filter) = self.filter else {
            return true;
        };
        if let Some(name) = name {
            if filter.contains(&name) {
                self.skip_until_match = false;
                return false;
            }
        }
        !self.skip_until_match
    }

    /// Should a frame with no symbol at all be emitted?
    pub fn display_unresolved(&self) -> bool {
        match self.filter {
            Some(_) => !self.skip_until_match,
            None => true,
        }
    }
}

/// True for the symbols that mark the top of the useful stack: the program
/// entry, or the host's top-level scheduler loop.
fn is_outermost(symbol: &str) -> bool {
    symbol.starts_with("main") || symbol.starts_with("GlobalDispatcherRun")
}

/// Resolves one PC through the dynamic loader, applies the filter, and
/// hands the survivor to `sink`. Returns `true` when the walk should stop.
///
/// Needs the executable linked with `--export-dynamic` (or equivalent) for
/// main-executable symbols to resolve at all; without that, frames degrade
/// to bare PCs.
pub fn process_pc(pc: u64, filter: &mut FrameFilter<'_>, sink: &mut dyn FrameSink) -> bool {
    // SAFETY: dladdr only inspects loader metadata for the given address.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(pc as usize as *const libc::c_void, &mut info) } != 0 {
        let symbol = if info.dli_sname.is_null() {
            None
        } else {
            // SAFETY: the loader hands back a NUL-terminated static string.
            unsafe { CStr::from_ptr(info.dli_sname) }.to_str().ok()
        };
        if !filter.display(symbol) {
            return false;
        }
        let library = if info.dli_fname.is_null() {
            ""
        } else {
            // SAFETY: as above.
            unsafe { CStr::from_ptr(info.dli_fname) }.to_str().unwrap_or("")
        };
        let offset_in_library = pc.wrapping_sub(info.dli_fbase as usize as u64) as u32;
        sink.library_frame(symbol, library, offset_in_library, pc);
        return symbol.is_some_and(is_outermost);
    }
    if !filter.display_unresolved() {
        return false;
    }
    sink.pc_frame(pc);
    false
}
