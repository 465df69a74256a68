// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants for the pipe protocol between the crashed process and the
//! reporter sidecar.
//!
//! A crash record is a tag-length-value stream: one `Start`, one cause tag
//! (`Signal`, `UncaughtException` or `Assert`), any number of `Library`/`Pc`
//! frames in capture order, an optional `Context`, any number of
//! `Breadcrumb` entries, and a closing `Finish`. The reporter discards any
//! stream that does not follow this shape.

/// Tags framing the TLV stream. Wire values are fixed; changing them breaks
/// the collector/reporter pairing within a single executable image.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashTag {
    Start = 1,
    Signal,
    UncaughtException,
    Assert,
    Library,
    Pc,
    Breadcrumb,
    Context,
    Finish,
}

impl CrashTag {
    /// Decodes a wire tag. Unknown values are a framing error.
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(CrashTag::Start),
            2 => Some(CrashTag::Signal),
            3 => Some(CrashTag::UncaughtException),
            4 => Some(CrashTag::Assert),
            5 => Some(CrashTag::Library),
            6 => Some(CrashTag::Pc),
            7 => Some(CrashTag::Breadcrumb),
            8 => Some(CrashTag::Context),
            9 => Some(CrashTag::Finish),
            _ => None,
        }
    }
}

/// Hard cap on strings emitted from the crashed process. Longer strings are
/// written as empty rather than truncated: truncation would need a copy
/// buffer, which the signal path cannot allocate.
pub const STRING_MAX: usize = 8192;

/// Cap on a breadcrumb message body. Breadcrumbs come out of host log
/// buffers, so these are truncated (a prefix is still useful) rather than
/// dropped.
pub const BREADCRUMB_MAX: usize = 1024;

#[cfg(test)]
mod tests {
    use super::CrashTag;

    #[test]
    fn tag_round_trip() {
        for tag in [
            CrashTag::Start,
            CrashTag::Signal,
            CrashTag::UncaughtException,
            CrashTag::Assert,
            CrashTag::Library,
            CrashTag::Pc,
            CrashTag::Breadcrumb,
            CrashTag::Context,
            CrashTag::Finish,
        ] {
            assert_eq!(CrashTag::from_u32(tag as u32), Some(tag));
        }
        assert_eq!(CrashTag::from_u32(0), None);
        assert_eq!(CrashTag::from_u32(10), None);
    }
}
