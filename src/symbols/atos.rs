// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! macOS symbolication fallback.
//!
//! Linked images on macOS do not carry DWARF (it stays in the object files
//! or a dSYM bundle), so the reporter shells out to `atos`, which knows how
//! to chase both. Output looks like:
//!
//! ```text
//! main (in tester) (tester.cpp:37)
//! ```

#![cfg(target_os = "macos")]

use std::process::Command;

/// One resolved frame from `atos`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtosHit {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Runs `atos -o <image> -l <base> <pc>` and parses the single output line.
/// Any failure yields `None`; the formatter falls back to the raw PC.
pub fn resolve(image: &str, load_base: u64, pc: u64) -> Option<AtosHit> {
    let output = Command::new("/usr/bin/atos")
        .arg("-o")
        .arg(image)
        .arg("-l")
        .arg(format!("{load_base:#x}"))
        .arg(format!("{pc:#x}"))
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_line(String::from_utf8_lossy(&output.stdout).trim())
}

fn parse_line(line: &str) -> Option<AtosHit> {
    if line.is_empty() {
        return None;
    }
    let mut hit = AtosHit {
        function: line.split_whitespace().next().unwrap_or("").to_string(),
        ..Default::default()
    };
    // The source location, when atos knows it, is the trailing
    // "(file:line)" group.
    if let Some(open) = line.rfind('(') {
        let group = line[open + 1..].trim_end_matches(')');
        if let Some((file, lineno)) = group.rsplit_once(':') {
            if let Ok(lineno) = lineno.parse::<u32>() {
                hit.file = file.to_string();
                hit.line = lineno;
            }
        }
    }
    if hit.function.is_empty() {
        return None;
    }
    Some(hit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_form() {
        let hit = parse_line("main (in tester) (tester.cpp:37)").unwrap();
        assert_eq!(hit.function, "main");
        assert_eq!(hit.file, "tester.cpp");
        assert_eq!(hit.line, 37);
    }

    #[test]
    fn parses_bare_symbol() {
        let hit = parse_line("0x1040 (in tester)").unwrap();
        assert_eq!(hit.function, "0x1040");
        assert_eq!(hit.file, "");
        assert_eq!(hit.line, 0);
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_line("").is_none());
    }
}
