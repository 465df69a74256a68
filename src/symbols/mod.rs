// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reporter-side symbolication.
//!
//! Maps `(library, offset)` or `(pc, current executable)` to a demangled
//! function name and source location, best-effort: every field of the
//! result may come back empty and the caller degrades to whatever survived.
//! Never aborts; a library that cannot be opened or parsed simply resolves
//! to nothing.

#[cfg(target_os = "macos")]
mod atos;
#[cfg(not(target_os = "macos"))]
pub mod dwarf;
pub mod demangle;
pub mod paths;

use crate::shared::term;
pub use demangle::{demangle, demangle_type};

/// What symbolication produced for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolInfo {
    /// Demangled function name, or empty.
    pub function: String,
    /// Display path of the image the frame lives in, or empty.
    pub library: String,
    /// Source file with the build prefix stripped, or empty.
    pub source_file: String,
    pub line: u32,
    pub column: u32,
}

/// Resolves a frame the dynamic loader already attributed to a library.
///
/// When the frame belongs to the main executable the lookup first tries the
/// absolute `pc` against the canonical executable path; shared objects are
/// probed by their file offset. The symbol name from the loader wins over
/// anything DWARF has to say, and is demangled either way.
#[cfg(not(target_os = "macos"))]
pub fn resolve_symbol(
    symbol: Option<&str>,
    library: &str,
    offset_in_library: u32,
    pc: u64,
    current_executable: &str,
) -> SymbolInfo {
    let mut raw_name: Option<String> = symbol.map(str::to_string);
    let mut path = library.to_string();

    // The loader reports the start command for main-executable symbols on
    // Linux, which is usually a bare name and not openable. Fetch the real
    // path for the lookup; keep the configured name for display.
    #[cfg(target_os = "linux")]
    let full_executable: Option<String> = if paths::is_bare_command(library) {
        paths::canonical_executable()
    } else {
        None
    };
    #[cfg(not(target_os = "linux"))]
    let full_executable: Option<String> = None;

    let mut function = String::new();
    if !current_executable.is_empty() && library == current_executable {
        path = full_executable
            .clone()
            .unwrap_or_else(|| current_executable.to_string());
        let outcome = dwarf::lookup(&path, pc, true, raw_name.is_none()).unwrap_or_default();
        if raw_name.is_none() {
            raw_name = outcome.function.map(|f| f.name);
        }
        if let Some(name) = &raw_name {
            function = demangle(name);
        }
        if let Some(src) = outcome.source {
            return SymbolInfo {
                function,
                library: current_executable.to_string(),
                source_file: paths::after_first_path(paths::after_first_path(&src.file))
                    .to_string(),
                line: src.line,
                column: src.column,
            };
        }
    }

    let outcome =
        dwarf::lookup(&path, offset_in_library as u64, true, raw_name.is_none()).unwrap_or_default();
    if raw_name.is_none() {
        raw_name = outcome.function.map(|f| f.name);
    }
    if function.is_empty() {
        if let Some(name) = &raw_name {
            function = demangle(name);
        }
    }
    if let Some(src) = outcome.source {
        return SymbolInfo {
            function,
            library: path,
            source_file: paths::after_first_path(&src.file).to_string(),
            line: src.line,
            column: src.column,
        };
    }
    SymbolInfo {
        function,
        ..Default::default()
    }
}

#[cfg(target_os = "macos")]
pub fn resolve_symbol(
    symbol: Option<&str>,
    library: &str,
    offset_in_library: u32,
    pc: u64,
    _current_executable: &str,
) -> SymbolInfo {
    let function = symbol.map(demangle).unwrap_or_default();
    let load_base = pc.wrapping_sub(offset_in_library as u64);
    match atos::resolve(library, load_base, pc) {
        Some(hit) if !hit.file.is_empty() => SymbolInfo {
            function: if function.is_empty() { hit.function } else { function },
            library: library.to_string(),
            source_file: hit.file,
            line: hit.line,
            column: 0,
        },
        _ => SymbolInfo {
            function,
            ..Default::default()
        },
    }
}

/// Resolves a frame the loader could not attribute at all. Only the main
/// executable is probed, by absolute address; this works for fully static
/// binaries with debug info.
#[cfg(not(target_os = "macos"))]
pub fn resolve_pc(pc: u64, current_executable: &str) -> SymbolInfo {
    // A bare start command is what the loader usually leaves us with on
    // Linux; substitute the canonical path so the lookup can open it.
    let path = if current_executable.is_empty() || paths::is_bare_command(current_executable) {
        paths::canonical_executable().unwrap_or_else(|| current_executable.to_string())
    } else {
        current_executable.to_string()
    };

    let outcome = dwarf::lookup(&path, pc, true, true).unwrap_or_default();
    if let (Some(function), Some(src)) = (outcome.function, outcome.source) {
        return SymbolInfo {
            function: demangle(&function.name),
            library: current_executable.to_string(),
            source_file: paths::after_first_path(paths::after_first_path(&src.file)).to_string(),
            line: src.line,
            column: src.column,
        };
    }
    SymbolInfo {
        library: current_executable.to_string(),
        ..Default::default()
    }
}

#[cfg(target_os = "macos")]
pub fn resolve_pc(_pc: u64, current_executable: &str) -> SymbolInfo {
    SymbolInfo {
        library: current_executable.to_string(),
        ..Default::default()
    }
}

/// Prints one fully resolved frame line.
fn print_line(function: &str, module: &str, offset: u64, filename: &str, line: u32) {
    let directory = paths::raw_dir_name(filename);
    let base = paths::base_name(filename);
    if term::color_enabled() {
        eprintln!(
            "{}{}{}{}{}{} in {}{}+{offset:#x}{}\n{}[{directory}{}{base}{}:{line}]{}",
            term::YELLOW,
            term::SYMBOL_BULLET,
            term::RESET,
            term::FULL,
            function,
            term::DIM,
            term::RESET,
            paths::base_name(module),
            term::DIM,
            term::ALIGN,
            term::UNDERLINE,
            term::UNDERLINE_RESET,
            term::RESET,
        );
    } else {
        eprintln!(
            "{}{function} in {}+{offset:#x} [{directory}{base}:{line}]",
            term::SYMBOL_BULLET,
            paths::base_name(module),
        );
    }
}

/// Resolves and prints a library frame; the record keeps the result.
pub fn resolve_and_print_symbol(
    symbol: Option<&str>,
    library: &str,
    offset_in_library: u32,
    pc: u64,
    current_executable: &str,
) -> SymbolInfo {
    let info = resolve_symbol(symbol, library, offset_in_library, pc, current_executable);
    if !info.source_file.is_empty() {
        print_line(
            &info.function,
            &info.library,
            offset_in_library as u64,
            &info.source_file,
            info.line,
        );
    } else if term::color_enabled() {
        eprintln!(
            "{}{}{}{}{}{} in {}{}{}+{offset_in_library:#x} ({pc:#x}){}",
            term::YELLOW,
            term::SYMBOL_BULLET,
            term::RESET,
            term::FULL,
            info.function,
            term::DIM,
            term::RESET,
            paths::base_name(library),
            term::DIM,
            term::RESET,
        );
    } else {
        eprintln!(
            "{}{} in {}+{offset_in_library:#x} ({pc:#x})",
            term::SYMBOL_BULLET,
            info.function,
            paths::base_name(library),
        );
    }
    info
}

/// Resolves and prints a bare-PC frame; the record keeps the result.
pub fn resolve_and_print_pc(pc: u64, current_executable: &str) -> SymbolInfo {
    let info = resolve_pc(pc, current_executable);
    if !info.function.is_empty() {
        print_line(&info.function, current_executable, pc, &info.source_file, info.line);
    } else if !info.source_file.is_empty() {
        eprintln!(
            "{}[{}:{}] ({pc:#x})",
            term::SYMBOL_BULLET,
            info.source_file,
            info.line,
        );
    } else {
        eprintln!("{}{pc:#x}", term::SYMBOL_BULLET);
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_library_keeps_demangled_symbol() {
        let info = resolve_symbol(
            Some("_ZN4core3fooEv"),
            "/nonexistent/libmissing.so",
            0x40,
            0x7f00_0000_1040,
            "/nonexistent/tester",
        );
        assert_eq!(info.function, "core::foo()");
        assert_eq!(info.library, "");
        assert_eq!(info.source_file, "");
        assert_eq!(info.line, 0);
    }

    #[test]
    fn unresolvable_pc_is_empty_but_keeps_library_display() {
        let info = resolve_pc(0x10, "/nonexistent/tester");
        assert_eq!(info.function, "");
        assert_eq!(info.library, "/nonexistent/tester");
        assert_eq!(info.source_file, "");
        assert_eq!(info.line, 0);
    }
}
