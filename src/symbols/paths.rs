// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Path plumbing for symbolication.
//!
//! The dynamic loader and the debug info disagree about what a "file name"
//! is: `dladdr` hands back whatever `argv[0]` looked like, DWARF carries
//! build-tree paths. These helpers normalize both for lookup and display.

/// The final path component, like `basename(3)`.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything after the first `/`, used to drop one build-prefix component
/// from DWARF file names.
pub fn after_first_path(path: &str) -> &str {
    match path.find('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// The directory part including the trailing `/`, or empty.
pub fn raw_dir_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx + 1],
        None => "",
    }
}

/// True when the loader gave us a bare command name rather than a path.
pub fn is_bare_command(path: &str) -> bool {
    path.len() >= 2 && !path.starts_with('/') && !path.starts_with("./")
}

/// The canonical on-disk path of the running executable. Resolved through
/// the OS (`/proc/self/exe` on Linux, `KERN_PROC_PATHNAME` on FreeBSD,
/// `_NSGetExecutablePath` on macOS, all via `std::env::current_exe`) and
/// then `realpath`.
pub fn canonical_executable() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let resolved = std::fs::canonicalize(&exe).unwrap_or(exe);
    Some(resolved.to_string_lossy().into_owned())
}

/// Resolves the executable the host named in its options to something the
/// symbolicator can open later.
///
/// On Linux the loader reports the start command for main-executable
/// symbols, so the raw name is kept and the canonical path is substituted
/// at lookup time. Elsewhere the loader reports real paths, so resolve the
/// name up front: a bare command through the OS, a relative path through
/// `realpath`.
pub fn resolve_executable(executable: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        executable.to_string()
    }
    #[cfg(not(target_os = "linux"))]
    {
        if is_bare_command(executable) {
            return canonical_executable().unwrap_or_else(|| executable.to_string());
        }
        match std::fs::canonicalize(executable) {
            Ok(resolved) => resolved.to_string_lossy().into_owned(),
            Err(e) => {
                eprintln!("resolve_executable: realpath error: {e}");
                executable.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_variants() {
        assert_eq!(base_name("/usr/lib/libc.so.7"), "libc.so.7");
        assert_eq!(base_name("tester"), "tester");
        assert_eq!(base_name("dir/"), "");
    }

    #[test]
    fn after_first_path_strips_one_component() {
        assert_eq!(after_first_path("project/src/main.rs"), "src/main.rs");
        assert_eq!(
            after_first_path(after_first_path("project/src/main.rs")),
            "main.rs"
        );
        assert_eq!(after_first_path("main.rs"), "main.rs");
    }

    #[test]
    fn raw_dir_name_keeps_slash() {
        assert_eq!(raw_dir_name("src/bin/tool.rs"), "src/bin/");
        assert_eq!(raw_dir_name("tool.rs"), "");
    }

    #[test]
    fn bare_command_detection() {
        assert!(is_bare_command("tester"));
        assert!(is_bare_command("my-global-command"));
        assert!(!is_bare_command("/usr/bin/tester"));
        assert!(!is_bare_command("./tester"));
        assert!(!is_bare_command("t"));
    }

    #[test]
    fn canonical_executable_exists() {
        let exe = canonical_executable().unwrap();
        assert!(exe.starts_with('/'));
        assert!(std::path::Path::new(&exe).exists());
    }
}
