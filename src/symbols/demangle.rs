// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Symbol demangling. Itanium C++ and both Rust schemes are handled by the
//! symbolic stack; anything it does not recognize passes through untouched.

use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Demangles `name` for display; returns the input unchanged when the
/// mangling is unknown or malformed.
pub fn demangle(name: &str) -> String {
    Name::from(name)
        .demangle(DemangleOptions::complete())
        .unwrap_or_else(|| name.to_string())
}

/// Like [`demangle`], for type names that may be absent: empty maps to
/// `"unknown"` so cause lines always have a subject.
pub fn demangle_type(name: &str) -> String {
    if name.is_empty() {
        return "unknown".to_string();
    }
    demangle(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demangles_cpp() {
        assert_eq!(demangle("_ZN4core3fooEv"), "core::foo()");
    }

    #[test]
    fn demangles_rust_legacy() {
        let demangled = demangle("_ZN3std9panicking11begin_panic17h1234567890abcdefE");
        assert!(demangled.starts_with("std::panicking::begin_panic"));
    }

    #[test]
    fn passes_through_plain_names() {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle("handle_fatal_signal"), "handle_fatal_signal");
    }

    #[test]
    fn empty_type_is_unknown() {
        assert_eq!(demangle_type(""), "unknown");
        assert_eq!(demangle_type("&str"), "&str");
    }
}
