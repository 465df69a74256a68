// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! ANSI styling for the human-readable dump. Colors engage only when
//! standard error is a terminal.

pub const RED: &str = "\x1b[1;31m";
pub const GREEN: &str = "\x1b[1;32m";
pub const YELLOW: &str = "\x1b[1;33m";
pub const BLUE: &str = "\x1b[1;34m";
/// Bright white, for the parts a reader scans for.
pub const FULL: &str = "\x1b[1;37m";
pub const DIM: &str = "\x1b[1;90m";
pub const UNDERLINE: &str = "\x1b[4m";
pub const UNDERLINE_RESET: &str = "\x1b[24m";
pub const RESET: &str = "\x1b[0m";

pub const BAR: &str = "==========";
pub const ALIGN: &str = "    ";

pub const SYMBOL_BULLET: &str = "~~> ";
pub const SYMBOL_LOG: &str = "<|> ";
pub const SYMBOL_CONTEXT: &str = "->> ";
pub const SYMBOL_COMMANDLINE: &str = ">>-";

/// True when the dump should be styled.
pub fn color_enabled() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}
