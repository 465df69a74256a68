// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! DWARF lookups: program counter to source line, and program counter to
//! subprogram name.
//!
//! Parsing is delegated to `gimli` (sections come off disk via `object`);
//! this module only walks what the parser exposes. Both lookups scan every
//! compilation unit until satisfied, the target address is file-relative
//! (callers subtract the load base for PIE/shared objects), and failure of
//! any kind degrades to "not found" rather than an error the reporter would
//! have to handle mid-dump.

use anyhow::Context;
use gimli::{AttributeValue, RunTimeEndian};
use gimli::Reader as _;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::sync::Arc;

type Reader = gimli::EndianArcSlice<RunTimeEndian>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHit {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHit {
    pub name: String,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LookupOutcome {
    pub source: Option<SourceHit>,
    pub function: Option<FunctionHit>,
}

impl LookupOutcome {
    fn satisfied(&self, want_source: bool, want_function: bool) -> bool {
        (!want_source || self.source.is_some()) && (!want_function || self.function.is_some())
    }
}

/// Opens `path` and resolves `target` against its debug info.
///
/// `want_source` and `want_function` mirror the caller's knowledge: when the
/// dynamic loader already produced a symbol name, only the source location
/// is still missing.
pub fn lookup(
    path: &str,
    target: u64,
    want_source: bool,
    want_function: bool,
) -> anyhow::Result<LookupOutcome> {
    let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
    let file = object::File::parse(&*data).with_context(|| format!("parsing {path}"))?;
    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let dwarf = gimli::Dwarf::load(|id| -> Result<Reader, gimli::Error> {
        let bytes = file
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        Ok(gimli::EndianArcSlice::new(
            Arc::from(bytes.as_ref()),
            endian,
        ))
    })?;

    let mut outcome = LookupOutcome::default();
    let mut headers = dwarf.units();
    while let Some(header) = headers.next()? {
        let unit = dwarf.unit(header)?;
        if want_source && outcome.source.is_none() {
            outcome.source = lookup_source_line(&dwarf, &unit, target)?;
        }
        if want_function && outcome.function.is_none() {
            outcome.function = lookup_subprogram(&dwarf, &unit, target)?;
        }
        if outcome.satisfied(want_source, want_function) {
            break;
        }
    }
    Ok(outcome)
}

/// Scans the unit's line program for the row pair bracketing `target`: the
/// greatest `row.address <= target < next_row.address`, ties broken by the
/// smallest distance to the row. Sequences reset the bracketing, so ranges
/// never span unrelated code.
fn lookup_source_line(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    target: u64,
) -> Result<Option<SourceHit>, gimli::Error> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(None);
    };

    struct Row {
        address: u64,
        file_index: u64,
        line: u32,
        column: u32,
    }

    let mut rows = program.rows();
    let mut prev: Option<Row> = None;
    let mut best: Option<(u64, Row)> = None;
    while let Some((_, row)) = rows.next_row()? {
        let address = row.address();
        if let Some(candidate) = prev.take() {
            if candidate.address <= target && target < address {
                let distance = target - candidate.address;
                if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                    best = Some((distance, candidate));
                }
            }
        }
        if row.end_sequence() {
            continue;
        }
        prev = Some(Row {
            address,
            file_index: row.file_index(),
            line: row.line().map(|l| l.get() as u32).unwrap_or(0),
            column: match row.column() {
                gimli::ColumnType::LeftEdge => 0,
                gimli::ColumnType::Column(c) => c.get() as u32,
            },
        });
    }

    let Some((_, row)) = best else {
        return Ok(None);
    };
    let header = unit.line_program.as_ref().map(|p| p.header());
    let Some(header) = header else {
        return Ok(None);
    };
    let Some(entry) = header.file(row.file_index) else {
        return Ok(None);
    };

    let mut file = String::new();
    if let Some(dir) = entry.directory(header) {
        if let Ok(dir) = dwarf.attr_string(unit, dir) {
            file.push_str(&dir.to_string_lossy()?);
        }
    }
    let name = dwarf.attr_string(unit, entry.path_name())?;
    let name = name.to_string_lossy()?;
    if name.starts_with('/') {
        file = name.into_owned();
    } else {
        if !file.is_empty() && !file.ends_with('/') {
            file.push('/');
        }
        file.push_str(&name);
    }

    Ok(Some(SourceHit {
        file,
        line: row.line,
        column: row.column,
    }))
}

/// Walks the unit's DIEs for the first subprogram whose `[low_pc, high_pc)`
/// contains `target`.
///
/// `DW_AT_low_pc` is an address (possibly indexed through `.debug_addr` in
/// DWARF 5). `DW_AT_high_pc` is either an address or an offset from
/// `low_pc`, unsigned or signed depending on the form the producer chose.
fn lookup_subprogram(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    target: u64,
) -> Result<Option<FunctionHit>, gimli::Error> {
    let mut entries = unit.entries();
    while let Some((_, die)) = entries.next_dfs()? {
        if die.tag() != gimli::DW_TAG_subprogram {
            continue;
        }
        let Some(name_attr) = die.attr(gimli::DW_AT_name)? else {
            continue;
        };

        let Some(low) = die
            .attr_value(gimli::DW_AT_low_pc)?
            .and_then(|value| attr_address(dwarf, unit, value))
        else {
            continue;
        };
        let Some(high_attr) = die.attr_value(gimli::DW_AT_high_pc)? else {
            continue;
        };
        let high = match attr_address(dwarf, unit, high_attr.clone()) {
            Some(address) => address,
            None => {
                if let Some(offset) = high_attr.udata_value() {
                    low.wrapping_add(offset)
                } else if let Some(offset) = high_attr.sdata_value() {
                    low.wrapping_add_signed(offset)
                } else {
                    continue;
                }
            }
        };

        if low > target || high == 0 || target >= high {
            continue;
        }
        let name = dwarf.attr_string(unit, name_attr.value())?;
        return Ok(Some(FunctionHit {
            name: name.to_string_lossy()?.into_owned(),
            offset: target - low,
        }));
    }
    Ok(None)
}

fn attr_address(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    value: AttributeValue<Reader>,
) -> Option<u64> {
    match value {
        AttributeValue::Addr(address) => Some(address),
        AttributeValue::DebugAddrIndex(index) => dwarf.address(unit, index).ok(),
        _ => None,
    }
}
