//! Detector-to-component id mapping tables.
//!
//! The on-disk format is a whitespace-separated table: the first
//! non-blank line names each component, and every following row gives
//! that detector's component indices, in ascending detector-id order.
//! Reader and writer round-trip exactly.

use crate::error::{Error, Result};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Component name to per-detector component id.
pub type IdMapping = BTreeMap<String, Vec<i32>>;

/// The identity mapping every scene gets when no mapping file is given:
/// one `detector` component per detector id.
#[must_use]
pub fn default_mapping(no_detectors: usize) -> IdMapping {
    let mut mapping = IdMapping::new();
    mapping.insert(
        "detector".to_string(),
        (0..no_detectors).map(|id| i32::try_from(id).unwrap_or(i32::MAX)).collect(),
    );
    mapping
}

/// Parses a mapping table.
///
/// # Errors
///
/// Fails on a missing header, ragged rows, or unparsable ids.
pub fn parse_mapping(input: &str) -> Result<IdMapping> {
    let mut lines = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));
    let header = lines
        .next()
        .ok_or_else(|| Error::General("mapping file has no header".to_string()))?;
    let names: Vec<&str> = header.split_whitespace().collect();

    let mut columns: Vec<Vec<i32>> = vec![Vec::new(); names.len()];
    for (row_no, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != names.len() {
            return Err(Error::General(format!(
                "mapping row {} has {} fields, expected {}",
                row_no + 1,
                fields.len(),
                names.len()
            )));
        }
        for (column, field) in columns.iter_mut().zip(fields) {
            let id = field.parse().map_err(|_| {
                Error::General(format!("invalid component id in mapping: {field}"))
            })?;
            column.push(id);
        }
    }

    let mut mapping = IdMapping::new();
    for (name, column) in names.iter().zip(columns) {
        if mapping.insert((*name).to_string(), column).is_some() {
            return Err(Error::General(format!(
                "duplicate component name in mapping: {name}"
            )));
        }
    }
    Ok(mapping)
}

/// Renders a mapping table in the round-trippable on-disk format.
///
/// # Errors
///
/// Fails when the component columns have mismatched lengths.
pub fn write_mapping(mapping: &IdMapping) -> Result<String> {
    let no_detectors = mapping
        .values()
        .next()
        .map_or(0, Vec::len);
    if mapping.values().any(|column| column.len() != no_detectors) {
        return Err(Error::General(
            "mapping columns have mismatched lengths".to_string(),
        ));
    }

    let mut output = String::new();
    let names: Vec<&String> = mapping.keys().collect();
    let _ = writeln!(output, "{}", names.iter().join(" "));
    for detector in 0..no_detectors {
        let _ = writeln!(
            output,
            "{}",
            names.iter().map(|name| mapping[*name][detector]).join(" ")
        );
    }
    Ok(output)
}

/// Loads a mapping table from a file.
///
/// # Errors
///
/// Propagates I/O and parse failures.
pub fn load_mapping_file(path: &Path) -> Result<IdMapping> {
    let contents = fs::read_to_string(path)
        .map_err(|err| Error::General(format!("{}: {err}", path.display())))?;
    parse_mapping(&contents)
}

/// Writes a mapping table to a file.
///
/// # Errors
///
/// Propagates I/O and rendering failures.
pub fn write_mapping_file(path: &Path, mapping: &IdMapping) -> Result<()> {
    fs::write(path, write_mapping(mapping)?)
        .map_err(|err| Error::General(format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_the_mapping() {
        let text = "detector block bx by bz\n0 0 0 0 0\n1 0 1 0 0\n2 0 0 1 0\n3 0 1 1 0\n";
        let mapping = parse_mapping(text).unwrap();
        assert_eq!(mapping["detector"], vec![0, 1, 2, 3]);
        assert_eq!(mapping["bx"], vec![0, 1, 0, 1]);

        let written = write_mapping(&mapping).unwrap();
        let reloaded = parse_mapping(&written).unwrap();
        assert_eq!(mapping, reloaded);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(parse_mapping("detector block\n0 0\n1\n").is_err());
    }

    #[test]
    fn default_mapping_is_the_identity() {
        let mapping = default_mapping(3);
        assert_eq!(mapping["detector"], vec![0, 1, 2]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# comment\n\ndetector\n0\n1\n";
        let mapping = parse_mapping(text).unwrap();
        assert_eq!(mapping["detector"], vec![0, 1]);
    }
}
