//! Parser for the `[Files]` mapping-file format:
//!
//! ```text
//! [Files]
//! "/path/to/local/file.exe" "appx_file.exe"
//! ```
//!
//! Quoting is strict: exactly two quoted, non-empty strings per line with
//! nothing but whitespace between or around them. Blank lines are ignored
//! but still counted for diagnostics.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;

pub fn parse<R: BufRead>(reader: R, files: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    let mut saw_header = false;
    for (index, line) in reader.lines().enumerate() {
        let lineno = index + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !saw_header {
            if line != "[Files]" {
                bail!("malformed mapping file: line {}", lineno);
            }
            saw_header = true;
            continue;
        }
        let (local, archive) = match parse_line(line) {
            Some(pair) => pair,
            None => bail!("malformed mapping file: line {}", lineno),
        };
        files
            .entry(archive.to_string())
            .or_insert_with(|| PathBuf::from(local));
    }
    Ok(())
}

/// Parses one `"LOCAL_PATH" "ARCHIVE_NAME"` line.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('"')?;
    let quote = rest.find('"')?;
    let (local, rest) = rest.split_at(quote);
    let rest = rest[1..].trim_start();
    let rest = rest.strip_prefix('"')?;
    let quote = rest.find('"')?;
    let (archive, rest) = rest.split_at(quote);
    if !rest[1..].is_empty() || local.is_empty() || archive.is_empty() {
        return None;
    }
    Some((local, archive))
}
