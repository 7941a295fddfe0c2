//! Plate lists: one plate id per line, `#` starts a comment.
//!
//!   # plates held back for engineering
//!   8481
//!   8482   # recut

use anyhow::{Context, Result, bail};
use cartplan_core::PlateId;
use regex::Regex;
use std::path::Path;

pub fn parse_plate_list(text: &str) -> Result<Vec<PlateId>> {
    let line_re = Regex::new(r"^\s*(?:(?P<id>\d+)\s*)?(?:#.*)?$")?;

    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let Some(caps) = line_re.captures(line) else {
            bail!("line {}: expected a plate id, got {:?}", n + 1, line.trim());
        };
        if let Some(id) = caps.name("id") {
            let id: PlateId = id
                .as_str()
                .parse()
                .with_context(|| format!("line {}: plate id out of range", n + 1))?;
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

pub fn read_plate_list(path: impl AsRef<Path>) -> Result<Vec<PlateId>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_plate_list(&text).with_context(|| format!("parsing {}", path.display()))
}
