pub mod observing_plan;
pub mod plate_list;
pub mod snapshot;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Reads a headed CSV into typed rows; `#` lines are comments.
pub(crate) fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row = result.with_context(|| format!("{} record {}", path.display(), i + 1))?;
        rows.push(row);
    }
    Ok(rows)
}
