use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub fn cartplan_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CARTPLAN_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".cartplan"))
}

pub fn ensure_cartplan_home() -> Result<PathBuf> {
    let dir = cartplan_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Default directory for plugging and forecast records.
pub fn output_dir() -> Result<PathBuf> {
    let dir = ensure_cartplan_home()?.join("out");
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}
