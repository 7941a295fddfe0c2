use anyhow::{Context, Result};
use cartplan_core::SchedulerConfig;
use std::fs;
use std::path::{Path, PathBuf};

use crate::state::ensure_cartplan_home;

pub fn config_path(custom: Option<&Path>) -> Result<PathBuf> {
    match custom {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(ensure_cartplan_home()?.join("config.toml")),
    }
}

/// Reads and validates the configuration; a missing file means defaults.
pub fn load_config(custom: Option<&Path>) -> Result<SchedulerConfig> {
    let p = config_path(custom)?;
    let cfg = if p.exists() {
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?
    } else {
        if custom.is_some() {
            anyhow::bail!("config file not found: {}", p.display());
        }
        SchedulerConfig::default()
    };
    cfg.validate().with_context(|| format!("validate {}", p.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &SchedulerConfig, path: &Path) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn init_config(custom: Option<&Path>, force: bool) -> Result<()> {
    let p = config_path(custom)?;
    if p.exists() && !force {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&SchedulerConfig::default(), &p)?;
    println!("Wrote {}", p.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = SchedulerConfig::default();
        cfg.sn2_thresholds.plate_red = 40.0;
        cfg.offline_carts = vec![8];
        save_config(&cfg, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[SN2thresholds]"));
        assert!(text.contains("plateRed = 40.0"));
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[setArrangement]\nfactor = 0.8\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.set_arrangement.factor, 0.8);
        assert_eq!(cfg.set_arrangement.permutation_limit_plate, 600_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "offlineCarts = [42]\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("offline cart 42"));

        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
