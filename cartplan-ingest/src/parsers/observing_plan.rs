//! Survey schedule blocks: `start_jd,end_jd,survey` per row.

use anyhow::{Context, Result, bail};
use cartplan_core::{BlockPlan, ObservingWindow, Survey};
use std::path::Path;

use super::read_rows;
use crate::types::BlockRow;

fn parse_survey(raw: &str) -> Result<Survey> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "manga" => Ok(Survey::Manga),
        "apogee" => Ok(Survey::Apogee),
        other => bail!("unknown survey {other:?}"),
    }
}

/// Turns rows into windows; overlapping blocks are rejected.
pub fn parse_blocks(rows: &[BlockRow]) -> Result<Vec<ObservingWindow>> {
    let mut windows = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let survey = parse_survey(&row.survey).with_context(|| format!("block {}", i + 1))?;
        let window = ObservingWindow::new(row.start_jd, row.end_jd).with_survey(survey);
        window.validate().with_context(|| format!("block {}", i + 1))?;
        windows.push(window);
    }

    windows.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
    if let Some(pair) = windows
        .windows(2)
        .find(|pair| pair[0].range.intersect(&pair[1].range).is_some())
    {
        bail!(
            "blocks starting at JD {} and {} overlap",
            pair[0].range.start,
            pair[1].range.start
        );
    }
    Ok(windows)
}

pub fn load_block_plan(path: impl AsRef<Path>, timezone: &str) -> Result<BlockPlan> {
    let path = path.as_ref();
    let rows: Vec<BlockRow> = read_rows(path)?;
    let windows = parse_blocks(&rows).with_context(|| format!("parsing {}", path.display()))?;
    Ok(BlockPlan::new(windows, timezone))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(start: f64, end: f64, survey: &str) -> BlockRow {
        BlockRow {
            start_jd: start,
            end_jd: end,
            survey: survey.to_string(),
        }
    }

    #[test]
    fn test_parse_blocks_sorted() {
        let windows =
            parse_blocks(&[row(2_458_001.6, 2_458_001.9, "APOGEE"), row(2_458_000.6, 2_458_000.9, "manga")])
                .unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].survey, Survey::Manga);
        assert_eq!(windows[1].survey, Survey::Apogee);
    }

    #[test]
    fn test_parse_blocks_rejects_bad_rows() {
        assert!(parse_blocks(&[row(2_458_000.6, 2_458_000.9, "eboss")]).is_err());
        assert!(parse_blocks(&[row(2_458_000.9, 2_458_000.6, "manga")]).is_err());
        assert!(
            parse_blocks(&[row(2_458_000.6, 2_458_000.9, "manga"), row(2_458_000.8, 2_458_001.0, "manga")])
                .is_err()
        );
    }
}
