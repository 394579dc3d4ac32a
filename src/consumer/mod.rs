//! Bundle consumers.
//!
//! Consumers read an emitted week (`week.json`) and produce their own
//! artifacts next to it. They never modify the bundle documents.

pub mod briefing;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::paths::{Layout, WEEK_FILE};
use crate::core::persist;
use crate::domain::{Week, WeekIndex, WeekKey};

pub use briefing::BriefingWriter;

/// A file a consumer produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerArtifact {
    pub name: String,
    pub path: PathBuf,
}

/// Downstream reader of a released week
#[async_trait]
pub trait BundleConsumer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce artifacts for `week`, stored under `week_dir`
    async fn consume(&self, week_dir: &Path, week: &Week) -> Result<Vec<ConsumerArtifact>>;
}

/// Which week a consumer should read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekSelector {
    /// Most recent week that has started
    Latest,
    Key(WeekKey),
}

impl FromStr for WeekSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        Ok(Self::Key(s.parse()?))
    }
}

/// Locate and load a released week from the bundle index
pub async fn load_week(layout: &Layout, selector: WeekSelector) -> Result<(PathBuf, Week)> {
    let index_path = layout.index_path();
    let index: WeekIndex = persist::load_json(&index_path)
        .await?
        .with_context(|| format!("No bundle index at {}; run a sync with --bundle first", index_path.display()))?;

    let entry = match selector {
        WeekSelector::Latest => index
            .latest_released()
            .context("No released weeks in the bundle index")?,
        WeekSelector::Key(key) => index
            .find(key)
            .with_context(|| format!("Week {} is not in the bundle index", key))?,
    };
    if !entry.released {
        anyhow::bail!("Week {} starts {} and has not been released yet", entry.key, entry.start_date);
    }

    let week_dir = layout.weekly_dir().join(&entry.folder);
    let week: Week = persist::load_json(&week_dir.join(WEEK_FILE))
        .await?
        .with_context(|| format!("Missing {} for week {}", WEEK_FILE, entry.key))?;

    Ok((week_dir, week))
}

/// Run one consumer against the selected week
pub async fn run_consumer(
    layout: &Layout,
    selector: WeekSelector,
    consumer: &dyn BundleConsumer,
) -> Result<Vec<ConsumerArtifact>> {
    let (week_dir, week) = load_week(layout, selector).await?;
    info!(consumer = consumer.name(), week = %week.week.key, "Running bundle consumer");

    consumer
        .consume(&week_dir, &week)
        .await
        .with_context(|| format!("Consumer '{}' failed", consumer.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_selector_parse() {
        assert_eq!("latest".parse::<WeekSelector>().unwrap(), WeekSelector::Latest);
        assert_eq!(
            "2026-W04".parse::<WeekSelector>().unwrap(),
            WeekSelector::Key(WeekKey { year: 2026, week: 4 })
        );
        assert!("next week".parse::<WeekSelector>().is_err());
    }
}
