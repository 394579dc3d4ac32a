//! Command-line interface for studysync.
//!
//! Provides commands for syncing courses, regenerating weekly bundles,
//! inspecting sync state and bundles, and running bundle consumers.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::adapters::{CanvasFetcher, LocalMaterializer};
use crate::config::{self, paths::Layout};
use crate::consumer::{self, BriefingWriter, WeekSelector};
use crate::core::{
    bundle_only, persist, EmitSummary, Registry, SyncEngine, SyncLock, SyncLog, SyncOptions,
    SyncReport, WeeklyBundler,
};
use crate::domain::{SyncEventType, WeekIndex};

/// studysync - Incremental Canvas sync with weekly study bundles
#[derive(Parser, Debug)]
#[command(name = "studysync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync courses from Canvas
    Sync {
        /// Re-download everything, ignoring the registry
        #[arg(long)]
        force: bool,

        /// Only sync courses whose name, code or id contains this text
        #[arg(short, long)]
        course: Option<String>,

        /// Regenerate weekly bundles after syncing
        #[arg(long)]
        bundle: bool,

        /// Only regenerate weekly bundles from existing manifests
        #[arg(long, conflicts_with_all = ["force", "bundle"])]
        bundle_only: bool,

        /// Compute bundles as of this date (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Show per-course sync state and the last run
    Status,

    /// List bundled weeks
    Weeks,

    /// Write a plain-text briefing for a released week
    Briefing {
        /// Week key (e.g. 2026-W04) or "latest"
        #[arg(short, long, default_value = "latest")]
        week: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sync {
                force,
                course,
                bundle,
                bundle_only,
                today,
            } => {
                if bundle_only {
                    run_bundle_only(course, today).await
                } else {
                    run_sync(force, course, bundle, today).await
                }
            }
            Commands::Status => show_status().await,
            Commands::Weeks => list_weeks().await,
            Commands::Briefing { week } => write_briefing(&week).await,
            Commands::Config => show_config(),
        }
    }
}

/// Sync every matching course, optionally bundling afterwards
async fn run_sync(force: bool, course: Option<String>, bundle: bool, today: Option<NaiveDate>) -> Result<()> {
    let cfg = config::config()?;
    let layout = Layout::from_config(cfg);
    let _lock = SyncLock::acquire(&layout.lock_path())?;

    let fetcher = CanvasFetcher::from_settings(&cfg.canvas)?;
    let materializer = LocalMaterializer::new(layout.root())
        .with_module_dir(cfg.bundle.module_dir.clone())
        .with_file_source(Arc::new(fetcher.clone()));
    let bundler = WeeklyBundler::new(cfg.bundle.clone())?;

    let engine = SyncEngine::new(layout, Box::new(fetcher), Box::new(materializer))
        .with_canvas_host(cfg.bundle.canvas_host.clone())
        .with_bundler(bundler);

    let options = SyncOptions {
        force,
        course_filter: course,
        bundle,
        today,
    };
    let report = engine.run(&options).await?;
    print_report(&report);

    Ok(())
}

/// Rebuild bundles from the manifests already on disk
async fn run_bundle_only(course: Option<String>, today: Option<NaiveDate>) -> Result<()> {
    let cfg = config::config()?;
    let layout = Layout::from_config(cfg);
    let _lock = SyncLock::acquire(&layout.lock_path())?;

    let bundler = WeeklyBundler::new(cfg.bundle.clone())?;
    let today = today.unwrap_or_else(|| bundler.today());
    let log = SyncLog::new(layout.sync_log_path());

    let summary = bundle_only(&layout, &bundler, today, course.as_deref(), &log).await?;
    print_bundle_summary(&summary);

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("{:<40} {:>5} {:>8} {:>10} {:>10} {:>7}", "COURSE", "NEW", "UPDATED", "UNCHANGED", "MALFORMED", "FAILED");
    println!("{}", "-".repeat(85));
    for course in &report.courses {
        let c = &course.counts;
        println!(
            "{:<40} {:>5} {:>8} {:>10} {:>10} {:>7}",
            truncate(&course.course.name, 40),
            c.new,
            c.updated,
            c.unchanged,
            c.malformed,
            c.failed
        );
    }

    let totals = report.totals();
    println!("{}", "-".repeat(85));
    println!(
        "{:<40} {:>5} {:>8} {:>10} {:>10} {:>7}",
        "TOTAL", totals.new, totals.updated, totals.unchanged, totals.malformed, totals.failed
    );

    if !report.skipped.is_empty() {
        eprintln!("\nSkipped courses:");
        for (course, reason) in &report.skipped {
            eprintln!("  {}: {}", course.name, reason);
        }
    }

    if let Some(summary) = &report.bundle {
        println!();
        print_bundle_summary(summary);
    }

    eprintln!("\n[Run {}]", report.run_id);
}

fn print_bundle_summary(summary: &EmitSummary) {
    println!(
        "Bundles: {} week(s) written, {} task document(s), {} future week(s) indexed, {} unscheduled item(s)",
        summary.weeks_written, summary.tasks_written, summary.future_weeks, summary.unscheduled
    );
    if summary.weeks_removed > 0 {
        println!("Removed {} week folder(s) that are no longer released", summary.weeks_removed);
    }
}

/// Per-course registry stats and the last run
async fn show_status() -> Result<()> {
    let cfg = config::config()?;
    let layout = Layout::from_config(cfg);

    let mut registries = Vec::new();
    for path in glob::glob(&layout.registry_glob())
        .context("Invalid registry glob")?
        .flatten()
    {
        match persist::load_json::<Registry>(&path).await {
            Ok(Some(registry)) => registries.push(registry),
            Ok(None) => {}
            Err(e) => eprintln!("Unreadable registry {}: {:#}", path.display(), e),
        }
    }
    registries.sort_by(|a, b| a.course.cmp(&b.course));

    if registries.is_empty() {
        println!("No synced courses under {}", layout.root().display());
    } else {
        println!("{:<40} {:>7}  {:<25} {}", "COURSE", "ITEMS", "LAST CHANGED", "BY KIND");
        println!("{}", "-".repeat(100));
        for registry in &registries {
            let by_kind = registry
                .count_by_kind()
                .iter()
                .map(|(kind, count)| format!("{}={}", kind, count))
                .collect::<Vec<_>>()
                .join(" ");
            let last = registry
                .last_changed
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<40} {:>7}  {:<25} {}",
                truncate(&registry.course.name, 40),
                registry.len(),
                last,
                by_kind
            );
        }
    }

    let events = SyncLog::new(layout.sync_log_path()).last_run().await?;
    let Some(first) = events.first() else {
        println!("\nNo runs recorded yet");
        return Ok(());
    };

    println!("\nLast run {} (started {})", first.run_id, first.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    for event in &events {
        match event.event_type {
            SyncEventType::CourseSkipped => println!(
                "  skipped: {} ({})",
                event.summary,
                event.error.as_deref().unwrap_or("unknown error")
            ),
            SyncEventType::RunStarted => {}
            _ => println!("  {}", event.summary),
        }
    }

    Ok(())
}

/// Print `_index.json`
async fn list_weeks() -> Result<()> {
    let cfg = config::config()?;
    let layout = Layout::from_config(cfg);

    let Some(index) = persist::load_json::<WeekIndex>(&layout.index_path()).await? else {
        println!("No bundles yet. Run `studysync sync --bundle` first.");
        return Ok(());
    };

    println!("Bundled as of {}", index.today);
    println!("{:<10} {:<12} {:<12} {:>6} {:>10}  {}", "WEEK", "START", "END", "TASKS", "RESOURCES", "STATE");
    println!("{}", "-".repeat(70));
    for week in &index.weeks {
        println!(
            "{:<10} {:<12} {:<12} {:>6} {:>10}  {}",
            week.key.to_string(),
            week.start_date.to_string(),
            week.end_date.to_string(),
            week.tasks,
            week.resources,
            if week.released { "released" } else { "upcoming" }
        );
    }

    Ok(())
}

/// Run the briefing consumer for a week
async fn write_briefing(week: &str) -> Result<()> {
    let cfg = config::config()?;
    let layout = Layout::from_config(cfg);
    let selector: WeekSelector = week.parse()?;

    let artifacts = consumer::run_consumer(&layout, selector, &BriefingWriter::new()).await?;
    for artifact in artifacts {
        println!("{}", artifact.path.display());
    }

    Ok(())
}

/// Show resolved configuration (debug)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("studysync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Download root:       {}", cfg.download_dir.display());
    println!("  Run log:             {}", Layout::from_config(cfg).sync_log_path().display());
    println!();
    println!("Canvas:");
    println!("  Base URL:     {}", cfg.canvas.base_url.as_deref().unwrap_or("(not set)"));
    println!("  Token:        {}", if cfg.canvas.token.is_some() { "(set)" } else { "(not set)" });
    println!("  Session file: {}", cfg.canvas.session_file.display());
    println!("  Retries:      {}", cfg.canvas.retry_attempts);
    println!();
    let bundle = &cfg.bundle;
    println!("Bundles:");
    println!("  Assignment prep: {} day(s) before due", bundle.assignment_prep_days);
    println!("  Quiz prep:       {} day(s) before due", bundle.quiz_prep_days);
    println!("  Lookback:        {} day(s)", bundle.lookback_days);
    println!("  Module folder:   {}", bundle.module_dir);
    println!(
        "  UTC offset:      {}",
        bundle
            .utc_offset_minutes
            .map(|m| format!("{} min", m))
            .unwrap_or_else(|| "local time".to_string())
    );
    println!("  Participation:   {}", bundle.participation_keywords.join(", "));
    if !bundle.zoom_patterns.is_empty() {
        println!("  Extra zoom patterns:");
        for pattern in &bundle.zoom_patterns {
            println!("    {}", pattern);
        }
    }

    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from([
            "studysync", "sync", "--force", "--course", "fdnt", "--bundle", "--today", "2026-01-21",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                force,
                course,
                bundle,
                bundle_only,
                today,
            } => {
                assert!(force);
                assert!(bundle);
                assert!(!bundle_only);
                assert_eq!(course.as_deref(), Some("fdnt"));
                assert_eq!(today, NaiveDate::from_ymd_opt(2026, 1, 21));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bundle_only_conflicts_with_force() {
        assert!(Cli::try_parse_from(["studysync", "sync", "--bundle-only", "--force"]).is_err());
        assert!(Cli::try_parse_from(["studysync", "sync", "--bundle-only"]).is_ok());
    }

    #[test]
    fn test_bundle_only_accepts_course() {
        let cli = Cli::try_parse_from(["studysync", "sync", "--bundle-only", "-c", "chem"]).unwrap();
        match cli.command {
            Commands::Sync {
                bundle_only, course, ..
            } => {
                assert!(bundle_only);
                assert_eq!(course.as_deref(), Some("chem"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long course name", 10), "a very ...");
    }
}
