//! Configuration for studysync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STUDYSYNC_HOME, DOWNLOAD_DIR, CANVAS_URL, CANVAS_TOKEN)
//! 2. Config file (.studysync/config.yaml)
//! 3. Defaults (~/.studysync, Google Drive "Canvas" folder when present)
//!
//! Config file discovery:
//! - Searches current directory and parents for .studysync/config.yaml
//! - Paths in config file are relative to the project root (parent of .studysync/)

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub canvas: Option<CanvasConfig>,
    #[serde(default)]
    pub bundle: Option<BundleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (run log, lock)
    pub home: Option<String>,
    /// Root of the synced course tree
    pub download_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanvasConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub session_file: Option<String>,
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleConfig {
    pub assignment_prep_days: Option<i64>,
    pub quiz_prep_days: Option<i64>,
    pub lookback_days: Option<i64>,
    pub module_dir: Option<String>,
    #[serde(default)]
    pub zoom_patterns: Vec<String>,
    #[serde(default)]
    pub participation_keywords: Vec<String>,
    pub utc_offset_minutes: Option<i32>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (run log, lock file)
    pub home: PathBuf,
    /// Root of the synced course tree
    pub download_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub canvas: CanvasSettings,
    pub bundle: BundleSettings,
}

#[derive(Debug, Clone)]
pub struct CanvasSettings {
    pub base_url: Option<String>,
    pub token: Option<String>,
    /// Saved browser session (cookies) used when no token is set
    pub session_file: PathBuf,
    pub retry_attempts: u32,
}

/// Knobs for the weekly bundler
#[derive(Debug, Clone, PartialEq)]
pub struct BundleSettings {
    /// Days between an assignment's prep item and its due date
    pub assignment_prep_days: i64,
    /// Days between a quiz's prep item and its due date
    pub quiz_prep_days: i64,
    /// Prep dates are never placed earlier than `today - lookback_days`
    pub lookback_days: i64,
    /// First path segment of module folders inside a course directory
    pub module_dir: String,
    /// Extra regexes for recording-portal links
    pub zoom_patterns: Vec<String>,
    /// Title keywords marking participation-only work
    pub participation_keywords: Vec<String>,
    /// Fixed UTC offset for due dates; local time when unset
    pub utc_offset_minutes: Option<i32>,
    /// Host of the Canvas instance (links elsewhere count as external)
    pub canvas_host: Option<String>,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            assignment_prep_days: 3,
            quiz_prep_days: 2,
            lookback_days: 14,
            module_dir: "modules".to_string(),
            zoom_patterns: Vec::new(),
            participation_keywords: default_participation_keywords(),
            utc_offset_minutes: None,
            canvas_host: None,
        }
    }
}

fn default_participation_keywords() -> Vec<String> {
    ["participation", "discussion", "attendance", "introduce yourself", "introductions"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Environment overrides, captured once so resolution stays testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<String>,
    pub download_dir: Option<String>,
    pub canvas_url: Option<String>,
    pub canvas_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            home: var("STUDYSYNC_HOME"),
            download_dir: var("DOWNLOAD_DIR"),
            canvas_url: var("CANVAS_URL"),
            canvas_token: var("CANVAS_TOKEN"),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".studysync").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let expanded = expand_tilde(path_str);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(&expanded)
            .canonicalize()
            .unwrap_or_else(|_| base.join(expanded))
    }
}

fn expand_tilde(path_str: &str) -> PathBuf {
    match (path_str.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path_str),
    }
}

/// Google Drive's "My Drive/Canvas" folder on macOS, if Drive is installed
fn google_drive_canvas_dir() -> Option<PathBuf> {
    let cloud_storage = dirs::home_dir()?.join("Library").join("CloudStorage");
    let entries = std::fs::read_dir(cloud_storage).ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().starts_with("GoogleDrive"))
        .map(|entry| entry.path().join("My Drive").join("Canvas"))
}

/// Host part of a base URL (`https://canvas.example.edu/` → `canvas.example.edu`)
pub fn host_of(url: &str) -> Option<String> {
    let url = url.trim();
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        // Bare hosts such as `canvas.example.edu`
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", url)).ok()?,
        Err(_) => return None,
    };
    parsed.host_str().map(str::to_lowercase)
}

/// Combine config file, environment and defaults
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: &EnvOverrides,
    default_home: PathBuf,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), Some(config)),
        None => (None, None),
    };

    // Base directory is the parent of .studysync/ (i.e., grandparent of config.yaml)
    let base_dir = config_file
        .as_deref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let paths = config.as_ref().map(|c| c.paths.clone()).unwrap_or_default();
    let canvas = config
        .as_ref()
        .and_then(|c| c.canvas.clone())
        .unwrap_or_default();
    let bundle = config
        .as_ref()
        .and_then(|c| c.bundle.clone())
        .unwrap_or_default();

    let home = if let Some(ref env_home) = env.home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(&base_dir, home_path)
    } else {
        default_home
    };

    let download_dir = if let Some(ref env_dir) = env.download_dir {
        expand_tilde(env_dir)
    } else if let Some(ref dir) = paths.download_dir {
        resolve_path(&base_dir, dir)
    } else {
        google_drive_canvas_dir().unwrap_or_else(|| home.join("canvas"))
    };

    let base_url = env
        .canvas_url
        .clone()
        .or(canvas.base_url)
        .map(|url| url.trim_end_matches('/').to_string());

    let session_file = canvas
        .session_file
        .as_deref()
        .map(|p| resolve_path(&base_dir, p))
        .unwrap_or_else(|| home.join("canvas_session.json"));

    let defaults = BundleSettings::default();
    let bundle = BundleSettings {
        assignment_prep_days: bundle
            .assignment_prep_days
            .unwrap_or(defaults.assignment_prep_days),
        quiz_prep_days: bundle.quiz_prep_days.unwrap_or(defaults.quiz_prep_days),
        lookback_days: bundle.lookback_days.unwrap_or(defaults.lookback_days),
        module_dir: bundle.module_dir.unwrap_or(defaults.module_dir),
        zoom_patterns: bundle.zoom_patterns,
        participation_keywords: if bundle.participation_keywords.is_empty() {
            defaults.participation_keywords
        } else {
            bundle.participation_keywords
        },
        utc_offset_minutes: bundle.utc_offset_minutes,
        canvas_host: base_url.as_deref().and_then(host_of),
    };

    ResolvedConfig {
        home,
        download_dir,
        config_file,
        canvas: CanvasSettings {
            base_url,
            token: env.canvas_token.clone().or(canvas.token),
            session_file,
            retry_attempts: canvas.retry_attempts.unwrap_or(3),
        },
        bundle,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".studysync");

    let env = EnvOverrides::from_env();

    match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Ok(resolve(Some((path, config)), &env, default_home))
        }
        None => Ok(resolve(None, &env, default_home)),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(".studysync");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  download_dir: ./canvas
canvas:
  base_url: https://canvas.example.edu/
  retry_attempts: 5
bundle:
  lookback_days: 7
  zoom_patterns:
    - "panopto\\.com/Panopto/Pages/Viewer"
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.download_dir, Some("./canvas".to_string()));
        assert_eq!(config.canvas.as_ref().unwrap().retry_attempts, Some(5));
        assert_eq!(config.bundle.as_ref().unwrap().lookback_days, Some(7));
    }

    #[test]
    fn test_resolve_uses_file_then_defaults() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  download_dir: /data/canvas
canvas:
  base_url: https://canvas.example.edu/
bundle:
  quiz_prep_days: 1
"#,
        );
        let config = load_config_file(&config_path).unwrap();

        let resolved = resolve(
            Some((config_path, config)),
            &EnvOverrides::default(),
            PathBuf::from("/home/me/.studysync"),
        );

        assert_eq!(resolved.home, PathBuf::from("/home/me/.studysync"));
        assert_eq!(resolved.download_dir, PathBuf::from("/data/canvas"));
        assert_eq!(
            resolved.canvas.base_url.as_deref(),
            Some("https://canvas.example.edu")
        );
        assert_eq!(resolved.canvas.retry_attempts, 3);
        assert_eq!(resolved.bundle.quiz_prep_days, 1);
        assert_eq!(resolved.bundle.assignment_prep_days, 3);
        assert_eq!(
            resolved.bundle.canvas_host.as_deref(),
            Some("canvas.example.edu")
        );
    }

    #[test]
    fn test_env_overrides_win() {
        let env = EnvOverrides {
            home: Some("/tmp/ss-home".to_string()),
            download_dir: Some("/tmp/ss-canvas".to_string()),
            canvas_url: Some("https://lms.example.org".to_string()),
            canvas_token: Some("secret".to_string()),
        };

        let resolved = resolve(None, &env, PathBuf::from("/unused"));
        assert_eq!(resolved.home, PathBuf::from("/tmp/ss-home"));
        assert_eq!(resolved.download_dir, PathBuf::from("/tmp/ss-canvas"));
        assert_eq!(resolved.canvas.token.as_deref(), Some("secret"));
        assert_eq!(
            resolved.canvas.session_file,
            PathBuf::from("/tmp/ss-home/canvas_session.json")
        );
        assert!(resolved.config_file.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://Canvas.Example.edu/courses/1"),
            Some("canvas.example.edu".to_string())
        );
        assert_eq!(host_of("https://"), None);
        assert_eq!(host_of("canvas.example.edu"), Some("canvas.example.edu".to_string()));
        assert_eq!(host_of("https://canvas.example.edu:8443/"), Some("canvas.example.edu".to_string()));
    }
}
