//! Configuration - layered TOML files, presets and option resolution.
//!
//! Layers, later wins:
//!
//! ```text
//! built-in defaults
//!   < user config     (<config dir>/ctxpack/config.toml)
//!   < project config  (<root>/ctxpack.toml)
//!   < named preset
//!   < request / CLI params
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{PackError, Result};
use crate::render::OutputFormat;
use crate::scan::{ScanOptions, SortMode, DEFAULT_MAX_FILE_SIZE};

/// Project-level config file name.
pub const PROJECT_CONFIG_FILE: &str = "ctxpack.toml";

/// Default cache time-to-live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum number of cached projects.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10;

/// Default client-side request timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Options where every key may be absent. Used for config sections, presets
/// and request params alike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialOptions {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub extensions: Option<Vec<String>>,
    #[serde(alias = "max_file_size")]
    pub max_file_size: Option<u64>,
    pub sort: Option<SortMode>,
    pub format: Option<OutputFormat>,
    pub tree: Option<bool>,
    #[serde(alias = "line_numbers")]
    pub line_numbers: Option<bool>,
}

impl PartialOptions {
    /// Copy every key that is set in `other` over `self`.
    pub fn overlay(&mut self, other: &PartialOptions) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field.clone(); })*
            };
        }
        take!(include, exclude, extensions, max_file_size, sort, format, tree, line_numbers);
    }

    /// Fill the remaining gaps with defaults.
    pub fn finish(self) -> BundleOptions {
        BundleOptions {
            scan: ScanOptions {
                include: self.include.unwrap_or_default(),
                exclude: self.exclude.unwrap_or_default(),
                extensions: self.extensions.unwrap_or_default(),
                max_file_size: self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
                sort: self.sort.unwrap_or_default(),
            },
            format: self.format.unwrap_or_default(),
            tree: self.tree.unwrap_or(true),
            line_numbers: self.line_numbers.unwrap_or(false),
        }
    }
}

/// Fully resolved options for a bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleOptions {
    pub scan: ScanOptions,
    pub format: OutputFormat,
    /// Prepend a directory tree.
    pub tree: bool,
    pub line_numbers: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        PartialOptions::default().finish()
    }
}

/// `[daemon]` section; every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub socket_path: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
    pub client_timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
}

/// One config file on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub scan: PartialOptions,
    pub bundle: PartialOptions,
    pub presets: BTreeMap<String, PartialOptions>,
    pub daemon: DaemonSection,
}

impl ConfigFile {
    /// Parse a TOML string.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| PackError::Config {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load a file, `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "loaded config");
                Self::parse(&text, path).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The user-level config, or an empty one.
    pub fn load_user() -> Result<Self> {
        match user_config_path() {
            Some(path) => Ok(Self::load(&path)?.unwrap_or_default()),
            None => Ok(Self::default()),
        }
    }

    fn defaults(&self) -> PartialOptions {
        let mut merged = self.scan.clone();
        merged.overlay(&self.bundle);
        merged
    }
}

/// Built-in presets. Config files may define more, or shadow these.
pub fn builtin_preset(name: &str) -> Option<PartialOptions> {
    match name {
        "default" => Some(PartialOptions::default()),
        "compact" => Some(PartialOptions {
            format: Some(OutputFormat::Plain),
            tree: Some(false),
            ..PartialOptions::default()
        }),
        "docs" => Some(PartialOptions {
            extensions: Some(
                ["md", "markdown", "txt", "rst", "adoc"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ..PartialOptions::default()
        }),
        "review" => Some(PartialOptions {
            format: Some(OutputFormat::Markdown),
            line_numbers: Some(true),
            ..PartialOptions::default()
        }),
        _ => None,
    }
}

/// Names of the built-in presets.
pub const BUILTIN_PRESETS: &[&str] = &["default", "compact", "docs", "review"];

/// Merge caller-supplied partial options with config layers and presets.
///
/// `root` is expected to be canonical already; its `ctxpack.toml` is read if
/// present.
pub fn resolve_options(
    root: &Path,
    preset: Option<&str>,
    params: &PartialOptions,
    user: &ConfigFile,
) -> Result<BundleOptions> {
    let project = ConfigFile::load(&root.join(PROJECT_CONFIG_FILE))?.unwrap_or_default();

    let mut merged = user.defaults();
    merged.overlay(&project.defaults());

    if let Some(name) = preset {
        let found = project
            .presets
            .get(name)
            .or_else(|| user.presets.get(name))
            .cloned()
            .or_else(|| builtin_preset(name))
            .ok_or_else(|| PackError::UnknownPreset(name.to_string()))?;
        merged.overlay(&found);
    }

    merged.overlay(params);
    Ok(merged.finish())
}

/// Resolved daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub history_file: PathBuf,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub client_timeout: Duration,
    /// Attach debug renderings of internal errors to responses.
    pub verbose: bool,
    /// User-level config used when resolving request options.
    pub user: ConfigFile,
}

impl DaemonConfig {
    /// Settings from a user config, falling back to the default paths.
    pub fn from_config(user: ConfigFile) -> Self {
        let section = user.daemon.clone();
        Self {
            socket_path: section.socket_path.unwrap_or_else(default_socket_path),
            pid_file: section.pid_file.unwrap_or_else(default_pid_path),
            history_file: section.history_file.unwrap_or_else(default_history_path),
            cache_ttl: section
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_TTL),
            cache_max_entries: section.cache_max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            client_timeout: section
                .client_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CLIENT_TIMEOUT),
            verbose: section.verbose.unwrap_or(false),
            user,
        }
    }

    /// Everything under one directory. Used by tests and throwaway daemons.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            socket_path: dir.join("daemon.sock"),
            pid_file: dir.join("daemon.pid"),
            history_file: dir.join("history.jsonl"),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            verbose: false,
            user: ConfigFile::default(),
        }
    }
}

/// Per-user state directory for the socket, pid marker and history.
pub fn state_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("ctxpack"))
        .unwrap_or_else(|| std::env::temp_dir().join("ctxpack"))
}

pub fn default_socket_path() -> PathBuf {
    state_dir().join("daemon.sock")
}

pub fn default_pid_path() -> PathBuf {
    state_dir().join("daemon.pid")
}

pub fn default_history_path() -> PathBuf {
    state_dir().join("history.jsonl")
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ctxpack").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BundleOptions::default();
        assert_eq!(opts.scan.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(opts.scan.sort, SortMode::Path);
        assert_eq!(opts.format, OutputFormat::Markdown);
        assert!(opts.tree);
        assert!(!opts.line_numbers);
    }

    #[test]
    fn test_overlay_only_copies_set_keys() {
        let mut base = PartialOptions {
            format: Some(OutputFormat::Json),
            tree: Some(false),
            ..PartialOptions::default()
        };
        base.overlay(&PartialOptions {
            tree: Some(true),
            ..PartialOptions::default()
        });
        assert_eq!(base.format, Some(OutputFormat::Json));
        assert_eq!(base.tree, Some(true));
    }

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "[scan]\nmax_file_size = 2048\nsort = \"size\"\n\n[presets.mine]\nformat = \"yaml\"\n",
        )
        .unwrap();

        let user = ConfigFile::parse(
            "[scan]\nmax_file_size = 10\nextensions = [\"rs\"]\n[bundle]\nformat = \"json\"\n",
            Path::new("user.toml"),
        )
        .unwrap();

        let params = PartialOptions {
            sort: Some(SortMode::Extension),
            ..PartialOptions::default()
        };

        let opts = resolve_options(dir.path(), Some("mine"), &params, &user).unwrap();
        assert_eq!(opts.scan.max_file_size, 2048);
        assert_eq!(opts.scan.extensions, vec!["rs".to_string()]);
        assert_eq!(opts.scan.sort, SortMode::Extension);
        assert_eq!(opts.format, OutputFormat::Yaml);
    }

    #[test]
    fn test_builtin_and_unknown_presets() {
        let dir = tempfile::tempdir().unwrap();
        let user = ConfigFile::default();

        let compact = resolve_options(dir.path(), Some("compact"), &PartialOptions::default(), &user)
            .unwrap();
        assert_eq!(compact.format, OutputFormat::Plain);
        assert!(!compact.tree);

        let err = resolve_options(dir.path(), Some("nope"), &PartialOptions::default(), &user)
            .unwrap_err();
        assert!(matches!(err, PackError::UnknownPreset(_)));
    }

    #[test]
    fn test_wire_params_use_camel_case() {
        let params: PartialOptions =
            serde_json::from_value(serde_json::json!({"maxFileSize": 5, "lineNumbers": true}))
                .unwrap();
        assert_eq!(params.max_file_size, Some(5));
        assert_eq!(params.line_numbers, Some(true));
    }

    #[test]
    fn test_daemon_section() {
        let file = ConfigFile::parse(
            "[daemon]\ncache_ttl_secs = 30\ncache_max_entries = 3\nverbose = true\n",
            Path::new("c.toml"),
        )
        .unwrap();
        let cfg = DaemonConfig::from_config(file);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(30));
        assert_eq!(cfg.cache_max_entries, 3);
        assert!(cfg.verbose);
        assert_eq!(cfg.client_timeout, DEFAULT_CLIENT_TIMEOUT);
    }

    #[test]
    fn test_malformed_config_is_reported() {
        let err = ConfigFile::parse("[scan\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, PackError::Config { .. }));
    }
}
