//! Declarative per-handler configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Settings for one handler, loaded from a YAML file in the config
/// directory. Keys are kebab-case; everything but `handler` has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HandlerConfig {
    /// Unique handler identity; defaults to the config file stem.
    #[serde(default)]
    pub name: String,

    /// Executable to run, split on whitespace into program and arguments.
    pub handler: String,

    /// Engine kind, looked up in the engine registry.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Extra environment passed to the handler process. Wins over the
    /// variables the manager derives from the triggering message.
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Patterns tested against incoming message text.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,

    /// Only fire triggers on messages that directly address the bot.
    #[serde(default = "default_true")]
    pub direct_message_triggers_only: bool,

    /// Once created, the conversation ignores non-DM messages.
    #[serde(default)]
    pub direct_messages_only: bool,

    /// If non-empty, whitelist of channel names the handler may run in.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Create a per-thread conversation instead of a per-channel one.
    #[serde(default)]
    pub threaded: bool,

    /// Prefix each relayed line with `user: `.
    #[serde(default)]
    pub prefix_username: bool,
}

fn default_engine() -> String {
    "executable".to_string()
}

fn default_triggers() -> Vec<String> {
    vec![".".to_string()]
}

fn default_true() -> bool {
    true
}

impl HandlerConfig {
    /// Load a single config file, naming the handler after the file stem
    /// when the file does not set a name itself.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&raw).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
        }
        debug!(name = %config.name, handler = %config.handler, "loaded handler config");
        Ok(config)
    }
}

/// Scan a directory for `*.yaml` / `*.yml` handler configs.
///
/// Files are visited in sorted order; the first config to claim a name wins
/// and later duplicates are dropped with a warning, as are files that fail
/// to load. An unreadable directory is an error (fatal at boot; reloads
/// keep the previous table).
pub fn load_config_dir(dir: &Path) -> Result<Vec<HandlerConfig>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::ConfigDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml" | "yml")
            )
        })
        .collect();
    paths.sort();

    let mut configs: Vec<HandlerConfig> = Vec::new();
    for path in paths {
        let config = match HandlerConfig::load(&path) {
            Ok(config) => config,
            Err(error) => {
                warn!(%error, path = %path.display(), "skipping handler config");
                continue;
            }
        };
        if configs.iter().any(|existing| existing.name == config.name) {
            warn!(name = %config.name, path = %path.display(), "duplicate handler name, keeping the first");
            continue;
        }
        configs.push(config);
    }
    Ok(configs)
}
