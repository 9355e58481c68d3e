use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TodoError};
use crate::store::write_atomic;
use crate::sync::client::{AnnotationSource, Scope};
use crate::sync::slack::DEFAULT_BASE_URL;

pub const CONFIG_VERSION: u32 = 1;

const APP_DIR: &str = "slack-todo";
const CONFIG_FILE: &str = "config.json";
/// Overrides both the data and the config directory.
pub const HOME_ENV: &str = "SLACK_TODO_HOME";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    #[default]
    Reaction,
    Bookmark,
}

fn default_emoji() -> String {
    "eyes".into()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn config_version() -> u32 {
    CONFIG_VERSION
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppConfig {
    #[serde(default = "config_version")]
    pub version: u32,
    #[serde(default)]
    pub annotation_kind: AnnotationKind,
    #[serde(default = "default_emoji")]
    pub emoji: String,
    /// Conversation ids to sync from. Empty means every reachable one.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default = "default_base_url")]
    pub api_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            annotation_kind: AnnotationKind::default(),
            emoji: default_emoji(),
            channels: Vec::new(),
            debug_logging: false,
            api_base_url: default_base_url(),
        }
    }
}

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Where `tasks.json`, `cache.json` and the lock file live.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(home) = home_override() {
        return Ok(home);
    }
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| TodoError::Config(format!("no data directory; set {}", HOME_ENV)))
}

pub fn config_dir() -> Result<PathBuf> {
    if let Some(home) = home_override() {
        return Ok(home);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| TodoError::Config(format!("no config directory; set {}", HOME_ENV)))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(TodoError::io(path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| TodoError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| TodoError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| TodoError::io(path, e))?;
        }
        log::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Ensure the data directory exists and return it.
    pub fn ensure_dirs(&self) -> Result<PathBuf> {
        let dir = data_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| TodoError::io(&dir, e))?;
        Ok(dir)
    }

    /// Emoji name without surrounding colons, so `:eyes:` and `eyes` agree.
    pub fn emoji_name(&self) -> &str {
        self.emoji.trim().trim_matches(':')
    }

    /// The annotation scope sync runs against.
    pub fn scope(&self) -> Result<Scope> {
        let source = match self.annotation_kind {
            AnnotationKind::Reaction => {
                let emoji = self.emoji_name();
                if emoji.is_empty() {
                    return Err(TodoError::Config("emoji must not be empty".into()));
                }
                AnnotationSource::Reaction(emoji.to_string())
            }
            AnnotationKind::Bookmark => {
                let channel = self.channels.first().ok_or_else(|| {
                    TodoError::Config("bookmark annotations need a --channel".into())
                })?;
                AnnotationSource::Bookmark(channel.clone())
            }
        };
        Ok(Scope::new(source, self.channels.clone()))
    }
}
