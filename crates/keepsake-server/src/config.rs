//! Server configuration: an optional TOML file layered under `KEEPSAKE_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use keepsake_api::Limits;
use keepsake_core::{attachment::DEFAULT_ATTACHMENT_WAIT, scheduler::DEFAULT_POLL_INTERVAL};
use serde::Deserialize;

/// Runtime server configuration. Every field has a default, so an empty
/// or missing file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                 String,
  pub port:                 u16,
  /// SQLite database file; a leading `~/` is expanded.
  pub store_path:           PathBuf,
  /// Directory attachments are written into; a leading `~/` is expanded.
  pub attachments_dir:      PathBuf,
  pub poll_interval_secs:   u64,
  /// Bound on every store call. `0` disables it.
  pub remote_timeout_secs:  u64,
  pub attachment_wait_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                 "127.0.0.1".to_owned(),
      port:                 5240,
      store_path:           PathBuf::from("~/.local/share/keepsake/keepsake.db"),
      attachments_dir:      PathBuf::from("~/.local/share/keepsake/attachments"),
      poll_interval_secs:   DEFAULT_POLL_INTERVAL.as_secs(),
      remote_timeout_secs:  10,
      attachment_wait_secs: DEFAULT_ATTACHMENT_WAIT.as_secs(),
    }
  }
}

impl ServerConfig {
  /// Read `path` (if it exists), then apply `KEEPSAKE_*` overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("KEEPSAKE").try_parsing(true))
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }

  pub fn limits(&self) -> Limits {
    Limits {
      remote_timeout:  (self.remote_timeout_secs > 0)
        .then(|| Duration::from_secs(self.remote_timeout_secs)),
      attachment_wait: Duration::from_secs(self.attachment_wait_secs),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
