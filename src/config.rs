use serde::{Deserialize, Serialize};
use std::{
  env, fs,
  path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_RESYNC_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROFILE_TTL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_OVERLAY_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const CONFIG_FILE_NAME: &str = "sabo.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
  pub store_url: String,
  pub store_ws_url: String,
  pub api_token: String,
  pub resync_debounce_ms: u64,
  pub confirm_timeout_ms: u64,
  pub overlay_sweep_interval_ms: u64,
  pub profile_ttl_ms: u64,
  /// Run the advancement sweep whenever a round flips to complete.
  pub auto_sweep: bool,
  pub log_dir: String,
  pub log_filter: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      store_url: String::new(),
      store_ws_url: String::new(),
      api_token: String::new(),
      resync_debounce_ms: DEFAULT_RESYNC_DEBOUNCE_MS,
      confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
      overlay_sweep_interval_ms: DEFAULT_OVERLAY_SWEEP_INTERVAL_MS,
      profile_ttl_ms: DEFAULT_PROFILE_TTL_MS,
      auto_sweep: true,
      log_dir: "logs".to_string(),
      log_filter: "info".to_string(),
    }
  }
}

impl EngineConfig {
  /// The websocket feed lives next to the RPC endpoint unless configured separately.
  pub fn resolved_ws_url(&self) -> String {
    let explicit = self.store_ws_url.trim();
    if !explicit.is_empty() {
      return explicit.trim_end_matches('/').to_string();
    }
    let base = self.store_url.trim().trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
      format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
      format!("ws://{rest}")
    } else {
      base.to_string()
    }
  }
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn env_flag(key: &str) -> Option<bool> {
  let value = env_default(key)?.to_ascii_lowercase();
  Some(matches!(value.as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u64(key: &str) -> Option<u64> {
  let raw = env_default(key)?;
  match raw.parse::<u64>() {
    Ok(value) => Some(value),
    Err(e) => {
      tracing::warn!("ignoring {key}={raw}: {e}");
      None
    }
  }
}

/// Environment values win over whatever the config file said.
pub fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
  if let Some(value) = env_default("SABO_STORE_URL") {
    config.store_url = value;
  }
  if let Some(value) = env_default("SABO_STORE_WS_URL") {
    config.store_ws_url = value;
  }
  if let Some(value) = env_default("SABO_API_TOKEN") {
    config.api_token = value;
  }
  if let Some(value) = env_u64("SABO_RESYNC_DEBOUNCE_MS") {
    config.resync_debounce_ms = value;
  }
  if let Some(value) = env_u64("SABO_CONFIRM_TIMEOUT_MS") {
    config.confirm_timeout_ms = value;
  }
  if let Some(value) = env_u64("SABO_PROFILE_TTL_MS") {
    config.profile_ttl_ms = value;
  }
  if let Some(value) = env_flag("SABO_AUTO_SWEEP") {
    config.auto_sweep = value;
  }
  if let Some(value) = env_default("SABO_LOG_DIR") {
    config.log_dir = value;
  }
  if let Some(value) = env_default("RUST_LOG") {
    config.log_filter = value;
  }
  config
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig, String> {
  if !path.is_file() {
    return Ok(apply_env_overrides(EngineConfig::default()));
  }
  let data = fs::read_to_string(path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<EngineConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_overrides(config))
}

/// `sabo.json` in the working directory, or `SABO_CONFIG_PATH`.
pub fn load_config() -> Result<EngineConfig, String> {
  let path = env_default("SABO_CONFIG_PATH")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
  load_config_from(&path)
}

pub fn save_config(config: &EngineConfig, path: &Path) -> Result<(), String> {
  let payload = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
  fs::write(path, payload).map_err(|e| format!("write config {}: {e}", path.display()))
}

/// Load `KEY=value` lines from a `.env` file without overriding variables
/// that are already set.
pub fn load_env_file(path: &Path) {
  let contents = match fs::read_to_string(path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

/// Install the global subscriber: daily-rolling file in `log_dir`, filter from
/// the config (or `RUST_LOG`). Keep the guard alive for the life of the process.
pub fn init_logging(config: &EngineConfig) -> Result<WorkerGuard, String> {
  let logs_dir = PathBuf::from(&config.log_dir);
  fs::create_dir_all(&logs_dir).map_err(|e| format!("create log dir {}: {e}", logs_dir.display()))?;
  let file_appender = tracing_appender::rolling::daily(&logs_dir, "sabo-bracket.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
  let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(non_blocking)
    .with_ansi(false)
    .try_init()
    .map_err(|e| format!("install tracing subscriber: {e}"))?;
  tracing::info!(log_dir = %logs_dir.display(), "sabo bracket logging initialised");
  Ok(guard)
}
