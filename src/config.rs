use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the served application. Requests outside its origin are never intercepted.
  pub scope: Url,
  /// Cache generation name. Bump on every deploy that changes cached assets.
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Paths cached eagerly on install, relative to `scope`
  #[serde(default = "default_seed_files")]
  pub seed_files: Vec<String>,
  /// Shell document served for navigations that miss the cache
  #[serde(default = "default_root_document")]
  pub root_document: String,
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_secs: u64,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub notification: NotificationConfig,
  /// Background sync tag reserved for data synchronization
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Cache database (defaults to $XDG_DATA_HOME/offline-proxy/cache.db)
  pub database: Option<PathBuf>,
  /// Write logs here instead of stderr
  pub log_file: Option<PathBuf>,
}

/// Response synthesized when neither network nor cache can answer.
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
  #[serde(default = "default_offline_reason")]
  pub reason: String,
  #[serde(default = "default_offline_body")]
  pub body: String,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      reason: default_offline_reason(),
      body: default_offline_body(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub title: String,
  /// Body used when a push carries no text
  #[serde(default = "default_notification_body")]
  pub placeholder: String,
  #[serde(default = "default_notification_icon")]
  pub icon: String,
  #[serde(default = "default_notification_badge")]
  pub badge: String,
  /// Vibration pattern in milliseconds
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
  /// Window opened when a notification is clicked
  #[serde(default = "default_open_url")]
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      placeholder: default_notification_body(),
      icon: default_notification_icon(),
      badge: default_notification_badge(),
      vibrate: default_vibrate(),
      open_url: default_open_url(),
    }
  }
}

/// Generation baked in at build time, e.g. `OFFLINE_PROXY_GENERATION=app-v7 cargo build`.
pub fn default_generation() -> String {
  option_env!("OFFLINE_PROXY_GENERATION")
    .map(String::from)
    .unwrap_or_else(|| format!("offline-proxy-v{}", env!("CARGO_PKG_VERSION")))
}

fn default_seed_files() -> Vec<String> {
  vec![
    "./".to_string(),
    "./index.html".to_string(),
    "./manifest.json".to_string(),
  ]
}

fn default_root_document() -> String {
  "./index.html".to_string()
}

fn default_fetch_timeout() -> u64 {
  30
}

fn default_offline_reason() -> String {
  "Service Unavailable".to_string()
}

fn default_offline_body() -> String {
  "Offline".to_string()
}

fn default_notification_title() -> String {
  "TASK.SYS".to_string()
}

fn default_notification_body() -> String {
  "New notification".to_string()
}

fn default_notification_icon() -> String {
  "./icons/icon-192.png".to_string()
}

fn default_notification_badge() -> String {
  "./icons/icon-72.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

fn default_open_url() -> String {
  "/".to_string()
}

fn default_sync_tag() -> String {
  "sync-data".to_string()
}

impl Config {
  /// Default configuration serving `scope`.
  pub fn for_scope(scope: Url) -> Self {
    Self {
      scope: normalize_scope(scope),
      generation: default_generation(),
      seed_files: default_seed_files(),
      root_document: default_root_document(),
      fetch_timeout_secs: default_fetch_timeout(),
      offline: OfflineConfig::default(),
      notification: NotificationConfig::default(),
      sync_tag: default_sync_tag(),
      database: None,
      log_file: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-proxy.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-proxy/config.yaml
  ///
  /// Without a file, `origin` alone is enough to build a default configuration.
  /// When both are present, `origin` replaces the file's scope.
  pub fn load(explicit_path: Option<&Path>, origin: Option<Url>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match (path, origin) {
      (Some(p), origin) => {
        let mut config = Self::load_from_path(&p)?;
        if let Some(scope) = origin {
          config.scope = normalize_scope(scope);
        }
        Ok(config)
      }
      (None, Some(scope)) => Ok(Self::for_scope(scope)),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-proxy/config.yaml\n\
                 or pass --origin <URL> to use the defaults."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-proxy.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-proxy").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    Ok(Config {
      scope: normalize_scope(config.scope),
      ..config
    })
  }

  /// Resolve a scope-relative path such as `./index.html` to an absolute URL.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .scope
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}' relative to {}: {}", path, self.scope, e))
  }

  pub fn seed_urls(&self) -> Result<Vec<Url>> {
    self.seed_files.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

/// Treat the scope as a directory so that `./x` resolves beneath it.
fn normalize_scope(mut scope: Url) -> Url {
  scope.set_fragment(None);
  scope.set_query(None);
  if !scope.path().ends_with('/') {
    let path = format!("{}/", scope.path());
    scope.set_path(&path);
  }
  scope
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("scope: https://app.example/tasks/\n").unwrap();

    assert_eq!(config.generation, default_generation());
    assert_eq!(config.seed_files, vec!["./", "./index.html", "./manifest.json"]);
    assert_eq!(config.root_document, "./index.html");
    assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    assert_eq!(config.offline.reason, "Service Unavailable");
    assert_eq!(config.notification.title, "TASK.SYS");
    assert_eq!(config.notification.vibrate, vec![100, 50, 100]);
    assert_eq!(config.sync_tag, "sync-data");
    assert!(config.database.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
scope: https://app.example/
generation: task-sys-v7
seed_files: ["./", "./app.js"]
fetch_timeout_secs: 5
offline:
  reason: Hors ligne
notification:
  title: Tasks
  vibrate: [200]
database: /tmp/cache.db
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.generation, "task-sys-v7");
    assert_eq!(config.seed_files, vec!["./", "./app.js"]);
    assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
    assert_eq!(config.offline.reason, "Hors ligne");
    assert_eq!(config.offline.body, "Offline");
    assert_eq!(config.notification.title, "Tasks");
    assert_eq!(config.notification.placeholder, "New notification");
    assert_eq!(config.notification.vibrate, vec![200]);
    assert_eq!(config.database, Some(PathBuf::from("/tmp/cache.db")));
  }

  #[test]
  fn test_scope_is_required() {
    assert!(Config::parse("generation: v1\n").is_err());
  }

  #[test]
  fn test_scope_is_normalized_to_directory() {
    let config = Config::for_scope(Url::parse("https://app.example/tasks?x=1").unwrap());
    assert_eq!(config.scope.as_str(), "https://app.example/tasks/");
    assert_eq!(
      config.resolve("./index.html").unwrap().as_str(),
      "https://app.example/tasks/index.html"
    );
  }

  #[test]
  fn test_seed_urls_resolve_against_scope() {
    let config = Config::for_scope(Url::parse("https://app.example/").unwrap());
    let urls: Vec<String> = config
      .seed_urls()
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();

    assert_eq!(
      urls,
      vec![
        "https://app.example/",
        "https://app.example/index.html",
        "https://app.example/manifest.json",
      ]
    );
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/offline-proxy.yaml")), None).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
