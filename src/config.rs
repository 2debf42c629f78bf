use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{NoopStorage, SnapshotStorage, SqliteStorage};
use crate::client::{ClientBuilder, ClientOptions, DEFAULT_MEDIA_TYPE};
use crate::schema::Schema;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL of the API
  pub url: String,
  #[serde(default = "default_media_type")]
  pub media_type: String,
  /// Headers sent with every request
  #[serde(default)]
  pub headers: HashMap<String, String>,
  /// Retention window in seconds
  #[serde(default)]
  pub cache_time: u64,
  /// Background revalidation threshold in seconds
  pub stale_time: Option<u64>,
  #[serde(default)]
  pub ssr_mode: bool,
  /// Inline schema declaration
  pub schema: Option<Value>,
  /// Schema declaration file (YAML or JSON), relative to the config file
  pub schema_file: Option<PathBuf>,
  #[serde(default)]
  pub snapshot: SnapshotConfig,
  #[serde(skip)]
  base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotConfig {
  /// Persist the cache between runs
  #[serde(default)]
  pub enabled: bool,
  /// Database path (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

fn default_media_type() -> String {
  DEFAULT_MEDIA_TYPE.to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./japi.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/japi/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/japi/config.yaml\n\
                 or ./japi.yaml with at least a `url`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("japi.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("japi").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config.base_dir = path.parent().map(Path::to_path_buf);

    Ok(config)
  }

  /// Parse and validate a YAML document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    Url::parse(&config.url).map_err(|e| eyre!("Invalid url '{}': {}", config.url, e))?;
    if config.schema.is_some() && config.schema_file.is_some() {
      return Err(eyre!("Set either `schema` or `schema_file`, not both"));
    }

    Ok(config)
  }

  /// Get the bearer token from environment variables.
  ///
  /// Checks JAPI_TOKEN first, then JSONAPI_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("JAPI_TOKEN")
      .or_else(|_| std::env::var("JSONAPI_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// The schema declared inline or in `schema_file`; empty when neither is set.
  pub fn load_schema(&self) -> Result<Schema> {
    if let Some(raw) = &self.schema {
      return Ok(Schema::parse(raw));
    }

    let Some(file) = &self.schema_file else {
      return Ok(Schema::default());
    };

    let path = match &self.base_dir {
      Some(dir) if file.is_relative() => dir.join(file),
      _ => file.clone(),
    };
    let contents = std::fs::read_to_string(&path)
      .map_err(|e| eyre!("Failed to read schema file {}: {}", path.display(), e))?;
    let raw: Value = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse schema file {}: {}", path.display(), e))?;

    Ok(Schema::parse(&raw))
  }

  /// Runtime client options, with an `Authorization` header when a token is given.
  pub fn client_options(&self, token: Option<&str>) -> ClientOptions {
    let mut options = ClientOptions::new(&self.url);
    options.media_type = self.media_type.clone();
    options.headers = self.headers.clone();
    options.cache_time = Duration::from_secs(self.cache_time);
    options.stale_time = self.stale_time.map(Duration::from_secs);
    options.ssr_mode = self.ssr_mode;

    if let Some(token) = token {
      options
        .headers
        .insert("Authorization".to_string(), format!("Bearer {}", token));
    }

    options
  }

  /// Client builder preconfigured from this file and the environment.
  pub fn client_builder(&self) -> Result<ClientBuilder> {
    let token = Self::get_api_token();
    let options = self.client_options(token.as_deref());
    Ok(ClientBuilder::new(options).schema(self.load_schema()?))
  }

  /// Snapshot storage selected by `snapshot.enabled`.
  pub fn snapshot_storage(&self) -> Result<Box<dyn SnapshotStorage>> {
    if !self.snapshot.enabled {
      return Ok(Box::new(NoopStorage));
    }
    Ok(Box::new(SqliteStorage::open(self.snapshot.path.as_deref())?))
  }
}
