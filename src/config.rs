use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// User preferences persisted to `prefs.toml` in the platform config dir.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  pub api_base_url: Option<String>,
  pub preferred_quality: Option<u32>,
  pub volume: Option<f64>,
  pub sort: Option<String>,
  pub fullscreen: Option<String>,
}

impl Config {
  pub fn load() -> Self {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "drama") {
      let config_file = proj_dirs.config_dir().join("prefs.toml");
      if let Ok(content) = std::fs::read_to_string(config_file) {
        return Self::parse(&content);
      }
    }
    Self::default()
  }

  /// Parse a prefs file, falling back to defaults on malformed input.
  pub fn parse(content: &str) -> Self {
    match toml::from_str(content) {
      Ok(config) => config,
      Err(e) => {
        tracing::warn!(err = %e, "config: ignoring malformed prefs.toml");
        Self::default()
      }
    }
  }

  pub fn save(&self) {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "drama") {
      let config_dir = proj_dirs.config_dir();
      if std::fs::create_dir_all(config_dir).is_ok() {
        let config_file = config_dir.join("prefs.toml");
        if let Ok(content) = toml::to_string(self) {
          let _ = std::fs::write(config_file, content);
        }
      }
    }
  }
}
