//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! with no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Remote catalog API
  pub api_base_url: String,
  pub user_agent: String,

  // Listing
  pub page_size: usize,
  pub cache_ttl_secs: u64,
  pub popular_tags: Vec<String>,

  // Playback
  pub default_quality: u32,
  pub quality_labels: Vec<(u32, String)>,
  pub skip_secs: f64,
  pub volume_step: f64,
  pub controls_hide_secs: u64,
  pub restore_timeout_ms: u64,

  // mpv IPC
  pub mpv_binary: String,
  pub ipc_connect_attempts: u32,
  pub ipc_connect_delay_ms: u64,
  pub ipc_reply_timeout_ms: u64,
}

impl Constants {
  /// Human label for a quality tier, e.g. `720` → `720p HD`.
  pub fn quality_label(&self, tier: u32) -> String {
    self
      .quality_labels
      .iter()
      .find(|(q, _)| *q == tier)
      .map(|(_, label)| label.clone())
      .unwrap_or_else(|| format!("{}p", tier))
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Parsed on first access; a malformed file panics here.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
