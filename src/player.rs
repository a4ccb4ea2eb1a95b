use anyhow::Result;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::constants;

// --- Element seam ---

/// Commands understood by a media element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
  Load(String),
  Play,
  Pause,
  Seek(f64),
  /// Linear volume in `[0, 1]`.
  SetVolume(f64),
  SetMuted(bool),
  SetFullscreen(bool),
  CycleFullscreen,
  Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaErrorKind {
  Network,
  Decode,
  Unsupported,
  /// The element refused a play request.
  Rejected(String),
  Other(String),
}

impl fmt::Display for MediaErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MediaErrorKind::Network => write!(f, "Video tidak dapat dimuat (jaringan). Coba kualitas lain."),
      MediaErrorKind::Decode => write!(f, "Video gagal didekode. Coba kualitas lain."),
      MediaErrorKind::Unsupported => write!(f, "Format video tidak didukung. Coba kualitas lain."),
      MediaErrorKind::Rejected(reason) => write!(f, "Tekan spasi untuk memutar ({})", reason),
      MediaErrorKind::Other(reason) => write!(f, "Pemutaran gagal: {}", reason),
    }
  }
}

/// Notifications emitted by a media element, applied in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
  LoadStart,
  Playing,
  Paused,
  TimeUpdate(f64),
  DurationChanged(f64),
  /// Stalled waiting for data.
  Waiting,
  /// First frame ready; safe to seek.
  CanPlay,
  /// End of the buffered range, in seconds.
  Buffered(f64),
  VolumeChanged(f64),
  MuteChanged(bool),
  FullscreenChanged(bool),
  Error(MediaErrorKind),
  Ended,
}

/// A playback backend owned exclusively by one [`PlaybackController`].
pub trait MediaElement {
  /// Execute a command. An `Err` means the element refused or could not be reached.
  async fn send(&mut self, cmd: MediaCommand) -> Result<()>;

  /// Next pending event, if any. Never blocks.
  fn try_event(&mut self) -> Option<MediaEvent>;
}

/// Maps a quality tier to a playable URL for the current episode.
pub trait StreamResolver {
  fn resolve(&self, tier: u32) -> Option<String>;
}

// --- Fullscreen adapters ---

/// One way of asking the element for fullscreen. Adapters are tried in order.
pub trait FullscreenAdapter: fmt::Debug + Send + Sync {
  fn name(&self) -> &'static str;
  fn command(&self, enter: bool) -> Option<MediaCommand>;
}

/// Sets the `fullscreen` property directly.
#[derive(Debug)]
pub struct PropertyFullscreen;

impl FullscreenAdapter for PropertyFullscreen {
  fn name(&self) -> &'static str {
    "property"
  }

  fn command(&self, enter: bool) -> Option<MediaCommand> {
    Some(MediaCommand::SetFullscreen(enter))
  }
}

/// Flips fullscreen with a cycle command, for elements that reject the property write.
#[derive(Debug)]
pub struct CycleFullscreen;

impl FullscreenAdapter for CycleFullscreen {
  fn name(&self) -> &'static str {
    "cycle"
  }

  fn command(&self, _enter: bool) -> Option<MediaCommand> {
    Some(MediaCommand::CycleFullscreen)
  }
}

/// Build the adapter chain once, from the `fullscreen` preference.
pub fn fullscreen_chain(strategy: Option<&str>) -> Vec<Box<dyn FullscreenAdapter>> {
  match strategy.map(str::to_lowercase).as_deref() {
    Some("property") => vec![Box::new(PropertyFullscreen)],
    Some("cycle") => vec![Box::new(CycleFullscreen)],
    Some("none") => Vec::new(),
    _ => vec![Box::new(PropertyFullscreen), Box::new(CycleFullscreen)],
  }
}

// --- State ---

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
  pub position: f64,
  /// 0 while unknown.
  pub duration: f64,
  pub paused: bool,
  pub volume: f64,
  pub muted: bool,
  pub buffered: f64,
  pub fullscreen: bool,
  pub quality: u32,
  pub loading: bool,
  pub error: Option<MediaErrorKind>,
}

impl PlaybackState {
  fn new(quality: u32, volume: f64) -> Self {
    Self {
      position: 0.0,
      duration: 0.0,
      paused: true,
      volume: volume.clamp(0.0, 1.0),
      muted: volume <= 0.0,
      buffered: 0.0,
      fullscreen: false,
      quality,
      loading: false,
      error: None,
    }
  }

  /// Playback progress in `[0, 1]`.
  pub fn progress(&self) -> f64 {
    if self.duration > 0.0 { (self.position / self.duration).clamp(0.0, 1.0) } else { 0.0 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
  Idle,
  Loading,
  Ready,
  Playing,
  Paused,
  Error,
}

impl PlaybackPhase {
  pub fn label(self) -> &'static str {
    match self {
      PlaybackPhase::Idle => "idle",
      PlaybackPhase::Loading => "memuat",
      PlaybackPhase::Ready => "siap",
      PlaybackPhase::Playing => "diputar",
      PlaybackPhase::Paused => "dijeda",
      PlaybackPhase::Error => "error",
    }
  }
}

/// Position and play status captured before a quality switch.
#[derive(Debug, Clone, Copy)]
struct PendingRestore {
  generation: u64,
  position: f64,
  resume: bool,
  /// `LoadStart`s still due before the new source's own; a `CanPlay` before then is stale.
  loads_pending: u32,
  ready: bool,
  deadline: Instant,
}

/// Controls overlay that hides after an idle interval while playing.
#[derive(Debug, Clone, Copy)]
pub struct ControlsVisibility {
  visible: bool,
  last_interaction: Instant,
  hide_after: Duration,
}

impl ControlsVisibility {
  pub fn new(now: Instant, hide_after: Duration) -> Self {
    Self { visible: true, last_interaction: now, hide_after }
  }

  pub fn interact(&mut self, now: Instant) {
    self.visible = true;
    self.last_interaction = now;
  }

  pub fn tick(&mut self, now: Instant, playing: bool) {
    if !playing {
      self.visible = true;
    } else if now.saturating_duration_since(self.last_interaction) >= self.hide_after {
      self.visible = false;
    }
  }

  pub fn visible(&self) -> bool {
    self.visible
  }
}

/// User intents from keyboard bindings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerIntent {
  TogglePlay,
  ToggleMute,
  ToggleFullscreen,
  Skip(f64),
  VolumeStep(f64),
}

/// Drop time updates that a newer time update in the same batch supersedes.
pub fn coalesce_time_updates(events: Vec<MediaEvent>) -> Vec<MediaEvent> {
  let mut out: Vec<MediaEvent> = Vec::with_capacity(events.len());
  let mut iter = events.into_iter().peekable();
  while let Some(event) = iter.next() {
    if matches!(event, MediaEvent::TimeUpdate(_)) && matches!(iter.peek(), Some(MediaEvent::TimeUpdate(_))) {
      continue;
    }
    out.push(event);
  }
  out
}

/// `m:ss`, with `0:00` for unknown or negative values.
pub fn format_time(secs: f64) -> String {
  if !secs.is_finite() || secs < 0.0 {
    return "0:00".to_string();
  }
  let total = secs.floor() as u64;
  format!("{}:{:02}", total / 60, total % 60)
}

// --- Controller ---

/// Keeps [`PlaybackState`] in lockstep with one media element and turns user
/// intents into element commands. Element failures are folded into the Error
/// phase and never returned.
pub struct PlaybackController<E: MediaElement> {
  element: E,
  state: PlaybackState,
  source: Option<String>,
  has_played: bool,
  fullscreen: Vec<Box<dyn FullscreenAdapter>>,
  restore: Option<PendingRestore>,
  generation: u64,
  restore_timeout: Duration,
  controls: ControlsVisibility,
  closed: bool,
}

impl<E: MediaElement> PlaybackController<E> {
  pub fn new(element: E, quality: u32, volume: f64, fullscreen: Vec<Box<dyn FullscreenAdapter>>, now: Instant) -> Self {
    let c = constants();
    Self {
      element,
      state: PlaybackState::new(quality, volume),
      source: None,
      has_played: false,
      fullscreen,
      restore: None,
      generation: 0,
      restore_timeout: Duration::from_millis(c.restore_timeout_ms),
      controls: ControlsVisibility::new(now, Duration::from_secs(c.controls_hide_secs)),
      closed: false,
    }
  }

  pub fn state(&self) -> &PlaybackState {
    &self.state
  }

  pub fn controls_visible(&self) -> bool {
    self.controls.visible()
  }

  pub fn restore_pending(&self) -> bool {
    self.restore.is_some()
  }

  pub fn phase(&self) -> PlaybackPhase {
    if self.state.error.is_some() {
      PlaybackPhase::Error
    } else if self.source.is_none() {
      PlaybackPhase::Idle
    } else if self.state.loading {
      PlaybackPhase::Loading
    } else if self.state.paused && !self.has_played {
      PlaybackPhase::Ready
    } else if self.state.paused {
      PlaybackPhase::Paused
    } else {
      PlaybackPhase::Playing
    }
  }

  fn fail(&mut self, kind: MediaErrorKind) {
    self.state.error = Some(kind);
    self.state.loading = false;
    self.state.paused = true;
  }

  async fn attach(&mut self, url: String, keep_played: bool) {
    if self.closed {
      return;
    }
    info!(url = %url, quality = self.state.quality, "player: loading source");
    self.source = Some(url.clone());
    self.state.loading = true;
    self.state.error = None;
    self.state.position = 0.0;
    self.state.duration = 0.0;
    self.state.buffered = 0.0;
    if !keep_played {
      self.has_played = false;
    }
    if let Err(e) = self.element.send(MediaCommand::Load(url)).await {
      warn!(err = %e, "player: load failed");
      self.restore = None;
      self.fail(MediaErrorKind::Other(format!("{:#}", e)));
    }
  }

  /// Attach a new source at `quality`. Any pending quality restore is abandoned.
  pub async fn load(&mut self, url: String, quality: u32) {
    self.restore = None;
    self.state.quality = quality;
    self.attach(url, false).await;
  }

  /// Reload the current source after an error.
  pub async fn retry(&mut self) {
    if let Some(url) = self.source.clone() {
      info!("player: retry");
      self.restore = None;
      self.attach(url, false).await;
    }
  }

  pub async fn play(&mut self) {
    if self.closed {
      return;
    }
    self.state.error = None;
    if let Err(e) = self.element.send(MediaCommand::Play).await {
      warn!(err = %e, "player: play rejected");
      self.fail(MediaErrorKind::Rejected(format!("{:#}", e)));
    }
  }

  pub async fn pause(&mut self) {
    if self.closed {
      return;
    }
    if let Err(e) = self.element.send(MediaCommand::Pause).await {
      warn!(err = %e, "player: pause failed");
    }
  }

  pub async fn toggle(&mut self) {
    match self.phase() {
      PlaybackPhase::Playing => self.pause().await,
      PlaybackPhase::Idle => {}
      _ => self.play().await,
    }
  }

  async fn seek_to(&mut self, target: f64) {
    if let Err(e) = self.element.send(MediaCommand::Seek(target)).await {
      warn!(err = %e, target, "player: seek failed");
    }
    self.state.position = target;
  }

  /// Seek to `secs`, clamped to `[0, duration]`. Returns the applied position.
  pub async fn seek(&mut self, secs: f64) -> f64 {
    if self.closed {
      return self.state.position;
    }
    let target = secs.max(0.0).min(self.state.duration.max(0.0));
    self.seek_to(target).await;
    target
  }

  pub async fn skip(&mut self, delta: f64) -> f64 {
    self.seek(self.state.position + delta).await
  }

  pub async fn set_volume(&mut self, volume: f64) {
    if self.closed {
      return;
    }
    let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
    self.state.volume = volume;
    self.state.muted = volume == 0.0;
    if let Err(e) = self.element.send(MediaCommand::SetVolume(volume)).await {
      warn!(err = %e, "player: volume change failed");
    }
    if let Err(e) = self.element.send(MediaCommand::SetMuted(self.state.muted)).await {
      warn!(err = %e, "player: mute change failed");
    }
  }

  pub async fn toggle_mute(&mut self) {
    if self.closed {
      return;
    }
    self.state.muted = !self.state.muted;
    if let Err(e) = self.element.send(MediaCommand::SetMuted(self.state.muted)).await {
      warn!(err = %e, "player: mute toggle failed");
    }
  }

  /// Switch to `tier`, restoring position and play status once the new
  /// source is ready to seek. A newer switch replaces a pending restore.
  /// Returns `false` when the resolver has no stream for the tier.
  pub async fn set_quality(&mut self, tier: u32, resolver: &impl StreamResolver, now: Instant) -> bool {
    if self.closed {
      return false;
    }
    let Some(url) = resolver.resolve(tier) else {
      warn!(tier, "player: no stream for quality tier");
      return false;
    };

    let (position, resume, loads_pending) = match self.restore.take() {
      Some(prev) => {
        debug!(abandoned = prev.generation, "player: superseding in-flight quality switch");
        (prev.position, prev.resume, prev.loads_pending + 1)
      }
      // Buffering still counts as playing.
      None => (self.state.position, !self.state.paused && self.state.error.is_none(), 1),
    };

    self.generation += 1;
    self.state.quality = tier;
    info!(tier, position, resume, switch = self.generation, "player: quality switch");
    self.restore = Some(PendingRestore {
      generation: self.generation,
      position,
      resume,
      loads_pending,
      ready: false,
      deadline: now + self.restore_timeout,
    });
    self.attach(url, true).await;
    true
  }

  pub async fn toggle_fullscreen(&mut self) -> bool {
    if self.closed {
      return false;
    }
    let enter = !self.state.fullscreen;
    for adapter in &self.fullscreen {
      let Some(cmd) = adapter.command(enter) else { continue };
      match self.element.send(cmd).await {
        Ok(()) => {
          debug!(adapter = adapter.name(), enter, "player: fullscreen requested");
          return true;
        }
        Err(e) => debug!(adapter = adapter.name(), err = %e, "player: fullscreen adapter refused, trying next"),
      }
    }
    warn!("player: no fullscreen adapter available");
    false
  }

  pub async fn apply_intent(&mut self, intent: PlayerIntent) {
    match intent {
      PlayerIntent::TogglePlay => self.toggle().await,
      PlayerIntent::ToggleMute => self.toggle_mute().await,
      PlayerIntent::ToggleFullscreen => {
        self.toggle_fullscreen().await;
      }
      PlayerIntent::Skip(delta) => {
        self.skip(delta).await;
      }
      PlayerIntent::VolumeStep(delta) => self.set_volume(self.state.volume + delta).await,
    }
  }

  pub fn interact(&mut self, now: Instant) {
    self.controls.interact(now);
  }

  fn apply_event(&mut self, event: MediaEvent) {
    match event {
      MediaEvent::LoadStart => {
        self.state.loading = true;
        self.state.error = None;
        if let Some(restore) = self.restore.as_mut() {
          restore.loads_pending = restore.loads_pending.saturating_sub(1);
        }
      }
      MediaEvent::Playing => {
        self.state.paused = false;
        self.has_played = true;
        self.state.error = None;
      }
      MediaEvent::Paused => self.state.paused = true,
      MediaEvent::TimeUpdate(t) => {
        if t.is_finite() {
          self.state.position = t.max(0.0);
        }
      }
      MediaEvent::DurationChanged(d) => {
        self.state.duration = if d.is_finite() { d.max(0.0) } else { 0.0 };
      }
      MediaEvent::Waiting => self.state.loading = true,
      MediaEvent::CanPlay => {
        self.state.loading = false;
        self.state.error = None;
        if let Some(restore) = self.restore.as_mut()
          && restore.loads_pending == 0
        {
          restore.ready = true;
        }
      }
      MediaEvent::Buffered(b) => {
        if b.is_finite() {
          self.state.buffered = b.max(0.0);
        }
      }
      MediaEvent::VolumeChanged(v) => self.state.volume = v.clamp(0.0, 1.0),
      MediaEvent::MuteChanged(m) => self.state.muted = m,
      MediaEvent::FullscreenChanged(f) => self.state.fullscreen = f,
      MediaEvent::Error(kind) => {
        warn!(err = %kind, "player: media error");
        self.restore = None;
        self.fail(kind);
      }
      MediaEvent::Ended => self.state.paused = true,
    }
  }

  async fn drive_restore(&mut self, now: Instant) {
    let Some(restore) = self.restore else { return };
    if !restore.ready && now < restore.deadline {
      return;
    }
    self.restore = None;
    if !restore.ready {
      warn!(switch = restore.generation, "player: no ready signal before deadline, restoring anyway");
    }
    debug!(switch = restore.generation, position = restore.position, resume = restore.resume, "player: restoring");
    // Duration may not be reported yet for the new source.
    let target =
      if self.state.duration > 0.0 { restore.position.min(self.state.duration) } else { restore.position.max(0.0) };
    self.seek_to(target).await;
    if restore.resume {
      self.play().await;
    }
  }

  /// Drain element events, finish a pending quality restore, update controls.
  pub async fn pump(&mut self, now: Instant) {
    if self.closed {
      return;
    }
    let mut batch = Vec::new();
    while let Some(event) = self.element.try_event() {
      batch.push(event);
    }
    for event in coalesce_time_updates(batch) {
      self.apply_event(event);
    }
    self.drive_restore(now).await;
    let playing = self.phase() == PlaybackPhase::Playing;
    self.controls.tick(now, playing);
  }

  /// Release the element. Nothing mutates state afterwards.
  pub async fn shutdown(&mut self) {
    if self.closed {
      return;
    }
    info!("player: shutdown");
    self.restore = None;
    if let Err(e) = self.element.send(MediaCommand::Close).await {
      warn!(err = %e, "player: close failed");
    }
    self.closed = true;
    self.source = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::anyhow;
  use std::collections::{HashMap, VecDeque};

  #[derive(Default)]
  struct FakeElement {
    sent: Vec<MediaCommand>,
    events: VecDeque<MediaEvent>,
    reject_play: bool,
    reject_property_fullscreen: bool,
  }

  impl MediaElement for FakeElement {
    async fn send(&mut self, cmd: MediaCommand) -> Result<()> {
      if self.reject_play && cmd == MediaCommand::Play {
        return Err(anyhow!("autoplay blocked"));
      }
      if self.reject_property_fullscreen && matches!(cmd, MediaCommand::SetFullscreen(_)) {
        return Err(anyhow!("property unavailable"));
      }
      self.sent.push(cmd);
      Ok(())
    }

    fn try_event(&mut self) -> Option<MediaEvent> {
      self.events.pop_front()
    }
  }

  struct Tiers(HashMap<u32, String>);

  impl StreamResolver for Tiers {
    fn resolve(&self, tier: u32) -> Option<String> {
      self.0.get(&tier).cloned()
    }
  }

  fn tiers() -> Tiers {
    Tiers(HashMap::from([(720, "u720".to_string()), (1080, "u1080".to_string()), (540, "u540".to_string())]))
  }

  fn controller(now: Instant) -> PlaybackController<FakeElement> {
    PlaybackController::new(FakeElement::default(), 720, 1.0, fullscreen_chain(None), now)
  }

  fn push(c: &mut PlaybackController<FakeElement>, events: impl IntoIterator<Item = MediaEvent>) {
    c.element.events.extend(events);
  }

  /// Loaded, playing, 100s long, at `position`.
  async fn playing_at(position: f64, now: Instant) -> PlaybackController<FakeElement> {
    let mut c = controller(now);
    c.load("u720".into(), 720).await;
    push(
      &mut c,
      [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay, MediaEvent::Playing, MediaEvent::TimeUpdate(position)],
    );
    c.pump(now).await;
    c
  }

  // --- phases ---

  #[tokio::test]
  async fn phase_walks_idle_loading_ready_playing_paused() {
    let now = Instant::now();
    let mut c = controller(now);
    assert_eq!(c.phase(), PlaybackPhase::Idle);
    c.load("u720".into(), 720).await;
    assert_eq!(c.phase(), PlaybackPhase::Loading);
    push(&mut c, [MediaEvent::Paused, MediaEvent::CanPlay]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Ready);
    push(&mut c, [MediaEvent::Playing]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Playing);
    push(&mut c, [MediaEvent::Paused]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Paused);
    push(&mut c, [MediaEvent::Waiting]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Loading);
  }

  #[tokio::test]
  async fn media_error_then_retry_reloads() {
    let now = Instant::now();
    let mut c = playing_at(10.0, now).await;
    push(&mut c, [MediaEvent::Error(MediaErrorKind::Network)]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Error);
    assert!(c.state().paused);

    c.retry().await;
    assert_eq!(c.phase(), PlaybackPhase::Loading);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Load("u720".into())));
  }

  #[tokio::test]
  async fn rejected_play_sets_error_and_pauses() {
    let now = Instant::now();
    let mut c = controller(now);
    c.element.reject_play = true;
    c.load("u720".into(), 720).await;
    push(&mut c, [MediaEvent::CanPlay, MediaEvent::Playing]);
    c.pump(now).await;
    c.play().await;
    assert!(matches!(c.state().error, Some(MediaErrorKind::Rejected(_))));
    assert!(c.state().paused);
    assert_eq!(c.phase(), PlaybackPhase::Error);
  }

  #[tokio::test]
  async fn toggle_dispatches_on_phase() {
    let now = Instant::now();
    let mut c = playing_at(0.0, now).await;
    c.toggle().await;
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Pause));
    push(&mut c, [MediaEvent::Paused]);
    c.pump(now).await;
    c.toggle().await;
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Play));
  }

  // --- seek / skip ---

  #[tokio::test]
  async fn seek_clamps_with_unknown_duration() {
    let now = Instant::now();
    let mut c = controller(now);
    c.load("u720".into(), 720).await;
    assert_eq!(c.seek(-5.0).await, 0.0);
    assert_eq!(c.seek(30.0).await, 0.0);
  }

  #[tokio::test]
  async fn seek_clamps_to_duration() {
    let now = Instant::now();
    let mut c = playing_at(50.0, now).await;
    assert_eq!(c.seek(105.0).await, 100.0);
    assert_eq!(c.state().position, 100.0);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Seek(100.0)));
  }

  #[tokio::test]
  async fn skip_is_relative_and_clamped() {
    let now = Instant::now();
    let mut c = playing_at(5.0, now).await;
    assert_eq!(c.skip(-10.0).await, 0.0);
    assert_eq!(c.skip(10.0).await, 10.0);
  }

  // --- volume ---

  #[tokio::test]
  async fn zero_volume_mutes_and_nonzero_unmutes() {
    let now = Instant::now();
    let mut c = controller(now);
    c.set_volume(0.0).await;
    assert!(c.state().muted);
    c.set_volume(0.5).await;
    assert!(!c.state().muted);
    assert_eq!(c.state().volume, 0.5);
    assert!(c.element.sent.contains(&MediaCommand::SetMuted(false)));
  }

  #[tokio::test]
  async fn volume_steps_clamp() {
    let now = Instant::now();
    let mut c = controller(now);
    c.apply_intent(PlayerIntent::VolumeStep(0.1)).await;
    assert_eq!(c.state().volume, 1.0);
    c.set_volume(0.05).await;
    c.apply_intent(PlayerIntent::VolumeStep(-0.1)).await;
    assert_eq!(c.state().volume, 0.0);
    assert!(c.state().muted);
  }

  #[tokio::test]
  async fn toggle_mute_pushes_flag() {
    let now = Instant::now();
    let mut c = controller(now);
    c.toggle_mute().await;
    assert!(c.state().muted);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::SetMuted(true)));
  }

  // --- quality ---

  #[tokio::test]
  async fn quality_switch_restores_position_and_resumes() {
    let now = Instant::now();
    let mut c = playing_at(42.0, now).await;
    assert!(c.set_quality(1080, &tiers(), now).await);
    assert_eq!(c.state().quality, 1080);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Load("u1080".into())));
    assert!(c.restore_pending());

    // Nothing is reapplied before the element is ready.
    c.pump(now).await;
    assert!(c.restore_pending());

    push(&mut c, [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    assert!(!c.restore_pending());
    assert!((c.state().position - 42.0).abs() < 0.001);
    let tail = &c.element.sent[c.element.sent.len() - 2..];
    assert_eq!(tail, &[MediaCommand::Seek(42.0), MediaCommand::Play]);
  }

  #[tokio::test]
  async fn quality_switch_while_paused_does_not_resume() {
    let now = Instant::now();
    let mut c = playing_at(20.0, now).await;
    push(&mut c, [MediaEvent::Paused]);
    c.pump(now).await;
    c.set_quality(540, &tiers(), now).await;
    push(&mut c, [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Seek(20.0)));
    assert_eq!(c.phase(), PlaybackPhase::Paused);
  }

  #[tokio::test]
  async fn newer_quality_switch_wins() {
    let now = Instant::now();
    let mut c = playing_at(30.0, now).await;
    c.set_quality(1080, &tiers(), now).await;
    c.set_quality(540, &tiers(), now).await;
    assert_eq!(c.state().quality, 540);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Load("u540".into())));

    // One start per load; only the second belongs to the 540 source.
    push(&mut c, [MediaEvent::LoadStart, MediaEvent::CanPlay]);
    c.pump(now).await;
    assert!(c.restore_pending());
    push(&mut c, [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    let seeks: Vec<_> = c.element.sent.iter().filter(|cmd| matches!(cmd, MediaCommand::Seek(_))).collect();
    assert_eq!(seeks, vec![&MediaCommand::Seek(30.0)]);
  }

  #[tokio::test]
  async fn quality_switch_while_buffering_still_resumes() {
    let now = Instant::now();
    let mut c = playing_at(42.0, now).await;
    push(&mut c, [MediaEvent::Waiting]);
    c.pump(now).await;
    assert_eq!(c.phase(), PlaybackPhase::Loading);

    c.set_quality(1080, &tiers(), now).await;
    push(&mut c, [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    let tail = &c.element.sent[c.element.sent.len() - 2..];
    assert_eq!(tail, &[MediaCommand::Seek(42.0), MediaCommand::Play]);
  }

  #[tokio::test]
  async fn stale_ready_signal_does_not_trigger_restore() {
    let now = Instant::now();
    let mut c = playing_at(42.0, now).await;
    // Left over from a seek on the old source.
    push(&mut c, [MediaEvent::CanPlay]);
    c.set_quality(1080, &tiers(), now).await;
    c.pump(now).await;
    assert!(c.restore_pending());
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Load("u1080".into())));

    push(&mut c, [MediaEvent::LoadStart, MediaEvent::DurationChanged(100.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    assert!(!c.restore_pending());
    let tail = &c.element.sent[c.element.sent.len() - 2..];
    assert_eq!(tail, &[MediaCommand::Seek(42.0), MediaCommand::Play]);
  }

  #[tokio::test]
  async fn restore_falls_back_after_deadline() {
    let now = Instant::now();
    let mut c = playing_at(12.0, now).await;
    c.set_quality(1080, &tiers(), now).await;
    push(&mut c, [MediaEvent::DurationChanged(100.0)]);
    c.pump(now + Duration::from_millis(constants().restore_timeout_ms + 1)).await;
    assert!(!c.restore_pending());
    assert!(c.element.sent.contains(&MediaCommand::Seek(12.0)));
  }

  #[tokio::test]
  async fn unknown_tier_is_refused() {
    let now = Instant::now();
    let mut c = playing_at(12.0, now).await;
    assert!(!c.set_quality(144, &tiers(), now).await);
    assert_eq!(c.state().quality, 720);
  }

  #[tokio::test]
  async fn error_abandons_pending_restore() {
    let now = Instant::now();
    let mut c = playing_at(12.0, now).await;
    c.set_quality(1080, &tiers(), now).await;
    push(&mut c, [MediaEvent::Error(MediaErrorKind::Unsupported)]);
    c.pump(now).await;
    assert!(!c.restore_pending());
    assert_eq!(c.phase(), PlaybackPhase::Error);
  }

  // --- fullscreen ---

  #[tokio::test]
  async fn fullscreen_state_follows_events_only() {
    let now = Instant::now();
    let mut c = playing_at(0.0, now).await;
    assert!(c.toggle_fullscreen().await);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::SetFullscreen(true)));
    assert!(!c.state().fullscreen);
    push(&mut c, [MediaEvent::FullscreenChanged(true)]);
    c.pump(now).await;
    assert!(c.state().fullscreen);
  }

  #[tokio::test]
  async fn fullscreen_falls_back_to_cycle() {
    let now = Instant::now();
    let mut c = playing_at(0.0, now).await;
    c.element.reject_property_fullscreen = true;
    assert!(c.toggle_fullscreen().await);
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::CycleFullscreen));
  }

  #[tokio::test]
  async fn empty_fullscreen_chain_reports_unsupported() {
    let now = Instant::now();
    let mut c = PlaybackController::new(FakeElement::default(), 720, 1.0, fullscreen_chain(Some("none")), now);
    assert!(!c.toggle_fullscreen().await);
  }

  // --- controls / events / teardown ---

  #[tokio::test]
  async fn controls_hide_only_while_playing() {
    let now = Instant::now();
    let mut c = playing_at(0.0, now).await;
    let hide = Duration::from_secs(constants().controls_hide_secs);
    c.pump(now + hide).await;
    assert!(!c.controls_visible());
    c.interact(now + hide);
    assert!(c.controls_visible());

    push(&mut c, [MediaEvent::Paused]);
    c.pump(now + hide * 3).await;
    assert!(c.controls_visible());
  }

  #[test]
  fn consecutive_time_updates_collapse_to_latest() {
    let events = vec![
      MediaEvent::TimeUpdate(1.0),
      MediaEvent::TimeUpdate(2.0),
      MediaEvent::Paused,
      MediaEvent::TimeUpdate(3.0),
      MediaEvent::TimeUpdate(4.0),
    ];
    assert_eq!(
      coalesce_time_updates(events),
      vec![MediaEvent::TimeUpdate(2.0), MediaEvent::Paused, MediaEvent::TimeUpdate(4.0)]
    );
  }

  #[tokio::test]
  async fn shutdown_stops_state_mutation() {
    let now = Instant::now();
    let mut c = playing_at(10.0, now).await;
    c.set_quality(1080, &tiers(), now).await;
    c.shutdown().await;
    assert_eq!(c.element.sent.last(), Some(&MediaCommand::Close));
    assert!(!c.restore_pending());

    push(&mut c, [MediaEvent::TimeUpdate(99.0), MediaEvent::CanPlay]);
    c.pump(now).await;
    assert_eq!(c.state().position, 0.0);
    assert_eq!(c.phase(), PlaybackPhase::Idle);
  }

  #[test]
  fn format_time_minutes_and_seconds() {
    assert_eq!(format_time(0.0), "0:00");
    assert_eq!(format_time(65.9), "1:05");
    assert_eq!(format_time(f64::NAN), "0:00");
    assert_eq!(format_time(-3.0), "0:00");
  }
}
