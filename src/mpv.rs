//! mpv as a [`MediaElement`], driven over its JSON IPC socket.
//!
//! One reader task parses every line mpv writes. Command replies are routed
//! back to the awaiting `send` by `request_id`; property changes and playback
//! events are translated into [`MediaEvent`]s on an unbounded channel.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::{
  io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader},
  net::{UnixStream, unix::OwnedWriteHalf},
  process::{Child as TokioChild, Command},
  sync::{mpsc, oneshot},
  task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::player::{MediaCommand, MediaElement, MediaErrorKind, MediaEvent};

type PendingReplies = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

/// Properties observed right after connecting, in observe-id order.
const OBSERVED: [&str; 9] = [
  "time-pos",
  "duration",
  "pause",
  "paused-for-cache",
  "demuxer-cache-time",
  "volume",
  "mute",
  "fullscreen",
  "eof-reached",
];

/// A parsed IPC line.
#[derive(Debug, PartialEq)]
enum IpcMessage {
  Reply { request_id: u64, result: Result<(), String> },
  Event(MediaEvent),
}

fn classify_file_error(reason: &str) -> MediaErrorKind {
  let lower = reason.to_lowercase();
  if lower.contains("format") || lower.contains("unsupported") {
    MediaErrorKind::Unsupported
  } else if lower.contains("decod") || lower.contains("no audio or video") {
    MediaErrorKind::Decode
  } else if lower.contains("loading failed") || lower.contains("network") || lower.contains("http") {
    MediaErrorKind::Network
  } else {
    MediaErrorKind::Other(reason.to_string())
  }
}

fn property_event(name: &str, data: &Value) -> Option<MediaEvent> {
  match name {
    "time-pos" => data.as_f64().map(MediaEvent::TimeUpdate),
    "duration" => data.as_f64().map(MediaEvent::DurationChanged),
    "pause" => data.as_bool().map(|p| if p { MediaEvent::Paused } else { MediaEvent::Playing }),
    "paused-for-cache" => data.as_bool().map(|w| if w { MediaEvent::Waiting } else { MediaEvent::CanPlay }),
    "demuxer-cache-time" => data.as_f64().map(MediaEvent::Buffered),
    "volume" => data.as_f64().map(|v| MediaEvent::VolumeChanged(v / 100.0)),
    "mute" => data.as_bool().map(MediaEvent::MuteChanged),
    "fullscreen" => data.as_bool().map(MediaEvent::FullscreenChanged),
    // With --keep-open, EOF is only visible through this property.
    "eof-reached" => data.as_bool().filter(|eof| *eof).map(|_| MediaEvent::Ended),
    _ => None,
  }
}

fn parse_ipc_line(line: &str) -> Option<IpcMessage> {
  let val: Value = serde_json::from_str(line).ok()?;

  if let Some(request_id) = val.get("request_id").and_then(Value::as_u64)
    && val.get("event").is_none()
  {
    let result = match val.get("error").and_then(Value::as_str) {
      Some("success") => Ok(()),
      Some(err) => Err(err.to_string()),
      None => Err("missing error field".to_string()),
    };
    return Some(IpcMessage::Reply { request_id, result });
  }

  let event = match val.get("event").and_then(Value::as_str)? {
    "start-file" => MediaEvent::LoadStart,
    "playback-restart" => MediaEvent::CanPlay,
    "end-file" => match val.get("reason").and_then(Value::as_str) {
      Some("eof") => MediaEvent::Ended,
      Some("error") => {
        let reason = val.get("file_error").and_then(Value::as_str).unwrap_or("unknown error");
        MediaEvent::Error(classify_file_error(reason))
      }
      _ => return None,
    },
    "property-change" => {
      let name = val.get("name").and_then(Value::as_str)?;
      property_event(name, val.get("data")?)?
    }
    _ => return None,
  };
  Some(IpcMessage::Event(event))
}

/// JSON command for `cmd`. `Close` is handled locally and has none.
fn command_json(cmd: &MediaCommand, request_id: u64) -> Option<Value> {
  let command = match cmd {
    MediaCommand::Load(url) => json!(["loadfile", url, "replace"]),
    MediaCommand::Play => json!(["set_property", "pause", false]),
    MediaCommand::Pause => json!(["set_property", "pause", true]),
    MediaCommand::Seek(secs) => json!(["seek", secs, "absolute"]),
    MediaCommand::SetVolume(v) => json!(["set_property", "volume", (v * 100.0).round()]),
    MediaCommand::SetMuted(m) => json!(["set_property", "mute", m]),
    MediaCommand::SetFullscreen(f) => json!(["set_property", "fullscreen", f]),
    MediaCommand::CycleFullscreen => json!(["cycle", "fullscreen"]),
    MediaCommand::Close => return None,
  };
  Some(json!({ "command": command, "request_id": request_id }))
}

pub struct MpvElement {
  child: Option<TokioChild>,
  writer: Option<OwnedWriteHalf>,
  reader_handle: Option<JoinHandle<()>>,
  events_rx: mpsc::UnboundedReceiver<MediaEvent>,
  pending: PendingReplies,
  next_request_id: u64,
  socket_path: String,
  reply_timeout: Duration,
}

impl MpvElement {
  /// Launch an idle mpv window and connect to its IPC socket.
  pub async fn spawn(mpv_path: &str, volume: f64) -> Result<Self> {
    let c = constants();
    let socket_path = std::env::temp_dir().join(format!("drama-mpv-{}.sock", std::process::id()));
    let socket_path_str = socket_path.to_str().context("Temp dir path is not valid UTF-8")?.to_string();
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);

    let mut cmd = Command::new(mpv_path);
    cmd.args([
      "--idle=yes",
      "--force-window=yes",
      "--keep-open=yes",
      "--no-terminal",
      "--title=drama",
      &format!("--volume={}", (volume.clamp(0.0, 1.0) * 100.0).round()),
      &format!("--input-ipc-server={}", socket_path_str),
    ]);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")
      } else {
        anyhow!(e).context("Failed to spawn mpv process")
      }
    })?;

    let mut stream = None;
    for attempt in 0..c.ipc_connect_attempts {
      tokio::time::sleep(Duration::from_millis(c.ipc_connect_delay_ms)).await;
      match UnixStream::connect(&socket_path_str).await {
        Ok(s) => {
          stream = Some(s);
          break;
        }
        Err(e) => debug!(attempt, err = %e, "mpv: IPC connect failed, retrying"),
      }
    }
    let stream = stream.ok_or_else(|| anyhow!("mpv IPC socket never came up at {}", socket_path_str))?;
    info!(socket = %socket_path_str, "mpv: connected");

    let (read_half, write_half) = stream.into_split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let pending: PendingReplies = Arc::new(StdMutex::new(HashMap::new()));

    let reader_pending = Arc::clone(&pending);
    let reader_handle = tokio::spawn(async move {
      let mut lines = TokioBufReader::new(read_half).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        match parse_ipc_line(&line) {
          Some(IpcMessage::Reply { request_id, result }) => {
            let waiter = reader_pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&request_id);
            if let Some(tx) = waiter {
              let _ = tx.send(result);
            }
          }
          Some(IpcMessage::Event(event)) => {
            if events_tx.send(event).is_err() {
              break;
            }
          }
          None => {}
        }
      }
      debug!("mpv: IPC reader finished");
    });

    let mut element = Self {
      child: Some(child),
      writer: Some(write_half),
      reader_handle: Some(reader_handle),
      events_rx,
      pending,
      next_request_id: 1,
      socket_path: socket_path_str,
      reply_timeout: Duration::from_millis(c.ipc_reply_timeout_ms),
    };
    element.observe_properties().await?;
    Ok(element)
  }

  async fn write_line(&mut self, payload: &Value) -> Result<()> {
    let writer = self.writer.as_mut().ok_or_else(|| anyhow!("mpv IPC is closed"))?;
    let mut line = serde_json::to_vec(payload).context("Failed to encode mpv command")?;
    line.push(b'\n');
    writer.write_all(&line).await.context("Failed to write to mpv IPC socket")
  }

  async fn observe_properties(&mut self) -> Result<()> {
    for (id, name) in OBSERVED.iter().enumerate() {
      let payload = json!({ "command": ["observe_property", id + 1, name] });
      self.write_line(&payload).await.with_context(|| format!("Failed to observe mpv property {}", name))?;
    }
    Ok(())
  }

  async fn close(&mut self) {
    if let Some(handle) = self.reader_handle.take() {
      handle.abort();
      let _ = handle.await;
    }
    if self.writer.is_some() {
      let _ = self.write_line(&json!({ "command": ["quit"] })).await;
    }
    self.writer = None;
    self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    while self.events_rx.try_recv().is_ok() {}

    if let Some(mut child) = self.child.take() {
      if let Err(e) = child.kill().await {
        debug!(err = %e, "mpv: kill after quit failed (already exited?)");
      }
      let _ = child.wait().await;
    }
    let _ = std::fs::remove_file(&self.socket_path);
  }
}

impl MediaElement for MpvElement {
  async fn send(&mut self, cmd: MediaCommand) -> Result<()> {
    let request_id = self.next_request_id;
    let Some(payload) = command_json(&cmd, request_id) else {
      self.close().await;
      return Ok(());
    };
    self.next_request_id += 1;

    let (tx, rx) = oneshot::channel();
    self.pending.lock().unwrap_or_else(PoisonError::into_inner).insert(request_id, tx);
    if let Err(e) = self.write_line(&payload).await {
      self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&request_id);
      return Err(e);
    }

    match tokio::time::timeout(self.reply_timeout, rx).await {
      Ok(Ok(Ok(()))) => Ok(()),
      Ok(Ok(Err(reason))) => Err(anyhow!("mpv rejected {:?}: {}", cmd, reason)),
      Ok(Err(_)) => Err(anyhow!("mpv IPC closed before replying")),
      Err(_) => {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&request_id);
        warn!(request_id, "mpv: reply timed out");
        Err(anyhow!("Timeout waiting for mpv reply"))
      }
    }
  }

  fn try_event(&mut self) -> Option<MediaEvent> {
    self.events_rx.try_recv().ok()
  }
}

impl Drop for MpvElement {
  fn drop(&mut self) {
    if let Some(handle) = self.reader_handle.take() {
      handle.abort();
    }
    let _ = std::fs::remove_file(&self.socket_path);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reply_success_and_error() {
    assert_eq!(
      parse_ipc_line(r#"{"request_id":3,"error":"success","data":null}"#),
      Some(IpcMessage::Reply { request_id: 3, result: Ok(()) })
    );
    assert_eq!(
      parse_ipc_line(r#"{"request_id":4,"error":"property unavailable"}"#),
      Some(IpcMessage::Reply { request_id: 4, result: Err("property unavailable".to_string()) })
    );
  }

  #[test]
  fn property_changes_map_to_events() {
    assert_eq!(
      parse_ipc_line(r#"{"event":"property-change","id":1,"name":"time-pos","data":12.5}"#),
      Some(IpcMessage::Event(MediaEvent::TimeUpdate(12.5)))
    );
    assert_eq!(
      parse_ipc_line(r#"{"event":"property-change","id":3,"name":"pause","data":false}"#),
      Some(IpcMessage::Event(MediaEvent::Playing))
    );
    assert_eq!(
      parse_ipc_line(r#"{"event":"property-change","id":6,"name":"volume","data":50.0}"#),
      Some(IpcMessage::Event(MediaEvent::VolumeChanged(0.5)))
    );
    assert_eq!(
      parse_ipc_line(r#"{"event":"property-change","id":4,"name":"paused-for-cache","data":true}"#),
      Some(IpcMessage::Event(MediaEvent::Waiting))
    );
  }

  #[test]
  fn unset_property_is_ignored() {
    assert_eq!(parse_ipc_line(r#"{"event":"property-change","id":2,"name":"duration"}"#), None);
    assert_eq!(parse_ipc_line(r#"{"event":"property-change","id":2,"name":"duration","data":null}"#), None);
  }

  #[test]
  fn playback_events_map() {
    assert_eq!(parse_ipc_line(r#"{"event":"start-file","playlist_entry_id":1}"#), Some(IpcMessage::Event(MediaEvent::LoadStart)));
    assert_eq!(parse_ipc_line(r#"{"event":"playback-restart"}"#), Some(IpcMessage::Event(MediaEvent::CanPlay)));
    assert_eq!(parse_ipc_line(r#"{"event":"end-file","reason":"eof"}"#), Some(IpcMessage::Event(MediaEvent::Ended)));
    assert_eq!(parse_ipc_line(r#"{"event":"end-file","reason":"stop"}"#), None);
    assert_eq!(
      parse_ipc_line(r#"{"event":"property-change","id":9,"name":"eof-reached","data":true}"#),
      Some(IpcMessage::Event(MediaEvent::Ended))
    );
    assert_eq!(parse_ipc_line(r#"{"event":"property-change","id":9,"name":"eof-reached","data":false}"#), None);
  }

  #[test]
  fn end_file_errors_are_classified() {
    assert_eq!(
      parse_ipc_line(r#"{"event":"end-file","reason":"error","file_error":"loading failed"}"#),
      Some(IpcMessage::Event(MediaEvent::Error(MediaErrorKind::Network)))
    );
    assert_eq!(
      parse_ipc_line(r#"{"event":"end-file","reason":"error","file_error":"unrecognized file format"}"#),
      Some(IpcMessage::Event(MediaEvent::Error(MediaErrorKind::Unsupported)))
    );
    assert_eq!(classify_file_error("no audio or video data played"), MediaErrorKind::Decode);
  }

  #[test]
  fn garbage_is_ignored() {
    assert_eq!(parse_ipc_line("not json"), None);
    assert_eq!(parse_ipc_line(r#"{"event":"idle"}"#), None);
  }

  #[test]
  fn commands_encode_with_request_id() {
    assert_eq!(
      command_json(&MediaCommand::Seek(42.0), 7),
      Some(json!({"command": ["seek", 42.0, "absolute"], "request_id": 7}))
    );
    assert_eq!(
      command_json(&MediaCommand::SetVolume(0.25), 1),
      Some(json!({"command": ["set_property", "volume", 25.0], "request_id": 1}))
    );
    assert_eq!(
      command_json(&MediaCommand::Load("https://cdn/x.mp4".into()), 2),
      Some(json!({"command": ["loadfile", "https://cdn/x.mp4", "replace"], "request_id": 2}))
    );
    assert_eq!(command_json(&MediaCommand::Close, 3), None);
  }
}
