use anyhow::Result;
use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, ListingFocus, Route, View};
use crate::catalog::{Category, ListingSource};
use crate::constants::constants;
use crate::player::PlayerIntent;

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

impl PlayerIntent {
  /// Player binding for `code`. Nothing is bound while a text input has focus.
  pub fn from_key(code: KeyCode, input_focused: bool) -> Option<Self> {
    if input_focused {
      return None;
    }
    let c = constants();
    match code {
      KeyCode::Char(' ') | KeyCode::Char('k') => Some(PlayerIntent::TogglePlay),
      KeyCode::Char('m') => Some(PlayerIntent::ToggleMute),
      KeyCode::Char('f') => Some(PlayerIntent::ToggleFullscreen),
      KeyCode::Left => Some(PlayerIntent::Skip(-c.skip_secs)),
      KeyCode::Right => Some(PlayerIntent::Skip(c.skip_secs)),
      KeyCode::Up => Some(PlayerIntent::VolumeStep(c.volume_step)),
      KeyCode::Down => Some(PlayerIntent::VolumeStep(-c.volume_step)),
      _ => None,
    }
  }
}

fn wrap_next(selected: Option<usize>, count: usize) -> Option<usize> {
  (count > 0).then(|| selected.map_or(0, |i| (i + 1) % count))
}

fn wrap_prev(selected: Option<usize>, count: usize) -> Option<usize> {
  (count > 0).then(|| selected.map_or(0, |i| if i == 0 { count - 1 } else { i - 1 }))
}

// --- Event Handling ---

pub async fn handle_key_event(app: &mut App, key: event::KeyEvent) -> Result<()> {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.should_quit = true;
    return Ok(());
  }

  let handled = match app.view {
    View::Home(_) => handle_home_key(app, key.code).await,
    View::Listing(_) => handle_listing_key(app, key.code).await,
    View::Detail(_) => handle_detail_key(app, key.code).await,
    View::Watch(_) => handle_watch_key(app, key.code).await,
    View::AllTags(_) => handle_tags_key(app, key.code).await,
    View::Search(_) => handle_search_key(app, key.code).await,
    View::NotFound(_) if key.code == KeyCode::Enter => {
      app.back().await;
      true
    }
    View::NotFound(_) => false,
  };
  if !handled {
    handle_global_key(app, key.code).await;
  }
  Ok(())
}

async fn handle_global_key(app: &mut App, code: KeyCode) {
  match code {
    KeyCode::Char('q') => app.should_quit = true,
    KeyCode::Char('/') => app.open(Route::Search).await,
    KeyCode::Char('g') => app.open(Route::AllTags).await,
    KeyCode::Char('0') => app.open(Route::Home).await,
    KeyCode::Char(c @ '1'..='6') => {
      let category = Category::ALL[c as usize - '1' as usize];
      app.open(Route::Listing(ListingSource::Category(category))).await;
    }
    KeyCode::Esc | KeyCode::Backspace => app.back().await,
    _ => {}
  }
}

async fn handle_home_key(app: &mut App, code: KeyCode) -> bool {
  let View::Home(view) = &mut app.view else { return false };
  match code {
    KeyCode::Down | KeyCode::Char('j') => view.move_row(true),
    KeyCode::Up | KeyCode::Char('k') => view.move_row(false),
    KeyCode::Right | KeyCode::Char('l') => view.move_item(true),
    KeyCode::Left | KeyCode::Char('h') => view.move_item(false),
    KeyCode::Enter => {
      let Some(id) = view.selected_item().map(|item| item.id.clone()) else { return true };
      app.open(Route::Detail(id)).await;
    }
    KeyCode::Char('w') => {
      let Some(id) = view.selected_item().map(|item| item.id.clone()) else { return true };
      app.open(Route::Watch { book_id: id, episode: 1 }).await;
    }
    KeyCode::Char('a') => {
      let Some(category) = view.selected_row().map(|row| row.category) else { return true };
      app.open(Route::Listing(ListingSource::Category(category))).await;
    }
    KeyCode::Char('i') => {
      let Some(id) = view.featured().map(|item| item.id.clone()) else { return true };
      app.open(Route::Detail(id)).await;
    }
    KeyCode::Char('r') => app.reload_home(),
    _ => return false,
  }
  true
}

async fn handle_listing_key(app: &mut App, code: KeyCode) -> bool {
  let View::Listing(view) = &mut app.view else { return false };
  match (view.focus, code) {
    (focus, KeyCode::Tab) => {
      view.focus = if focus == ListingFocus::Items { ListingFocus::Tags } else { ListingFocus::Items };
    }
    (ListingFocus::Tags, KeyCode::Left | KeyCode::Char('h')) => view.move_tag_cursor(false),
    (ListingFocus::Tags, KeyCode::Right | KeyCode::Char('l')) => view.move_tag_cursor(true),
    (ListingFocus::Tags, KeyCode::Enter | KeyCode::Char(' ')) => view.toggle_tag_at_cursor(),
    (ListingFocus::Items, KeyCode::Down | KeyCode::Char('j')) => view.select_next(),
    (ListingFocus::Items, KeyCode::Up | KeyCode::Char('k')) => view.select_prev(),
    (ListingFocus::Items, KeyCode::Right | KeyCode::Char('l')) => view.next_page(),
    (ListingFocus::Items, KeyCode::Left | KeyCode::Char('h')) => view.prev_page(),
    (ListingFocus::Items, KeyCode::Enter) => {
      let Some(id) = view.selected_item().map(|item| item.id.clone()) else { return true };
      app.open(Route::Detail(id)).await;
    }
    (ListingFocus::Items, KeyCode::Char('w')) => {
      let Some(id) = view.selected_item().map(|item| item.id.clone()) else { return true };
      app.open(Route::Watch { book_id: id, episode: 1 }).await;
    }
    (_, KeyCode::Char('s')) => app.cycle_sort(),
    (_, KeyCode::Char('e')) => view.cycle_range(),
    (_, KeyCode::Char('c')) => view.clear_filters(),
    (_, KeyCode::Char('n')) => app.change_api_page(1),
    (_, KeyCode::Char('p')) => app.change_api_page(-1),
    (_, KeyCode::Char('r')) => app.reload_listing(),
    _ => return false,
  }
  true
}

async fn handle_detail_key(app: &mut App, code: KeyCode) -> bool {
  let View::Detail(view) = &mut app.view else { return false };
  match code {
    KeyCode::Left | KeyCode::Char('h') => view.move_tag_cursor(false),
    KeyCode::Right | KeyCode::Char('l') => view.move_tag_cursor(true),
    KeyCode::Down | KeyCode::Char('j') => {
      let next = wrap_next(view.episode_list.selected(), view.episodes.len());
      view.episode_list.select(next);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let prev = wrap_prev(view.episode_list.selected(), view.episodes.len());
      view.episode_list.select(prev);
    }
    KeyCode::Char('t') => {
      let Some(tag) = view.selected_tag().map(str::to_string) else { return true };
      app.open(Route::Listing(ListingSource::Tag(tag))).await;
    }
    KeyCode::Enter | KeyCode::Char('w') => {
      if view.detail.is_none() {
        return true;
      }
      let episode = view.episode_list.selected().map_or(1, |i| i as u32 + 1);
      let book_id = view.book_id.clone();
      app.open(Route::Watch { book_id, episode }).await;
    }
    _ => return false,
  }
  true
}

async fn handle_watch_key(app: &mut App, code: KeyCode) -> bool {
  app.touch_player();
  let View::Watch(view) = &mut app.view else { return false };

  if let Some(input) = view.jump_input.as_mut() {
    match code {
      KeyCode::Char(c) if c.is_ascii_digit() => input.push(c),
      KeyCode::Backspace => {
        input.pop();
      }
      KeyCode::Esc => view.jump_input = None,
      KeyCode::Enter => {
        let number = input.parse::<usize>().ok().filter(|n| *n >= 1);
        view.jump_input = None;
        match number {
          Some(n) => app.jump_to_episode(n - 1).await,
          None => app.set_error("Nomor episode tidak valid".to_string()),
        }
      }
      _ => {}
    }
    return true;
  }

  if let Some(cursor) = view.quality_menu {
    let tiers = view.qualities();
    match code {
      KeyCode::Up | KeyCode::Char('k') => view.quality_menu = Some(cursor.saturating_sub(1)),
      KeyCode::Down | KeyCode::Char('j') => view.quality_menu = Some((cursor + 1).min(tiers.len().saturating_sub(1))),
      KeyCode::Enter => {
        if let Some(&tier) = tiers.get(cursor) {
          app.select_quality(tier).await;
        }
      }
      KeyCode::Esc | KeyCode::Char('v') => view.quality_menu = None,
      _ => {}
    }
    return true;
  }

  let count = view.episodes.len();
  if let Some(list) = view.episode_list.as_mut() {
    match code {
      KeyCode::Up | KeyCode::Char('k') => list.select(wrap_prev(list.selected(), count)),
      KeyCode::Down | KeyCode::Char('j') => list.select(wrap_next(list.selected(), count)),
      KeyCode::Enter => {
        if let Some(index) = list.selected() {
          app.jump_to_episode(index).await;
        }
      }
      KeyCode::Esc | KeyCode::Char('l') => view.episode_list = None,
      _ => {}
    }
    return true;
  }

  if let Some(intent) = PlayerIntent::from_key(code, view.input_focused()) {
    app.player_intent(intent).await;
    return true;
  }

  match code {
    KeyCode::Char('n') => app.next_episode().await,
    KeyCode::Char('p') => app.previous_episode().await,
    KeyCode::Char('v') => {
      let tiers = view.qualities();
      if tiers.is_empty() {
        app.set_error("Tidak ada pilihan kualitas".to_string());
      } else {
        let current = view.player.as_ref().map(|p| p.state().quality);
        view.quality_menu = Some(tiers.iter().position(|t| Some(*t) == current).unwrap_or(0));
      }
    }
    KeyCode::Char('l') => {
      let mut list = ratatui::widgets::ListState::default();
      list.select(Some(view.index));
      view.episode_list = Some(list);
    }
    KeyCode::Char(':') => view.jump_input = Some(String::new()),
    KeyCode::Char('r') => app.retry_playback().await,
    KeyCode::Char('i') => {
      let book_id = view.book_id.clone();
      app.open(Route::Detail(book_id)).await;
    }
    _ => return false,
  }
  true
}

async fn handle_tags_key(app: &mut App, code: KeyCode) -> bool {
  let View::AllTags(view) = &mut app.view else { return false };
  match code {
    KeyCode::Down | KeyCode::Char('j') => {
      let next = wrap_next(view.list_state.selected(), view.tags.len());
      view.list_state.select(next);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let prev = wrap_prev(view.list_state.selected(), view.tags.len());
      view.list_state.select(prev);
    }
    KeyCode::Enter => {
      let Some(tag) = view.selected().map(str::to_string) else { return true };
      app.open(Route::Listing(ListingSource::Tag(tag))).await;
    }
    _ => return false,
  }
  true
}

async fn handle_search_key(app: &mut App, code: KeyCode) -> bool {
  let View::Search(view) = &mut app.view else { return false };

  if !view.input_focused {
    match code {
      KeyCode::Down | KeyCode::Char('j') => {
        let next = wrap_next(view.list_state.selected(), view.popular.len());
        view.list_state.select(next);
      }
      KeyCode::Up | KeyCode::Char('k') => {
        if view.list_state.selected().is_none_or(|i| i == 0) {
          view.input_focused = true;
        } else {
          let prev = wrap_prev(view.list_state.selected(), view.popular.len());
          view.list_state.select(prev);
        }
      }
      KeyCode::Tab => view.input_focused = true,
      KeyCode::Enter => {
        let Some(term) = view.selected_term().map(str::to_string) else { return true };
        app.open(Route::Listing(ListingSource::Search(term))).await;
      }
      _ => return false,
    }
    return true;
  }

  match code {
    KeyCode::Enter => {
      let query = view.input.trim().to_string();
      if query.is_empty() {
        app.set_error("Masukkan kata kunci pencarian.".to_string());
      } else {
        app.clear_error();
        app.open(Route::Listing(ListingSource::Search(query))).await;
      }
    }
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&view.input, view.cursor_position);
      view.input.insert(byte_idx, c);
      view.cursor_position += 1;
    }
    KeyCode::Backspace => {
      if view.cursor_position > 0 {
        view.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&view.input, view.cursor_position);
        view.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if view.cursor_position < view.input.chars().count() {
        let byte_idx = char_to_byte_index(&view.input, view.cursor_position);
        view.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      view.cursor_position = view.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if view.cursor_position < view.input.chars().count() {
        view.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      view.cursor_position = 0;
    }
    KeyCode::End => {
      view.cursor_position = view.input.chars().count();
    }
    KeyCode::Down | KeyCode::Tab => {
      if !view.popular.is_empty() {
        view.input_focused = false;
        view.list_state.select(Some(0));
      }
    }
    KeyCode::Esc => {
      if view.input.is_empty() {
        app.back().await;
      } else {
        view.input.clear();
        view.cursor_position = 0;
        view.input_scroll = 0;
      }
    }
    _ => {}
  }
  true
}
