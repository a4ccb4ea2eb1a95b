use anyhow::{Result, anyhow};
use ratatui::widgets::ListState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{
  CatalogClient, CatalogItem, Category, DramaDetail, EpisodeRecord, ListingKey, ListingSource, ResponseCache,
};
use crate::config::Config;
use crate::constants::constants;
use crate::mpv::MpvElement;
use crate::pipeline::{self, Listing, SortKey};
use crate::player::{PlaybackController, PlaybackPhase, PlayerIntent, fullscreen_chain};

// --- Types ---

pub type Player = PlaybackController<MpvElement>;

/// Detail and episode list of one title, fetched together.
#[derive(Debug, Clone, Default)]
pub struct TitleBundle {
  pub detail: Option<DramaDetail>,
  pub episodes: Vec<EpisodeRecord>,
}

/// A navigation target. Also what the back stack stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
  Home,
  Listing(ListingSource),
  Detail(String),
  /// `episode` is 1-based.
  Watch { book_id: String, episode: u32 },
  AllTags,
  Search,
  NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFocus {
  Items,
  Tags,
}

/// A category, search or tag listing with its own filter state.
pub struct ListingView {
  pub key: ListingKey,
  pub filter: pipeline::FilterState,
  pub items: Arc<Vec<CatalogItem>>,
  pub loading: bool,
  pub error: Option<String>,
  pub list_state: ListState,
  pub focus: ListingFocus,
  pub tag_cursor: usize,
  listing: Listing,
}

impl ListingView {
  pub fn new(key: ListingKey, sort: SortKey) -> Self {
    Self {
      key,
      filter: pipeline::FilterState::with_sort(sort),
      items: Arc::new(Vec::new()),
      loading: true,
      error: None,
      list_state: ListState::default(),
      focus: ListingFocus::Items,
      tag_cursor: 0,
      listing: Listing::default(),
    }
  }

  /// Output of the pipeline for the current filter.
  pub fn listing(&self) -> &Listing {
    &self.listing
  }

  pub fn set_items(&mut self, items: Arc<Vec<CatalogItem>>) {
    self.items = items;
    self.loading = false;
    self.error = None;
    self.list_state.select(Some(0));
    self.refresh();
  }

  pub fn set_error(&mut self, msg: String) {
    self.loading = false;
    self.error = Some(msg);
  }

  /// Rerun the pipeline and keep the selection on the visible page.
  pub fn refresh(&mut self) {
    self.listing = pipeline::transform(&self.items, &self.filter, constants().page_size);
    if self.listing.items.is_empty() {
      self.list_state.select(None);
    } else {
      let sel = self.list_state.selected().unwrap_or(0).min(self.listing.items.len() - 1);
      self.list_state.select(Some(sel));
    }
    self.tag_cursor = self.tag_cursor.min(self.listing.available_tags.len().saturating_sub(1));
  }

  pub fn selected_item(&self) -> Option<&CatalogItem> {
    self.list_state.selected().and_then(|i| self.listing.items.get(i))
  }

  /// Rank shown next to row `row` of the current page.
  pub fn rank_of(&self, row: usize) -> usize {
    self.listing.page.saturating_sub(1) * constants().page_size + row + 1
  }

  pub fn shows_ranks(&self) -> bool {
    matches!(self.key.source, ListingSource::Tag(_) | ListingSource::Category(Category::Trending))
  }

  pub fn select_next(&mut self) {
    let count = self.listing.items.len();
    if count > 0 {
      let i = self.list_state.selected().map_or(0, |i| (i + 1) % count);
      self.list_state.select(Some(i));
    }
  }

  pub fn select_prev(&mut self) {
    let count = self.listing.items.len();
    if count > 0 {
      let i = self.list_state.selected().map_or(0, |i| if i == 0 { count - 1 } else { i - 1 });
      self.list_state.select(Some(i));
    }
  }

  pub fn next_page(&mut self) {
    self.filter.next_page(self.listing.page_count);
    self.list_state.select(Some(0));
    self.refresh();
  }

  pub fn prev_page(&mut self) {
    self.filter.prev_page();
    self.list_state.select(Some(0));
    self.refresh();
  }

  pub fn move_tag_cursor(&mut self, forward: bool) {
    let count = self.listing.available_tags.len();
    if count == 0 {
      return;
    }
    self.tag_cursor = if forward { (self.tag_cursor + 1) % count } else { (self.tag_cursor + count - 1) % count };
  }

  pub fn toggle_tag_at_cursor(&mut self) {
    if let Some(tag) = self.listing.available_tags.get(self.tag_cursor).cloned() {
      self.filter.toggle_tag(&tag);
      self.refresh();
    }
  }

  pub fn cycle_range(&mut self) {
    self.filter.set_range(self.filter.range.next_preset());
    self.refresh();
  }

  pub fn clear_filters(&mut self) {
    self.filter.reset();
    self.refresh();
  }
}

/// Category rows on the home view, in display order.
pub const HOME_ROWS: [Category; 5] =
  [Category::Trending, Category::ForYou, Category::Latest, Category::DubIndo, Category::Random];

/// First page of one category, as shown on the home view.
pub struct HomeRow {
  pub category: Category,
  pub items: Arc<Vec<CatalogItem>>,
  pub loading: bool,
  pub error: Option<String>,
  pub cursor: usize,
}

/// Featured title plus one row per category. Rows without titles are hidden.
pub struct HomeView {
  pub rows: Vec<HomeRow>,
  /// Index into `rows`; kept on a row that has titles once one does.
  pub row_cursor: usize,
}

impl HomeView {
  fn new() -> Self {
    let rows = HOME_ROWS
      .iter()
      .map(|&category| HomeRow { category, items: Arc::new(Vec::new()), loading: true, error: None, cursor: 0 })
      .collect();
    Self { rows, row_cursor: 0 }
  }

  fn row(&self, category: Category) -> Option<&HomeRow> {
    self.rows.iter().find(|r| r.category == category)
  }

  /// First trending title, else the first recommendation.
  pub fn featured(&self) -> Option<&CatalogItem> {
    [Category::Trending, Category::ForYou].into_iter().find_map(|c| self.row(c)?.items.first())
  }

  /// Still waiting on every one of the leading rows.
  pub fn loading(&self) -> bool {
    [Category::Trending, Category::ForYou, Category::Latest]
      .into_iter()
      .all(|c| self.row(c).is_some_and(|r| r.loading))
  }

  /// Every row finished and none has titles.
  pub fn is_empty(&self) -> bool {
    self.rows.iter().all(|r| !r.loading && r.items.is_empty())
  }

  fn set_row(&mut self, category: Category, result: std::result::Result<Arc<Vec<CatalogItem>>, String>) {
    let Some(row) = self.rows.iter_mut().find(|r| r.category == category) else { return };
    row.loading = false;
    match result {
      Ok(items) => {
        row.items = items;
        row.error = None;
        row.cursor = row.cursor.min(row.items.len().saturating_sub(1));
      }
      Err(msg) => row.error = Some(msg),
    }
    if self.rows.get(self.row_cursor).is_none_or(|r| r.items.is_empty())
      && let Some(first) = self.rows.iter().position(|r| !r.items.is_empty())
    {
      self.row_cursor = first;
    }
  }

  /// Move to the next or previous row that has titles.
  pub fn move_row(&mut self, forward: bool) {
    let next = if forward {
      (self.row_cursor + 1..self.rows.len()).find(|&i| !self.rows[i].items.is_empty())
    } else {
      (0..self.row_cursor).rev().find(|&i| !self.rows[i].items.is_empty())
    };
    if let Some(i) = next {
      self.row_cursor = i;
    }
  }

  pub fn move_item(&mut self, forward: bool) {
    if let Some(row) = self.rows.get_mut(self.row_cursor) {
      let last = row.items.len().saturating_sub(1);
      row.cursor = if forward { (row.cursor + 1).min(last) } else { row.cursor.saturating_sub(1) };
    }
  }

  pub fn selected_row(&self) -> Option<&HomeRow> {
    self.rows.get(self.row_cursor).filter(|r| !r.items.is_empty())
  }

  pub fn selected_item(&self) -> Option<&CatalogItem> {
    self.selected_row().and_then(|r| r.items.get(r.cursor))
  }
}

pub struct DetailView {
  pub book_id: String,
  pub detail: Option<DramaDetail>,
  pub episodes: Vec<EpisodeRecord>,
  pub loading: bool,
  pub error: Option<String>,
  pub episode_list: ListState,
  pub tag_cursor: usize,
}

impl DetailView {
  fn new(book_id: String) -> Self {
    Self {
      book_id,
      detail: None,
      episodes: Vec::new(),
      loading: true,
      error: None,
      episode_list: ListState::default(),
      tag_cursor: 0,
    }
  }

  /// Episode count from the episode list, else the catalog field.
  pub fn episode_count(&self) -> usize {
    if self.episodes.is_empty() {
      self.detail.as_ref().map_or(0, |d| d.item.episode_count as usize)
    } else {
      self.episodes.len()
    }
  }

  pub fn selected_tag(&self) -> Option<&str> {
    self.detail.as_ref()?.item.tags.get(self.tag_cursor).map(String::as_str)
  }

  pub fn move_tag_cursor(&mut self, forward: bool) {
    let count = self.detail.as_ref().map_or(0, |d| d.item.tags.len());
    if count > 0 {
      self.tag_cursor = if forward { (self.tag_cursor + 1) % count } else { (self.tag_cursor + count - 1) % count };
    }
  }
}

/// The watch view owns the playback controller for its lifetime.
pub struct WatchView {
  pub book_id: String,
  pub title: String,
  pub introduction: String,
  pub tags: Vec<String>,
  pub episodes: Vec<EpisodeRecord>,
  /// 0-based index into `episodes`.
  pub index: usize,
  requested_episode: u32,
  pub loading: bool,
  pub player: Option<Player>,
  /// Cursor into [`WatchView::qualities`] while the quality menu is open.
  pub quality_menu: Option<usize>,
  /// Episode jump list, when open.
  pub episode_list: Option<ListState>,
  /// Episode number being typed, when the jump prompt is open.
  pub jump_input: Option<String>,
}

impl WatchView {
  fn new(book_id: String, requested_episode: u32) -> Self {
    Self {
      book_id,
      title: String::new(),
      introduction: String::new(),
      tags: Vec::new(),
      episodes: Vec::new(),
      index: 0,
      requested_episode,
      loading: true,
      player: None,
      quality_menu: None,
      episode_list: None,
      jump_input: None,
    }
  }

  fn set_title(&mut self, bundle: TitleBundle) {
    if let Some(detail) = bundle.detail {
      self.title = detail.item.name;
      self.introduction = detail.item.introduction;
      self.tags = detail.item.tags;
    }
    self.index = resolve_episode_index(self.requested_episode, bundle.episodes.len());
    self.episodes = bundle.episodes;
    self.loading = false;
  }

  pub fn current(&self) -> Option<&EpisodeRecord> {
    self.episodes.get(self.index)
  }

  pub fn has_previous(&self) -> bool {
    self.index > 0
  }

  pub fn has_next(&self) -> bool {
    self.index + 1 < self.episodes.len()
  }

  /// True while a text prompt owns the keyboard.
  pub fn input_focused(&self) -> bool {
    self.jump_input.is_some()
  }

  /// Tiers the current episode offers, highest first.
  pub fn qualities(&self) -> Vec<u32> {
    self.current().map(EpisodeRecord::qualities).unwrap_or_default()
  }

  pub fn phase(&self) -> PlaybackPhase {
    self.player.as_ref().map_or(PlaybackPhase::Idle, Player::phase)
  }

  fn route(&self) -> Route {
    Route::Watch { book_id: self.book_id.clone(), episode: self.index as u32 + 1 }
  }
}

/// Curated popular tags merged with tags seen on the trending list.
pub struct TagsView {
  pub tags: Vec<String>,
  pub loading: bool,
  pub list_state: ListState,
}

impl TagsView {
  fn new() -> Self {
    let mut list_state = ListState::default();
    list_state.select(Some(0));
    Self { tags: constants().popular_tags.clone(), loading: true, list_state }
  }

  pub fn selected(&self) -> Option<&str> {
    self.list_state.selected().and_then(|i| self.tags.get(i)).map(String::as_str)
  }
}

pub struct SearchView {
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  pub input_focused: bool,
  pub popular: Vec<String>,
  pub popular_loading: bool,
  pub list_state: ListState,
}

impl SearchView {
  fn new() -> Self {
    Self {
      input: String::new(),
      cursor_position: 0,
      input_scroll: 0,
      input_focused: true,
      popular: Vec::new(),
      popular_loading: true,
      list_state: ListState::default(),
    }
  }

  pub fn selected_term(&self) -> Option<&str> {
    self.list_state.selected().and_then(|i| self.popular.get(i)).map(String::as_str)
  }
}

pub enum View {
  Home(HomeView),
  Listing(ListingView),
  Detail(DetailView),
  Watch(Box<WatchView>),
  AllTags(TagsView),
  Search(SearchView),
  NotFound(String),
}

impl View {
  /// Route that reopens this view, if it is worth returning to.
  fn route(&self) -> Option<Route> {
    match self {
      View::Home(_) => Some(Route::Home),
      View::Listing(v) => Some(Route::Listing(v.key.source.clone())),
      View::Detail(v) => Some(Route::Detail(v.book_id.clone())),
      View::Watch(v) => Some(v.route()),
      View::AllTags(_) => Some(Route::AllTags),
      View::Search(_) => Some(Route::Search),
      View::NotFound(_) => None,
    }
  }
}

/// 0-based index for a 1-based episode number, or the first episode when out of range.
pub fn resolve_episode_index(episode: u32, count: usize) -> usize {
  let idx = (episode as usize).saturating_sub(1);
  if episode >= 1 && idx < count { idx } else { 0 }
}

/// Stream for a new episode: the remembered tier when there is one, else the initial pick.
pub fn episode_stream(episode: &EpisodeRecord, preferred: Option<u32>) -> Option<(String, u32)> {
  let variant = match preferred {
    Some(tier) => episode.stream_for(tier),
    None => episode.initial_stream(constants().default_quality),
  }?;
  (!variant.url.is_empty()).then(|| (variant.url.clone(), variant.quality))
}

// --- Async tasks ---

struct PendingListing {
  key: ListingKey,
  rx: oneshot::Receiver<Result<Vec<CatalogItem>>>,
  handle: JoinHandle<()>,
}

struct PendingTitle {
  book_id: String,
  rx: oneshot::Receiver<Result<TitleBundle>>,
  handle: JoinHandle<()>,
}

/// In-flight async task receivers and handles.
#[derive(Default)]
pub(crate) struct AsyncTasks {
  listing: Option<PendingListing>,
  home: Vec<PendingListing>,
  title: Option<PendingTitle>,
  popular: Option<oneshot::Receiver<Result<Vec<String>>>>,
  player: Option<oneshot::Receiver<Result<MpvElement>>>,
}

pub struct App {
  pub view: View,
  history: Vec<Route>,
  client: CatalogClient,
  cache: ResponseCache,
  pub(crate) tasks: AsyncTasks,
  config: Config,
  mpv_path: String,
  pub last_error: Option<String>,
  pub status_message: Option<String>,
  pub should_quit: bool,
  /// When the last error was set, for auto-dismiss after 5 seconds.
  error_time: Option<Instant>,
}

impl App {
  pub fn new(client: CatalogClient, config: Config, mpv_path: String) -> Self {
    Self {
      view: View::NotFound(String::new()),
      history: Vec::new(),
      client,
      cache: ResponseCache::new(Duration::from_secs(constants().cache_ttl_secs)),
      tasks: AsyncTasks::default(),
      config,
      mpv_path,
      last_error: None,
      status_message: None,
      should_quit: false,
      error_time: None,
    }
  }

  /// Set an error message with auto-dismiss tracking.
  pub fn set_error(&mut self, msg: String) {
    warn!(err = %msg, "app: error shown");
    self.last_error = Some(msg);
    self.error_time = Some(Instant::now());
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  /// Clear stale error messages after 5 seconds.
  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(5)
    {
      self.last_error = None;
      self.error_time = None;
    }
  }

  fn default_sort(&self) -> SortKey {
    self.config.sort.as_deref().map(SortKey::from_config).unwrap_or_default()
  }

  // --- Navigation ---

  /// Navigate to `route`, remembering the current view for [`App::back`].
  pub async fn open(&mut self, route: Route) {
    self.close_player().await;
    if let Some(prev) = self.view.route()
      && prev != route
    {
      self.history.push(prev);
    }
    self.enter(route);
  }

  /// Return to the previous view, or the home view when there is none.
  pub async fn back(&mut self) {
    self.close_player().await;
    match self.history.pop() {
      Some(route) => self.enter(route),
      None => {
        let home = Route::Home;
        if self.view.route().as_ref() != Some(&home) {
          self.enter(home);
        }
      }
    }
  }

  fn enter(&mut self, route: Route) {
    info!(route = ?route, "app: navigate");
    self.status_message = None;
    match route {
      Route::Home => {
        self.view = View::Home(HomeView::new());
        self.fetch_home();
      }
      Route::Listing(source) => {
        let key = ListingKey::new(source, 1);
        self.view = View::Listing(ListingView::new(key.clone(), self.default_sort()));
        self.fetch_listing(key);
      }
      Route::Detail(book_id) => {
        self.view = View::Detail(DetailView::new(book_id.clone()));
        self.fetch_title(book_id);
      }
      Route::Watch { book_id, episode } => {
        self.view = View::Watch(Box::new(WatchView::new(book_id.clone(), episode)));
        self.fetch_title(book_id);
      }
      Route::AllTags => {
        self.view = View::AllTags(TagsView::new());
        self.fetch_listing(ListingKey::new(ListingSource::Category(Category::Trending), 1));
      }
      Route::Search => {
        self.view = View::Search(SearchView::new());
        self.fetch_popular();
      }
      Route::NotFound(msg) => {
        self.view = View::NotFound(msg);
      }
    }
  }

  /// Shut down the watch view's player and drop a pending mpv launch.
  async fn close_player(&mut self) {
    self.tasks.player = None;
    if let View::Watch(view) = &mut self.view
      && let Some(mut player) = view.player.take()
    {
      player.shutdown().await;
    }
  }

  pub async fn shutdown(&mut self) {
    self.close_player().await;
    if let Some(pending) = self.tasks.listing.take() {
      pending.handle.abort();
    }
    if let Some(pending) = self.tasks.title.take() {
      pending.handle.abort();
    }
    for pending in self.tasks.home.drain(..) {
      pending.handle.abort();
    }
  }

  // --- Fetching ---

  fn spawn_listing(&self, key: ListingKey) -> PendingListing {
    let client = self.client.clone();
    let task_key = key.clone();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
      let _ = tx.send(client.listing(&task_key).await);
    });
    PendingListing { key, rx, handle }
  }

  fn fetch_listing(&mut self, key: ListingKey) {
    if let Some(items) = self.cache.get(&key, Instant::now()) {
      debug!(key = ?key, "listing: cache hit");
      if let Some(prev) = self.tasks.listing.take_if(|p| p.key != key) {
        debug!(key = ?prev.key, "listing: superseded by cached result, aborting");
        prev.handle.abort();
      }
      self.deliver_listing(&key, Ok(items));
      return;
    }
    if let Some(prev) = self.tasks.listing.take() {
      if prev.key == key {
        self.tasks.listing = Some(prev);
        return;
      }
      debug!(key = ?prev.key, "listing: superseded, aborting");
      prev.handle.abort();
    }
    self.tasks.listing = Some(self.spawn_listing(key));
  }

  /// Fetch every home row at once. Cached rows fill in immediately.
  fn fetch_home(&mut self) {
    let now = Instant::now();
    for category in HOME_ROWS {
      let key = ListingKey::new(ListingSource::Category(category), 1);
      if let Some(items) = self.cache.get(&key, now) {
        self.deliver_listing(&key, Ok(items));
      } else if !self.tasks.home.iter().any(|p| p.key == key) {
        let pending = self.spawn_listing(key);
        self.tasks.home.push(pending);
      }
    }
  }

  /// Drop cached home rows and fetch them again.
  pub fn reload_home(&mut self) {
    if !matches!(self.view, View::Home(_)) {
      return;
    }
    for category in HOME_ROWS {
      self.cache.invalidate(&ListingKey::new(ListingSource::Category(category), 1));
    }
    self.clear_error();
    self.view = View::Home(HomeView::new());
    self.fetch_home();
  }

  /// Hand a listing result to whichever view is waiting for `key`.
  fn deliver_listing(&mut self, key: &ListingKey, result: Result<Arc<Vec<CatalogItem>>>) {
    let trending = ListingKey::new(ListingSource::Category(Category::Trending), 1);
    let mut error = None;
    match &mut self.view {
      View::Listing(view) if view.key == *key => match result {
        Ok(items) => {
          info!(key = ?key, count = items.len(), "listing: loaded");
          view.set_items(items);
        }
        Err(e) => {
          let msg = format!("Gagal memuat daftar: {:#}", e);
          view.set_error(msg.clone());
          error = Some(msg);
        }
      },
      View::AllTags(view) if *key == trending => {
        view.loading = false;
        match result {
          Ok(items) => view.tags = pipeline::merge_tags(&constants().popular_tags, &pipeline::extract_tags(&items)),
          Err(e) => warn!(err = %format!("{:#}", e), "tags: trending fetch failed, showing curated tags only"),
        }
      }
      View::Home(view) => match (&key.source, key.page) {
        (ListingSource::Category(category), 1) => {
          if let Err(e) = &result {
            warn!(category = category.slug(), err = %format!("{:#}", e), "home: row failed");
          }
          view.set_row(*category, result.map_err(|e| format!("{:#}", e)));
        }
        _ => debug!(key = ?key, "listing: result for inactive view dropped"),
      },
      _ => debug!(key = ?key, "listing: result for inactive view dropped"),
    }
    if let Some(msg) = error {
      self.set_error(msg);
    }
  }

  fn fetch_title(&mut self, book_id: String) {
    if let Some(prev) = self.tasks.title.take() {
      prev.handle.abort();
    }
    let client = self.client.clone();
    let id = book_id.clone();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
      let (detail, episodes) = futures::join!(client.detail(&id), client.episodes(&id));
      let result = detail.map(|detail| {
        let episodes = episodes.unwrap_or_else(|e| {
          warn!(book_id = %id, err = %format!("{:#}", e), "title: episode list failed");
          Vec::new()
        });
        TitleBundle { detail, episodes }
      });
      let _ = tx.send(result);
    });
    self.tasks.title = Some(PendingTitle { book_id, rx, handle });
  }

  fn deliver_title(&mut self, book_id: &str, result: Result<TitleBundle>) {
    let mut not_found = None;
    let mut error = None;
    let mut launch_player = false;
    match &mut self.view {
      View::Detail(view) if view.book_id == book_id => {
        view.loading = false;
        match result {
          Ok(TitleBundle { detail: Some(detail), episodes }) => {
            view.detail = Some(detail);
            view.episodes = episodes;
            if !view.episodes.is_empty() {
              view.episode_list.select(Some(0));
            }
          }
          Ok(TitleBundle { detail: None, .. }) => not_found = Some("Drama tidak ditemukan"),
          Err(e) => {
            let msg = format!("Gagal memuat detail: {:#}", e);
            view.error = Some(msg.clone());
            error = Some(msg);
          }
        }
      }
      View::Watch(view) if view.book_id == book_id => match result {
        Ok(TitleBundle { detail: None, .. }) => not_found = Some("Drama tidak ditemukan"),
        Ok(bundle) if bundle.episodes.is_empty() => not_found = Some("Belum ada episode untuk drama ini"),
        Ok(bundle) => {
          view.set_title(bundle);
          launch_player = true;
        }
        Err(e) => {
          view.loading = false;
          error = Some(format!("Gagal memuat episode: {:#}", e));
        }
      },
      _ => debug!(book_id, "title: result for inactive view dropped"),
    }
    if let Some(msg) = not_found {
      self.view = View::NotFound(msg.to_string());
    }
    if let Some(msg) = error {
      self.set_error(msg);
    }
    if launch_player {
      self.launch_player();
    }
  }

  fn fetch_popular(&mut self) {
    let client = self.client.clone();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(client.popular_searches().await);
    });
    self.tasks.popular = Some(rx);
  }

  fn launch_player(&mut self) {
    let path = self.mpv_path.clone();
    let volume = self.config.volume.unwrap_or(1.0);
    self.status_message = Some("Membuka pemutar…".to_string());
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(MpvElement::spawn(&path, volume).await);
    });
    self.tasks.player = Some(rx);
  }

  pub async fn check_pending(&mut self) -> Result<()> {
    if let Some(mut pending) = self.tasks.listing.take() {
      match pending.rx.try_recv() {
        Ok(result) => {
          let result = result.map(Arc::new);
          if let Ok(items) = &result {
            self.cache.insert(pending.key.clone(), Arc::clone(items), Instant::now());
          }
          self.deliver_listing(&pending.key, result);
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.tasks.listing = Some(pending);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.deliver_listing(&pending.key, Err(anyhow!("listing task failed")));
        }
      }
    }

    for mut pending in std::mem::take(&mut self.tasks.home) {
      match pending.rx.try_recv() {
        Ok(result) => {
          let result = result.map(Arc::new);
          if let Ok(items) = &result {
            self.cache.insert(pending.key.clone(), Arc::clone(items), Instant::now());
          }
          self.deliver_listing(&pending.key, result);
        }
        Err(oneshot::error::TryRecvError::Empty) => self.tasks.home.push(pending),
        Err(oneshot::error::TryRecvError::Closed) => {
          self.deliver_listing(&pending.key, Err(anyhow!("listing task failed")));
        }
      }
    }

    if let Some(mut pending) = self.tasks.title.take() {
      match pending.rx.try_recv() {
        Ok(result) => self.deliver_title(&pending.book_id, result),
        Err(oneshot::error::TryRecvError::Empty) => {
          self.tasks.title = Some(pending);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.deliver_title(&pending.book_id, Err(anyhow!("title task failed")));
        }
      }
    }

    if let Some(mut rx) = self.tasks.popular.take() {
      match rx.try_recv() {
        Ok(result) => {
          if let View::Search(view) = &mut self.view {
            view.popular_loading = false;
            match result {
              Ok(terms) => view.popular = terms,
              Err(e) => warn!(err = %format!("{:#}", e), "search: popular terms unavailable"),
            }
          }
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.tasks.popular = Some(rx);
        }
        Err(oneshot::error::TryRecvError::Closed) => {}
      }
    }

    if let Some(mut rx) = self.tasks.player.take() {
      match rx.try_recv() {
        Ok(Ok(element)) => {
          self.status_message = None;
          let quality = self.config.preferred_quality.unwrap_or(constants().default_quality);
          let volume = self.config.volume.unwrap_or(1.0);
          let chain = fullscreen_chain(self.config.fullscreen.as_deref());
          if let View::Watch(view) = &mut self.view {
            view.player = Some(PlaybackController::new(element, quality, volume, chain, Instant::now()));
            let index = view.index;
            self.play_episode(index).await;
          }
        }
        Ok(Err(e)) => {
          self.status_message = None;
          self.set_error(format!("Gagal membuka pemutar: {:#}", e));
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.tasks.player = Some(rx);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.status_message = None;
          self.set_error("Pemutar gagal dimulai.".to_string());
        }
      }
    }

    Ok(())
  }

  /// Per-frame housekeeping: expire errors and drain player events.
  pub async fn tick(&mut self) {
    self.expire_error();
    if let View::Watch(view) = &mut self.view
      && let Some(player) = view.player.as_mut()
    {
      player.pump(Instant::now()).await;
    }
  }

  // --- Listing actions ---

  pub fn reload_listing(&mut self) {
    let key = match &mut self.view {
      View::Listing(view) => {
        view.loading = true;
        view.error = None;
        view.key.clone()
      }
      _ => return,
    };
    self.clear_error();
    self.cache.invalidate(&key);
    self.fetch_listing(key);
  }

  /// Move to another API page of a category listing. Filters start over.
  pub fn change_api_page(&mut self, delta: i32) {
    let (key, sort) = match &self.view {
      View::Listing(view) if matches!(view.key.source, ListingSource::Category(_)) => {
        let page = view.key.page.saturating_add_signed(delta).max(1);
        if page == view.key.page {
          return;
        }
        (ListingKey::new(view.key.source.clone(), page), view.filter.sort)
      }
      _ => return,
    };
    info!(key = ?key, "listing: api page");
    self.view = View::Listing(ListingView::new(key.clone(), sort));
    self.fetch_listing(key);
  }

  pub fn cycle_sort(&mut self) {
    let View::Listing(view) = &mut self.view else { return };
    view.filter.set_sort(view.filter.sort.next());
    view.refresh();
    self.config.sort = Some(view.filter.sort.config_name().to_string());
    self.config.save();
  }

  // --- Watch actions ---

  /// Load episode `index` into the player.
  pub async fn play_episode(&mut self, index: usize) {
    let preferred = self.config.preferred_quality;
    let outcome = {
      let View::Watch(view) = &mut self.view else { return };
      let Some(episode) = view.episodes.get(index) else { return };
      let stream = episode_stream(episode, preferred);
      let locked = episode.locked;
      view.index = index;
      view.quality_menu = None;
      view.episode_list = None;
      match (stream, view.player.as_mut()) {
        (Some((url, quality)), Some(player)) => {
          info!(episode = index + 1, quality, "watch: playing episode");
          player.load(url, quality).await;
          player.play().await;
          Ok(())
        }
        // Starts once the player is up.
        (Some(_), None) => Ok(()),
        (None, _) if locked => Err("Episode ini terkunci".to_string()),
        (None, _) => Err("Stream episode tidak tersedia".to_string()),
      }
    };
    if let Err(msg) = outcome {
      self.set_error(msg);
    }
  }

  pub async fn next_episode(&mut self) {
    if let View::Watch(view) = &self.view
      && view.has_next()
    {
      let index = view.index + 1;
      self.play_episode(index).await;
    }
  }

  pub async fn previous_episode(&mut self) {
    if let View::Watch(view) = &self.view
      && view.has_previous()
    {
      let index = view.index - 1;
      self.play_episode(index).await;
    }
  }

  /// Jump to episode `index` from the list. Locked episodes are refused.
  pub async fn jump_to_episode(&mut self, index: usize) {
    let locked = match &self.view {
      View::Watch(view) => match view.episodes.get(index) {
        Some(episode) => episode.locked,
        None => {
          self.set_error(format!("Episode {} tidak ada", index + 1));
          return;
        }
      },
      _ => return,
    };
    if locked {
      self.set_error("Episode ini terkunci".to_string());
      return;
    }
    self.play_episode(index).await;
  }

  pub async fn select_quality(&mut self, tier: u32) {
    let switched = {
      let View::Watch(view) = &mut self.view else { return };
      view.quality_menu = None;
      let Some(episode) = view.current().cloned() else { return };
      let Some(player) = view.player.as_mut() else { return };
      if player.state().quality == tier {
        return;
      }
      player.set_quality(tier, &episode, Instant::now()).await
    };
    if switched {
      self.config.preferred_quality = Some(tier);
      self.config.save();
    } else {
      self.set_error(format!("Kualitas {} tidak tersedia", constants().quality_label(tier)));
    }
  }

  pub async fn player_intent(&mut self, intent: PlayerIntent) {
    let View::Watch(view) = &mut self.view else { return };
    let Some(player) = view.player.as_mut() else { return };
    player.interact(Instant::now());
    player.apply_intent(intent).await;
    if let PlayerIntent::VolumeStep(_) = intent {
      self.config.volume = Some(player.state().volume);
      self.config.save();
    }
  }

  pub async fn retry_playback(&mut self) {
    if let View::Watch(view) = &mut self.view
      && let Some(player) = view.player.as_mut()
      && player.phase() == PlaybackPhase::Error
    {
      player.retry().await;
      player.play().await;
    }
  }

  /// Show the player controls after any key press in the watch view.
  pub fn touch_player(&mut self) {
    if let View::Watch(view) = &mut self.view
      && let Some(player) = view.player.as_mut()
    {
      player.interact(Instant::now());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{CdnEntry, StreamVariant};
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn item(name: &str, episodes: u32, tags: &[&str]) -> CatalogItem {
    CatalogItem {
      id: name.to_lowercase(),
      name: name.to_string(),
      episode_count: episodes,
      tags: tags.iter().map(|t| t.to_string()).collect(),
      ..CatalogItem::default()
    }
  }

  fn listing_with(n: usize) -> ListingView {
    let mut view =
      ListingView::new(ListingKey::new(ListingSource::Tag("Romantis".into()), 1), SortKey::Relevance);
    let items = (0..n).map(|i| item(&format!("Drama {:02}", i), i as u32, &["Romantis"])).collect();
    view.set_items(Arc::new(items));
    view
  }

  fn episode(index: u32, variants: &[(u32, bool)], locked: bool) -> EpisodeRecord {
    EpisodeRecord {
      id: format!("ep{}", index),
      name: format!("EP {}", index),
      index,
      cdns: vec![CdnEntry {
        domain: "cdn".into(),
        is_default: true,
        variants: variants
          .iter()
          .map(|(q, d)| StreamVariant { quality: *q, url: format!("https://cdn/{}/{}.mp4", index, q), is_default: *d })
          .collect(),
      }],
      locked,
      thumbnail: None,
    }
  }

  // --- ListingView ---

  #[test]
  fn listing_view_pages_and_ranks() {
    let mut view = listing_with(25);
    assert_eq!(view.listing().page_count, 2);
    assert_eq!(view.listing().items.len(), 18);
    assert_eq!(view.rank_of(0), 1);

    view.next_page();
    assert_eq!(view.listing().page, 2);
    assert_eq!(view.listing().items.len(), 7);
    assert_eq!(view.rank_of(0), 19);
    assert_eq!(view.selected_item().map(|i| i.name.as_str()), Some("Drama 18"));

    // Already on the last page.
    view.next_page();
    assert_eq!(view.listing().page, 2);
  }

  #[test]
  fn listing_view_filter_change_resets_page_and_clamps_selection() {
    let mut view = listing_with(25);
    view.next_page();
    view.list_state.select(Some(6));
    view.cycle_range(); // 1-30 episodes: drops the 0-episode item
    assert_eq!(view.listing().page, 1);
    assert_eq!(view.listing().total_items, 24);
    assert_eq!(view.list_state.selected(), Some(6));

    view.toggle_tag_at_cursor();
    assert!(view.filter.is_tag_selected("Romantis"));
    view.clear_filters();
    assert!(view.filter.selected_tags.is_empty());
    assert_eq!(view.listing().total_items, 25);
  }

  #[test]
  fn listing_view_selection_wraps() {
    let mut view = listing_with(3);
    view.select_prev();
    assert_eq!(view.list_state.selected(), Some(2));
    view.select_next();
    assert_eq!(view.list_state.selected(), Some(0));
  }

  #[test]
  fn empty_listing_has_no_selection() {
    let view = listing_with(0);
    assert_eq!(view.listing().page_count, 0);
    assert!(view.selected_item().is_none());
  }

  #[test]
  fn ranks_only_for_tag_and_trending() {
    assert!(listing_with(1).shows_ranks());
    let search = ListingView::new(ListingKey::new(ListingSource::Search("ceo".into()), 1), SortKey::Relevance);
    assert!(!search.shows_ranks());
    let trending =
      ListingView::new(ListingKey::new(ListingSource::Category(Category::Trending), 1), SortKey::Relevance);
    assert!(trending.shows_ranks());
  }

  // --- Watch helpers ---

  #[test]
  fn episode_index_from_deep_link() {
    assert_eq!(resolve_episode_index(1, 10), 0);
    assert_eq!(resolve_episode_index(10, 10), 9);
    assert_eq!(resolve_episode_index(11, 10), 0);
    assert_eq!(resolve_episode_index(0, 10), 0);
    assert_eq!(resolve_episode_index(3, 0), 0);
  }

  #[test]
  fn episode_stream_prefers_remembered_tier() {
    let ep = episode(1, &[(1080, false), (720, true), (540, false)], false);
    assert_eq!(episode_stream(&ep, None), Some(("https://cdn/1/720.mp4".to_string(), 720)));
    assert_eq!(episode_stream(&ep, Some(540)), Some(("https://cdn/1/540.mp4".to_string(), 540)));
    // Unknown tier falls back to the default variant.
    assert_eq!(episode_stream(&ep, Some(144)), Some(("https://cdn/1/720.mp4".to_string(), 720)));
  }

  #[test]
  fn locked_episode_without_stream_has_none() {
    let mut ep = episode(2, &[], true);
    ep.cdns.clear();
    assert_eq!(episode_stream(&ep, None), None);
  }

  #[test]
  fn watch_view_navigation_bounds() {
    let mut view = WatchView::new("b1".into(), 3);
    view.set_title(TitleBundle {
      detail: None,
      episodes: vec![
        episode(1, &[(720, true)], false),
        episode(2, &[(720, true)], false),
        episode(3, &[(720, true)], true),
      ],
    });
    assert_eq!(view.index, 2);
    assert!(view.has_previous());
    assert!(!view.has_next());
    assert_eq!(view.route(), Route::Watch { book_id: "b1".into(), episode: 3 });
    assert_eq!(view.qualities(), vec![720]);
    assert_eq!(view.phase(), PlaybackPhase::Idle);
  }

  #[test]
  fn view_routes_for_history() {
    assert_eq!(View::NotFound("x".into()).route(), None);
    assert_eq!(View::Search(SearchView::new()).route(), Some(Route::Search));
    let listing = View::Listing(listing_with(1));
    assert_eq!(listing.route(), Some(Route::Listing(ListingSource::Tag("Romantis".into()))));
  }

  #[test]
  fn tags_view_starts_with_curated_tags() {
    let view = TagsView::new();
    assert_eq!(view.tags, constants().popular_tags);
    assert_eq!(view.selected(), constants().popular_tags.first().map(String::as_str));
  }

  #[test]
  fn detail_episode_count_falls_back_to_catalog_field() {
    let mut view = DetailView::new("b1".into());
    view.detail = Some(DramaDetail { item: item("A", 42, &["CEO", "Romantis"]), ..DramaDetail::default() });
    assert_eq!(view.episode_count(), 42);
    view.episodes = vec![episode(1, &[(720, true)], false)];
    assert_eq!(view.episode_count(), 1);

    assert_eq!(view.selected_tag(), Some("CEO"));
    view.move_tag_cursor(false);
    assert_eq!(view.selected_tag(), Some("Romantis"));
  }

  // --- Home ---

  fn titles(names: &[&str]) -> Arc<Vec<CatalogItem>> {
    Arc::new(names.iter().map(|n| item(n, 10, &[])).collect())
  }

  #[test]
  fn home_featured_prefers_trending_then_for_you() {
    let mut home = HomeView::new();
    assert!(home.loading());
    assert!(home.featured().is_none());

    home.set_row(Category::ForYou, Ok(titles(&["Pilihan"])));
    assert_eq!(home.featured().map(|i| i.name.as_str()), Some("Pilihan"));
    home.set_row(Category::Trending, Ok(titles(&["Populer"])));
    assert_eq!(home.featured().map(|i| i.name.as_str()), Some("Populer"));
  }

  #[test]
  fn home_navigation_skips_empty_rows() {
    let mut home = HomeView::new();
    home.set_row(Category::Trending, Ok(titles(&[])));
    home.set_row(Category::ForYou, Err("503".into()));
    home.set_row(Category::Latest, Ok(titles(&["L1", "L2"])));
    home.set_row(Category::DubIndo, Ok(titles(&[])));
    home.set_row(Category::Random, Ok(titles(&["R1"])));

    // Cursor snaps to the first row with titles.
    assert_eq!(home.selected_row().map(|r| r.category), Some(Category::Latest));
    home.move_item(true);
    home.move_item(true);
    assert_eq!(home.selected_item().map(|i| i.name.as_str()), Some("L2"));

    home.move_row(true);
    assert_eq!(home.selected_row().map(|r| r.category), Some(Category::Random));
    home.move_row(true);
    assert_eq!(home.selected_row().map(|r| r.category), Some(Category::Random));
    home.move_row(false);
    assert_eq!(home.selected_row().map(|r| r.category), Some(Category::Latest));
    assert!(!home.is_empty());
  }

  #[test]
  fn home_is_empty_once_every_row_settles_without_titles() {
    let mut home = HomeView::new();
    for category in HOME_ROWS {
      assert!(!home.is_empty());
      home.set_row(category, Err("offline".into()));
    }
    assert!(home.is_empty());
    assert!(home.selected_item().is_none());
  }

  // --- Listing fetch ordering ---

  fn test_app(server: &MockServer) -> App {
    App::new(CatalogClient::new(&server.uri()).unwrap(), Config::default(), "mpv".into())
  }

  fn key(category: Category) -> ListingKey {
    ListingKey::new(ListingSource::Category(category), 1)
  }

  async fn mount_titles(server: &MockServer, endpoint: &str, name: &str, delay_ms: u64) {
    Mock::given(method("GET"))
      .and(path(endpoint))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"data": [{"bookId": name, "bookName": name}]}))
          .set_delay(Duration::from_millis(delay_ms)),
      )
      .mount(server)
      .await;
  }

  fn listing_names(app: &App) -> Vec<String> {
    match &app.view {
      View::Listing(view) => view.items.iter().map(|i| i.name.clone()).collect(),
      _ => Vec::new(),
    }
  }

  /// Poll background results until `done` holds.
  async fn settle(app: &mut App, done: impl Fn(&App) -> bool) {
    for _ in 0..300 {
      app.check_pending().await.unwrap();
      if done(app) {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background results never arrived");
  }

  #[tokio::test]
  async fn newer_listing_wins_over_slow_older_one() {
    let server = MockServer::start().await;
    mount_titles(&server, "/trending", "lambat", 400).await;
    mount_titles(&server, "/latest", "cepat", 0).await;
    let mut app = test_app(&server);

    app.open(Route::Listing(ListingSource::Category(Category::Trending))).await;
    app.open(Route::Listing(ListingSource::Category(Category::Latest))).await;
    assert_eq!(app.tasks.listing.as_ref().map(|p| p.key.clone()), Some(key(Category::Latest)));

    settle(&mut app, |app| !listing_names(app).is_empty()).await;
    assert_eq!(listing_names(&app), vec!["cepat"]);

    // The superseded request was aborted: nothing lands or gets cached later.
    tokio::time::sleep(Duration::from_millis(500)).await;
    app.check_pending().await.unwrap();
    assert_eq!(listing_names(&app), vec!["cepat"]);
    assert!(app.cache.get(&key(Category::Trending), Instant::now()).is_none());
    assert!(app.tasks.listing.is_none());
  }

  #[tokio::test]
  async fn same_key_fetch_is_not_repeated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/latest"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"bookId": "1", "bookName": "Satu"}])))
      .expect(1)
      .mount(&server)
      .await;
    let mut app = test_app(&server);

    app.open(Route::Listing(ListingSource::Category(Category::Latest))).await;
    app.fetch_listing(key(Category::Latest));
    settle(&mut app, |app| !listing_names(app).is_empty()).await;
    assert_eq!(listing_names(&app), vec!["Satu"]);

    // Coming back is served from the cache.
    app.open(Route::Search).await;
    app.back().await;
    assert_eq!(listing_names(&app), vec!["Satu"]);
    server.verify().await;
  }

  #[tokio::test]
  async fn result_for_another_key_is_dropped() {
    let server = MockServer::start().await;
    let mut app = test_app(&server);
    app.view = View::Listing(ListingView::new(key(Category::Latest), SortKey::Relevance));

    app.deliver_listing(&key(Category::Trending), Ok(titles(&["Lain"])));
    let View::Listing(view) = &app.view else { panic!("listing view expected") };
    assert!(view.loading);
    assert!(view.items.is_empty());
  }

  #[tokio::test]
  async fn cached_listing_is_not_overwritten_by_stale_request() {
    let server = MockServer::start().await;
    mount_titles(&server, "/trending", "lambat", 300).await;
    let mut app = test_app(&server);
    app.cache.insert(key(Category::Latest), titles(&["tersimpan"]), Instant::now());

    app.open(Route::Listing(ListingSource::Category(Category::Trending))).await;
    app.open(Route::Listing(ListingSource::Category(Category::Latest))).await;
    assert_eq!(listing_names(&app), vec!["tersimpan"]);
    assert!(app.tasks.listing.is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;
    app.check_pending().await.unwrap();
    assert_eq!(listing_names(&app), vec!["tersimpan"]);
  }

  #[tokio::test]
  async fn home_rows_load_concurrently_through_the_cache() {
    let server = MockServer::start().await;
    for (endpoint, name) in
      [("/trending", "T"), ("/foryou", "F"), ("/latest", "L"), ("/dubindo", "D"), ("/randomdrama", "R")]
    {
      mount_titles(&server, endpoint, name, 100).await;
    }
    let mut app = test_app(&server);
    app.open(Route::Home).await;
    assert_eq!(app.tasks.home.len(), HOME_ROWS.len());

    settle(&mut app, |app| matches!(&app.view, View::Home(home) if home.rows.iter().all(|r| !r.loading))).await;
    let View::Home(home) = &app.view else { panic!("home view expected") };
    assert_eq!(home.featured().map(|i| i.name.as_str()), Some("T"));
    assert!(app.tasks.home.is_empty());

    // Opening a category the home view already fetched is a cache hit.
    app.open(Route::Listing(ListingSource::Category(Category::Latest))).await;
    assert_eq!(listing_names(&app), vec!["L"]);
    assert!(app.tasks.listing.is_none());
  }

  #[tokio::test]
  async fn back_with_empty_history_goes_home() {
    let server = MockServer::start().await;
    let mut app = test_app(&server);
    app.open(Route::Search).await;
    app.back().await;
    assert_eq!(app.view.route(), Some(Route::Home));
  }
}
