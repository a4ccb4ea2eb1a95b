mod app;
mod catalog;
mod config;
mod constants;
mod input;
mod mpv;
mod pipeline;
mod player;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use directories::ProjectDirs;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::{App, Route};
use catalog::{CatalogClient, Category, ListingSource};
use config::Config;
use constants::constants;
use input::handle_key_event;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Open a category listing: trending, latest, foryou, random, dubindo or vip
  #[arg(short, long, conflicts_with_all = ["search", "tag", "watch"])]
  category: Option<String>,

  /// Open search results for a query
  #[arg(short, long, conflicts_with_all = ["tag", "watch"])]
  search: Option<String>,

  /// Open the listing for a tag
  #[arg(short, long, conflicts_with = "watch")]
  tag: Option<String>,

  /// Start watching a title by its id
  #[arg(short, long)]
  watch: Option<String>,

  /// Episode to start from (1-based), used with --watch
  #[arg(short, long, default_value_t = 1, requires = "watch")]
  episode: u32,

  /// Override the catalog API base URL
  #[arg(long)]
  api_base_url: Option<String>,

  /// Path to the mpv binary
  #[arg(long)]
  mpv_path: Option<String>,

  /// Print shell completions and exit
  #[arg(long, value_name = "SHELL")]
  completions: Option<Shell>,
}

impl Args {
  fn initial_route(&self) -> Route {
    if let Some(book_id) = &self.watch {
      return Route::Watch { book_id: book_id.clone(), episode: self.episode.max(1) };
    }
    if let Some(query) = &self.search {
      return Route::Listing(ListingSource::Search(query.clone()));
    }
    if let Some(tag) = &self.tag {
      return Route::Listing(ListingSource::Tag(tag.clone()));
    }
    match &self.category {
      Some(slug) => match Category::from_slug(slug) {
        Some(category) => Route::Listing(ListingSource::Category(category)),
        None => Route::NotFound(format!("Kategori \"{}\" tidak ditemukan", slug)),
      },
      None => Route::Home,
    }
  }
}

// --- Logging ---

/// Log to a daily file; the terminal belongs to the UI.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let dirs = ProjectDirs::from("", "", "drama")?;
  let log_dir = dirs.data_dir().join("logs");
  std::fs::create_dir_all(&log_dir).ok()?;

  let appender = tracing_appender::rolling::daily(log_dir, "drama.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("DRAMA_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Some(guard)
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(shell) = args.completions {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    return Ok(());
  }

  let _guard = init_logging();

  let config = Config::load();
  let base_url = args
    .api_base_url
    .clone()
    .or_else(|| config.api_base_url.clone())
    .unwrap_or_else(|| constants().api_base_url.clone());
  let mpv_path = args.mpv_path.clone().unwrap_or_else(|| constants().mpv_binary.clone());
  let client = CatalogClient::new(&base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;
  info!(%base_url, %mpv_path, "starting");

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut app = App::new(client, config, mpv_path);
  app.open(args.initial_route()).await;

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, &mut app).await;
  ratatui::restore();
  app.shutdown().await;
  result
}

async fn run(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
  loop {
    app.check_pending().await?;
    app.tick().await;

    terminal.draw(|frame| ui::ui(frame, app))?;

    if event::poll(Duration::from_millis(100))? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          handle_key_event(app, key).await?;
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(argv: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("drama").chain(argv.iter().copied())).unwrap()
  }

  #[test]
  fn default_route_is_home() {
    assert_eq!(parse(&[]).initial_route(), Route::Home);
  }

  #[test]
  fn watch_route_carries_episode() {
    let args = parse(&["--watch", "41000102", "--episode", "3"]);
    assert_eq!(args.initial_route(), Route::Watch { book_id: "41000102".into(), episode: 3 });
  }

  #[test]
  fn unknown_category_is_not_found() {
    match parse(&["--category", "horror"]).initial_route() {
      Route::NotFound(msg) => assert!(msg.contains("horror")),
      other => panic!("unexpected route {:?}", other),
    }
  }

  #[test]
  fn search_and_tag_routes() {
    assert_eq!(parse(&["-s", "ceo"]).initial_route(), Route::Listing(ListingSource::Search("ceo".into())));
    assert_eq!(parse(&["-t", "Romansa"]).initial_route(), Route::Listing(ListingSource::Tag("Romansa".into())));
  }

  #[test]
  fn episode_requires_watch() {
    assert!(Args::try_parse_from(["drama", "--episode", "2"]).is_err());
  }

  #[test]
  fn cli_definition_is_valid() {
    Args::command().debug_assert();
  }
}
