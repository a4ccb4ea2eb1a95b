use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, BorderType, Clear, Gauge, List, ListItem, Padding, Paragraph, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::{App, DetailView, HomeRow, HomeView, ListingFocus, ListingView, SearchView, TagsView, View, WatchView};
use crate::catalog::ListingSource;
use crate::constants::constants;
use crate::pipeline::PageMarker;
use crate::player::{PlaybackPhase, format_time};
use crate::theme::{THEME, Theme};

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` columns, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.width() <= max_width {
    return s.to_string();
  }
  let limit = max_width.saturating_sub(1);
  let mut used = 0;
  let mut out = String::new();
  for c in s.chars() {
    let w = c.width().unwrap_or(0);
    if used + w > limit {
      break;
    }
    used += w;
    out.push(c);
  }
  out.push('…');
  out
}

fn bordered<'a>(title: impl Into<Line<'a>>, theme: &Theme) -> Block<'a> {
  Block::bordered()
    .title(title)
    .title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(theme.border))
}

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
  let width = width.min(area.width);
  let height = height.min(area.height);
  Rect { x: area.x + (area.width - width) / 2, y: area.y + (area.height - height) / 2, width, height }
}

fn view_title(view: &View) -> String {
  match view {
    View::Home(_) => "Beranda".to_string(),
    View::Listing(v) => v.key.source.title(),
    View::Detail(v) => v.detail.as_ref().map_or_else(|| "Detail".to_string(), |d| d.item.name.clone()),
    View::Watch(v) => if v.title.is_empty() { "Tonton".to_string() } else { v.title.clone() },
    View::AllTags(_) => "Semua Tag".to_string(),
    View::Search(_) => "Cari".to_string(),
    View::NotFound(_) => "Tidak ditemukan".to_string(),
  }
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  let theme = &THEME;
  frame.render_widget(Block::default().style(Style::default().bg(theme.bg)), frame.area());

  let [header_area, main_area, status_area, footer_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1), Constraint::Length(1)])
      .areas(frame.area());

  render_header(frame, app, header_area);
  match &mut app.view {
    View::Home(view) => render_home(frame, view, main_area),
    View::Listing(view) => render_listing(frame, view, main_area),
    View::Detail(view) => render_detail(frame, view, main_area),
    View::Watch(view) => render_watch(frame, view, main_area),
    View::AllTags(view) => render_tags(frame, view, main_area),
    View::Search(view) => render_search(frame, view, main_area),
    View::NotFound(msg) => render_not_found(frame, msg, main_area),
  }
  render_status(frame, app, status_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
  let theme = &THEME;
  let left = Line::from(vec![
    Span::styled(" ▶ drama ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
    Span::styled(format!("› {}", view_title(&app.view)), Style::default().fg(theme.muted)),
  ]);
  frame.render_widget(left, area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(theme.muted)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

/// Card label width on a home row.
const CARD_WIDTH: usize = 24;

/// First card to draw so that `cursor` still fits in `avail` columns (cards are one column apart).
fn strip_start(widths: &[usize], cursor: usize, avail: usize) -> usize {
  let Some(&w) = widths.get(cursor) else { return 0 };
  let mut start = cursor;
  let mut used = w;
  while start > 0 && used + 1 + widths[start - 1] <= avail {
    start -= 1;
    used += 1 + widths[start];
  }
  start
}

fn render_home(frame: &mut Frame, view: &HomeView, area: Rect) {
  let theme = &THEME;
  if view.loading() || view.is_empty() {
    let (msg, color) = if view.loading() {
      ("Memuat…", theme.status)
    } else {
      ("Gagal memuat beranda. Tekan r untuk mencoba lagi.", theme.error)
    };
    let p = Paragraph::new(vec![Line::from(""), Line::from(Span::styled(msg, Style::default().fg(color)))])
      .alignment(Alignment::Center)
      .block(bordered(" Beranda ", theme));
    frame.render_widget(p, area);
    return;
  }

  let [hero_area, rows_area] = Layout::vertical([Constraint::Length(7), Constraint::Min(3)]).areas(area);

  let hero_block = bordered(" Pilihan Utama ", theme).padding(Padding::horizontal(1));
  let hero = match view.featured() {
    Some(item) => {
      let mut lines = vec![Line::from(Span::styled(
        item.name.as_str(),
        Style::default().fg(theme.fg).add_modifier(Modifier::BOLD),
      ))];
      let tags: Vec<Span> = item
        .tags
        .iter()
        .take(3)
        .flat_map(|t| {
          [Span::styled(format!(" #{} ", t), Style::default().fg(theme.fg).bg(theme.stripe_bg)), Span::raw(" ")]
        })
        .collect();
      if !tags.is_empty() {
        lines.push(Line::from(tags));
      }
      lines.push(Line::from(Span::styled(item.introduction.as_str(), Style::default().fg(theme.muted))));
      let mut meta = Vec::new();
      if let Some(plays) = &item.play_count {
        meta.push(format!("{} Ditonton", plays));
      }
      meta.push(format!("{} Episode", item.episode_count));
      lines.push(Line::from(Span::styled(meta.join(" · "), Style::default().fg(theme.status))));
      Paragraph::new(lines).wrap(Wrap { trim: true })
    }
    None => Paragraph::new(Span::styled("Belum ada judul pilihan.", Style::default().fg(theme.muted))),
  };
  frame.render_widget(hero.block(hero_block), hero_area);

  let rows_block = bordered(" Beranda ", theme).padding(Padding::horizontal(1));
  let inner = rows_block.inner(rows_area);
  frame.render_widget(rows_block, rows_area);

  let visible: Vec<(usize, &HomeRow)> =
    view.rows.iter().enumerate().filter(|(_, r)| !r.items.is_empty()).collect();
  // Three lines per row: heading, cards, spacer.
  let fit = (inner.height as usize / 3).max(1);
  let selected = visible.iter().position(|(i, _)| *i == view.row_cursor).unwrap_or(0);
  let first = (selected + 1).saturating_sub(fit);
  let avail = inner.width as usize;

  let mut lines = Vec::new();
  for (i, row) in visible.iter().skip(first).take(fit) {
    let active = *i == view.row_cursor;
    let heading_style =
      if active { Style::default().fg(theme.accent).add_modifier(Modifier::BOLD) } else { Style::default().fg(theme.fg) };
    lines.push(Line::from(vec![
      Span::styled(row.category.title(), heading_style),
      Span::styled(format!("  {}", row.category.subtitle()), Style::default().fg(theme.muted)),
    ]));

    let labels: Vec<String> = row.items.iter().map(|item| format!(" {} ", truncate_str(&item.name, CARD_WIDTH))).collect();
    let widths: Vec<usize> = labels.iter().map(|l| l.width()).collect();
    let start = strip_start(&widths, row.cursor, avail);
    let mut used = 0;
    let mut cards = Vec::new();
    for (j, label) in labels.iter().enumerate().skip(start) {
      if used + widths[j] > avail {
        break;
      }
      let style = if active && j == row.cursor {
        Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg)
      } else {
        Style::default().fg(theme.fg).bg(theme.stripe_bg)
      };
      cards.push(Span::styled(label.clone(), style));
      cards.push(Span::raw(" "));
      used += widths[j] + 1;
    }
    lines.push(Line::from(cards));
    lines.push(Line::from(""));
  }
  frame.render_widget(Paragraph::new(lines), inner);
}

fn render_listing(frame: &mut Frame, view: &mut ListingView, area: Rect) {
  let theme = &THEME;
  let [filter_area, tags_area, list_area, pages_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Length(3), Constraint::Min(3), Constraint::Length(1)])
      .areas(area);

  let listing = view.listing();
  let mut filter_spans = vec![
    Span::styled(" Urutkan ", Style::default().fg(theme.muted)),
    Span::styled(view.filter.sort.label(), Style::default().fg(theme.fg)),
    Span::styled("  Episode ", Style::default().fg(theme.muted)),
    Span::styled(view.filter.range.label(), Style::default().fg(theme.fg)),
    Span::styled(format!("  {} judul", listing.total_items), Style::default().fg(theme.muted)),
  ];
  if let ListingSource::Category(category) = view.key.source {
    filter_spans.push(Span::styled(
      format!("  {} · halaman API {}", category.subtitle(), view.key.page),
      Style::default().fg(theme.muted),
    ));
  }
  frame.render_widget(Line::from(filter_spans), filter_area);

  let tags_focused = view.focus == ListingFocus::Tags;
  let chips: Vec<Span> = listing
    .available_tags
    .iter()
    .enumerate()
    .flat_map(|(i, tag)| {
      let selected = view.filter.is_tag_selected(tag);
      let mut style = if selected {
        Style::default().fg(theme.highlight_fg).bg(theme.accent)
      } else {
        Style::default().fg(theme.fg).bg(theme.stripe_bg)
      };
      if tags_focused && i == view.tag_cursor {
        style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
      }
      [Span::styled(format!(" {} ", tag), style), Span::raw(" ")]
    })
    .collect();
  let tags_border = if tags_focused { theme.accent } else { theme.border };
  let tags_block = Block::bordered()
    .title(" Tag ")
    .title_style(Style::default().fg(tags_border))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(tags_border));
  frame.render_widget(Paragraph::new(Line::from(chips)).block(tags_block), tags_area);

  let block = bordered(format!(" {} ", view.key.source.title()), theme);
  if view.loading {
    let p = Paragraph::new("Memuat…").style(Style::default().fg(theme.status)).alignment(Alignment::Center);
    frame.render_widget(p.block(block), list_area);
    return;
  }
  if let Some(err) = &view.error {
    let text = vec![
      Line::from(Span::styled(err.as_str(), Style::default().fg(theme.error))),
      Line::from(""),
      Line::from(Span::styled("Tekan r untuk mencoba lagi.", Style::default().fg(theme.muted))),
    ];
    frame.render_widget(Paragraph::new(text).alignment(Alignment::Center).block(block), list_area);
    return;
  }
  if listing.items.is_empty() {
    let msg = if view.items.is_empty() { "Tidak ada judul." } else { "Tidak ada judul yang cocok dengan filter." };
    let p = Paragraph::new(msg).style(Style::default().fg(theme.muted)).alignment(Alignment::Center);
    frame.render_widget(p.block(block), list_area);
    return;
  }

  // Inner width: area minus 2 borders minus 2 chars for highlight symbol ("▶ ")
  let inner_w = list_area.width.saturating_sub(4) as usize;
  let shows_ranks = view.shows_ranks();
  let items: Vec<ListItem> = listing
    .items
    .iter()
    .enumerate()
    .map(|(i, item)| {
      let bg = if i % 2 == 1 { theme.stripe_bg } else { theme.bg };
      let mut right = format!("{} eps", item.episode_count);
      if let Some(plays) = &item.play_count {
        right.push_str(&format!(" · {}", plays));
      }
      if let Some(tag) = item.tags.first() {
        right.push_str(&format!(" · {}", tag));
      }
      let rank = if shows_ranks { format!("{:>3}. ", view.rank_of(i)) } else { String::new() };
      let badge = item.corner.as_deref().map(|c| format!("[{}] ", c)).unwrap_or_default();
      let left_w = rank.width() + badge.width();
      let right_w = right.width();
      let title = truncate_str(&item.name, inner_w.saturating_sub(left_w + right_w + 2));
      let gap = inner_w.saturating_sub(left_w + title.width() + right_w);
      ListItem::new(Line::from(vec![
        Span::styled(rank, Style::default().fg(theme.accent)),
        Span::styled(badge, Style::default().fg(theme.status)),
        Span::styled(title, Style::default().fg(theme.fg)),
        Span::raw(" ".repeat(gap)),
        Span::styled(right, Style::default().fg(theme.muted)),
      ]))
      .bg(bg)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD));
  let page_count = listing.page_count;
  let page = listing.page;
  frame.render_stateful_widget(list, list_area, &mut view.list_state);

  let mut page_spans = vec![Span::styled(" Halaman ", Style::default().fg(theme.muted))];
  for marker in crate::pipeline::page_window(page, page_count) {
    match marker {
      PageMarker::Page(p) if p == page => page_spans.push(Span::styled(
        format!(" {} ", p),
        Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD),
      )),
      PageMarker::Page(p) => page_spans.push(Span::styled(format!(" {} ", p), Style::default().fg(theme.fg))),
      PageMarker::Gap => page_spans.push(Span::styled(" … ", Style::default().fg(theme.muted))),
    }
  }
  frame.render_widget(Line::from(page_spans), pages_area);
}

fn render_detail(frame: &mut Frame, view: &mut DetailView, area: Rect) {
  let theme = &THEME;
  let [info_area, episodes_area] =
    Layout::horizontal([Constraint::Percentage(62), Constraint::Percentage(38)]).areas(area);

  let info_block = bordered(" Detail ", theme).padding(Padding::horizontal(1));
  let Some(detail) = &view.detail else {
    let (msg, color) = match &view.error {
      Some(err) => (err.as_str(), theme.error),
      None => ("Memuat…", theme.status),
    };
    let p = Paragraph::new(msg).style(Style::default().fg(color)).alignment(Alignment::Center);
    frame.render_widget(p.block(info_block), area);
    return;
  };

  let field = |label: &'static str, value: String| {
    Line::from(vec![
      Span::styled(format!("{:<10}", label), Style::default().fg(theme.muted)),
      Span::styled(value, Style::default().fg(theme.fg)),
    ])
  };
  let mut lines = vec![
    Line::from(Span::styled(detail.item.name.as_str(), Style::default().fg(theme.fg).add_modifier(Modifier::BOLD))),
    Line::from(""),
  ];
  if let Some(author) = &detail.author {
    lines.push(field("Penulis", author.clone()));
  }
  if let Some(status) = &detail.status {
    lines.push(field("Status", status.clone()));
  }
  lines.push(field("Episode", view.episode_count().to_string()));
  if let Some(plays) = &detail.item.play_count {
    lines.push(field("Ditonton", plays.clone()));
  }
  if let Some(updated) = &detail.update_time {
    lines.push(field("Diperbarui", updated.clone()));
  }
  lines.push(Line::from(""));

  let tag_spans: Vec<Span> = detail
    .item
    .tags
    .iter()
    .enumerate()
    .flat_map(|(i, tag)| {
      let style = if i == view.tag_cursor {
        Style::default().fg(theme.highlight_fg).bg(theme.accent)
      } else {
        Style::default().fg(theme.fg).bg(theme.stripe_bg)
      };
      [Span::styled(format!(" #{} ", tag), style), Span::raw(" ")]
    })
    .collect();
  if !tag_spans.is_empty() {
    lines.push(Line::from(tag_spans));
    lines.push(Line::from(""));
  }
  lines.push(Line::from(Span::styled(detail.item.introduction.as_str(), Style::default().fg(theme.fg))));

  frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }).block(info_block), info_area);

  let inner_w = episodes_area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = if view.episodes.is_empty() {
    detail
      .chapters
      .iter()
      .map(|c| ListItem::new(episode_line(&c.name, c.locked, inner_w, theme)))
      .collect()
  } else {
    view.episodes.iter().map(|e| ListItem::new(episode_line(&e.name, e.locked, inner_w, theme))).collect()
  };
  let list = List::new(items)
    .block(bordered(format!(" Episode ({}) ", view.episode_count()), theme))
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg));
  frame.render_stateful_widget(list, episodes_area, &mut view.episode_list);
}

fn episode_line<'a>(name: &str, locked: bool, width: usize, theme: &Theme) -> Line<'a> {
  let marker = if locked { "🔒 " } else { "" };
  let color = if locked { theme.locked } else { theme.fg };
  Line::from(Span::styled(
    format!("{}{}", marker, truncate_str(name, width.saturating_sub(marker.width()))),
    Style::default().fg(color),
  ))
}

fn render_watch(frame: &mut Frame, view: &mut WatchView, area: Rect) {
  let theme = &THEME;
  if view.loading {
    let p = Paragraph::new("Memuat episode…").style(Style::default().fg(theme.status)).alignment(Alignment::Center);
    frame.render_widget(p.block(bordered(" Tonton ", theme)), area);
    return;
  }

  let [info_area, controls_area, about_area] =
    Layout::vertical([Constraint::Length(4), Constraint::Length(6), Constraint::Min(0)]).areas(area);

  let current_name = view.current().map(|e| e.name.clone()).unwrap_or_default();
  let nav = |enabled: bool, label: &'static str| {
    Span::styled(label, Style::default().fg(if enabled { theme.fg } else { theme.locked }))
  };
  let info = vec![
    Line::from(Span::styled(view.title.as_str(), Style::default().fg(theme.fg).add_modifier(Modifier::BOLD))),
    Line::from(vec![
      nav(view.has_previous(), "◀ Sebelumnya  "),
      Span::styled(
        format!("Episode {} / {}", view.index + 1, view.episodes.len()),
        Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
      ),
      nav(view.has_next(), "  Selanjutnya ▶"),
    ]),
  ];
  let info_block = bordered(format!(" {} ", current_name), theme).padding(Padding::horizontal(1));
  frame.render_widget(Paragraph::new(info).block(info_block), info_area);

  render_controls(frame, view, controls_area);

  if !view.introduction.is_empty() || !view.tags.is_empty() {
    let mut lines = Vec::new();
    if !view.tags.is_empty() {
      let tags: Vec<String> = view.tags.iter().take(4).map(|t| format!("#{}", t)).collect();
      lines.push(Line::from(Span::styled(tags.join("  "), Style::default().fg(theme.accent))));
    }
    lines.push(Line::from(Span::styled(view.introduction.as_str(), Style::default().fg(theme.muted))));
    let p = Paragraph::new(lines).wrap(Wrap { trim: true }).block(bordered(" Sinopsis ", theme));
    frame.render_widget(p, about_area);
  }

  if let Some(input) = &view.jump_input {
    let popup = popup_area(area, 30, 3);
    frame.render_widget(Clear, popup);
    let p = Paragraph::new(format!("{}▏", input)).block(bordered(" Ke episode ", theme));
    frame.render_widget(p, popup);
  }

  if let Some(cursor) = view.quality_menu {
    let current = view.player.as_ref().map(|p| p.state().quality);
    let tiers = view.qualities();
    let items: Vec<ListItem> = tiers
      .iter()
      .map(|tier| {
        let mark = if Some(*tier) == current { " ✓" } else { "" };
        ListItem::new(format!("{}{}", constants().quality_label(*tier), mark))
      })
      .collect();
    let popup = popup_area(area, 28, tiers.len() as u16 + 2);
    frame.render_widget(Clear, popup);
    let mut state = ratatui::widgets::ListState::default();
    state.select(Some(cursor));
    let list = List::new(items)
      .block(bordered(" Kualitas ", theme))
      .highlight_symbol("▶ ")
      .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg));
    frame.render_stateful_widget(list, popup, &mut state);
  }

  let popup = popup_area(area, 48, area.height.saturating_sub(2));
  let inner_w = popup.width.saturating_sub(4) as usize;
  let episode_items: Vec<ListItem> = view
    .episodes
    .iter()
    .enumerate()
    .map(|(i, e)| ListItem::new(episode_line(&format!("{:>3}. {}", i + 1, e.name), e.locked, inner_w, theme)))
    .collect();
  if let Some(list_state) = view.episode_list.as_mut() {
    frame.render_widget(Clear, popup);
    let list = List::new(episode_items)
      .block(bordered(" Daftar Episode ", theme))
      .highlight_symbol("▶ ")
      .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg));
    frame.render_stateful_widget(list, popup, list_state);
  }
}

fn render_controls(frame: &mut Frame, view: &WatchView, area: Rect) {
  let theme = &THEME;
  let block = bordered(format!(" Pemutar · {} ", view.phase().label()), theme);
  let Some(player) = &view.player else {
    let p = Paragraph::new("Membuka mpv…").style(Style::default().fg(theme.status)).alignment(Alignment::Center);
    frame.render_widget(p.block(block), area);
    return;
  };
  let state = player.state();

  if player.phase() == PlaybackPhase::Error {
    let kind = state.error.as_ref().map(ToString::to_string).unwrap_or_default();
    let text = vec![
      Line::from(Span::styled(format!("⚠  {}", kind), Style::default().fg(theme.error))),
      Line::from(Span::styled("Tekan r untuk mencoba lagi.", Style::default().fg(theme.muted))),
    ];
    frame.render_widget(Paragraph::new(text).alignment(Alignment::Center).block(block), area);
    return;
  }

  let inner = block.inner(area);
  frame.render_widget(block, area);
  if !player.controls_visible() {
    let hint = Paragraph::new("Tekan tombol apa saja untuk menampilkan kontrol")
      .style(Style::default().fg(theme.muted))
      .alignment(Alignment::Center);
    frame.render_widget(hint, inner);
    return;
  }

  let [gauge_area, _, meta_area] =
    Layout::vertical([Constraint::Length(1), Constraint::Length(1), Constraint::Length(2)]).areas(inner);
  let gauge = Gauge::default()
    .gauge_style(Style::default().fg(theme.accent).bg(theme.stripe_bg))
    .ratio(state.progress())
    .label(format!("{} / {}", format_time(state.position), format_time(state.duration)));
  frame.render_widget(gauge, gauge_area);

  let play_icon = if state.paused { "▶" } else { "⏸" };
  let volume = if state.muted { "bisu".to_string() } else { format!("{:.0}%", state.volume * 100.0) };
  let mut meta = vec![
    Span::styled(format!(" {} ", play_icon), Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
    Span::styled(" Volume ", Style::default().fg(theme.muted)),
    Span::styled(volume, Style::default().fg(theme.fg)),
    Span::styled("  Kualitas ", Style::default().fg(theme.muted)),
    Span::styled(constants().quality_label(state.quality), Style::default().fg(theme.fg)),
  ];
  if state.fullscreen {
    meta.push(Span::styled("  layar penuh", Style::default().fg(theme.fg)));
  }
  if state.loading || player.restore_pending() {
    meta.push(Span::styled("  memuat…", Style::default().fg(theme.status)));
  } else if state.buffered > 0.0 {
    meta.push(Span::styled(format!("  buffer +{:.0}s", state.buffered), Style::default().fg(theme.muted)));
  }
  frame.render_widget(Paragraph::new(Line::from(meta)), meta_area);
}

fn render_tags(frame: &mut Frame, view: &mut TagsView, area: Rect) {
  let theme = &THEME;
  let suffix = if view.loading { " (memuat…)" } else { "" };
  let items: Vec<ListItem> = view
    .tags
    .iter()
    .enumerate()
    .map(|(i, tag)| {
      let bg = if i % 2 == 1 { theme.stripe_bg } else { theme.bg };
      ListItem::new(Span::styled(format!("#{}", tag), Style::default().fg(theme.fg))).bg(bg)
    })
    .collect();
  let list = List::new(items)
    .block(bordered(format!(" Semua Tag · {}{} ", view.tags.len(), suffix), theme))
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD));
  frame.render_stateful_widget(list, area, &mut view.list_state);
}

fn render_search(frame: &mut Frame, view: &mut SearchView, area: Rect) {
  let theme = &THEME;
  let [input_area, popular_area] = Layout::vertical([Constraint::Length(3), Constraint::Min(3)]).areas(area);

  let border_color = if view.input_focused { theme.accent } else { theme.border };
  let input_block = Block::bordered()
    .title(" Cari drama ")
    .title_style(Style::default().fg(border_color))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  let inner_w = input_area.width.saturating_sub(4) as usize;
  let cursor_col = display_width(&view.input, view.cursor_position);

  if cursor_col < view.input_scroll {
    view.input_scroll = cursor_col;
  } else if cursor_col >= view.input_scroll + inner_w {
    view.input_scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = view
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = c.width().unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= view.input_scroll)
    .take_while(|(start, _, _)| *start < view.input_scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();

  frame.render_widget(Paragraph::new(visible).style(Style::default().fg(theme.fg)).block(input_block), input_area);
  if view.input_focused {
    let cursor_x = input_area.x + 2 + (cursor_col - view.input_scroll) as u16;
    frame.set_cursor_position((cursor_x, input_area.y + 1));
  }

  let title = if view.popular_loading { " Pencarian populer (memuat…) " } else { " Pencarian populer " };
  let items: Vec<ListItem> = view
    .popular
    .iter()
    .enumerate()
    .map(|(i, term)| ListItem::new(format!("{:>2}. {}", i + 1, term)).fg(theme.fg))
    .collect();
  let list = List::new(items)
    .block(bordered(title, theme))
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg));
  frame.render_stateful_widget(list, popular_area, &mut view.list_state);
}

fn render_not_found(frame: &mut Frame, msg: &str, area: Rect) {
  let theme = &THEME;
  let text = vec![
    Line::from(""),
    Line::from(Span::styled(msg, Style::default().fg(theme.fg).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from(Span::styled("Tekan Enter atau Esc untuk kembali.", Style::default().fg(theme.muted))),
  ];
  let p = Paragraph::new(text).alignment(Alignment::Center).block(bordered(" Tidak ditemukan ", theme));
  frame.render_widget(p, area);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  let theme = &THEME;
  let (text, style) = if let Some(msg) = &app.status_message {
    (format!(" ⏳ {}", msg), Style::default().fg(theme.status))
  } else if let Some(err) = &app.last_error {
    (format!(" ⚠  {}", err), Style::default().fg(theme.error))
  } else if let View::Watch(view) = &app.view
    && let Some(player) = &view.player
  {
    let state = player.state();
    (
      format!(" ♪ {} · {} / {}", player.phase().label(), format_time(state.position), format_time(state.duration)),
      Style::default().fg(theme.status),
    )
  } else {
    (" Siap".to_string(), Style::default().fg(theme.muted))
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let theme = &THEME;
  let keys: Vec<(&str, &str)> = match &app.view {
    View::Home(view) if view.loading() || view.is_empty() => vec![("r", "Muat ulang"), ("1-6", "Kategori"), ("/", "Cari")],
    View::Home(_) => {
      let mut k = vec![("↑/↓", "Baris"), ("←/→", "Judul"), ("Enter", "Detail"), ("w", "Tonton")];
      k.extend([("a", "Lihat semua"), ("i", "Info utama"), ("/", "Cari")]);
      k
    }
    View::Listing(view) if view.focus == ListingFocus::Tags => {
      vec![("←/→", "Tag"), ("Enter", "Pilih"), ("c", "Reset"), ("Tab", "Daftar"), ("Esc", "Kembali")]
    }
    View::Listing(view) => {
      let mut k = vec![("Enter", "Detail"), ("w", "Tonton"), ("←/→", "Halaman"), ("s", "Urutkan"), ("e", "Episode")];
      k.push(("Tab", "Tag"));
      if matches!(view.key.source, ListingSource::Category(_)) {
        k.push(("n/p", "Halaman API"));
      }
      k.push(("/", "Cari"));
      k
    }
    View::Detail(_) => vec![("Enter", "Tonton"), ("j/k", "Episode"), ("←/→", "Tag"), ("t", "Buka tag"), ("Esc", "Kembali")],
    View::Watch(view) if view.input_focused() => vec![("0-9", "Nomor"), ("Enter", "Buka"), ("Esc", "Batal")],
    View::Watch(view) if view.quality_menu.is_some() || view.episode_list.is_some() => {
      vec![("j/k", "Pilih"), ("Enter", "Buka"), ("Esc", "Tutup")]
    }
    View::Watch(view) => {
      let mut k = vec![("Space", "Putar/Jeda"), ("←/→", "±10s"), ("↑/↓", "Volume"), ("m", "Bisu"), ("f", "Layar penuh")];
      k.extend([("n/p", "Episode"), ("l", "Daftar"), ("v", "Kualitas"), (":", "Ke episode")]);
      if view.phase() == PlaybackPhase::Error {
        k.push(("r", "Coba lagi"));
      }
      k
    }
    View::AllTags(_) => vec![("Enter", "Buka tag"), ("j/k", "Navigasi"), ("Esc", "Kembali")],
    View::Search(view) if view.input_focused => vec![("Enter", "Cari"), ("↓", "Populer"), ("Esc", "Hapus/Kembali")],
    View::Search(_) => vec![("Enter", "Cari"), ("j/k", "Navigasi"), ("Tab", "Ketik"), ("Esc", "Kembali")],
    View::NotFound(_) => vec![("Enter", "Kembali"), ("0", "Beranda"), ("1-6", "Kategori")],
  };

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(theme.key_fg).bg(theme.key_bg)),
        Span::styled(format!(" {} ", action), Style::default().fg(theme.muted)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw(" "));
      }
      s
    })
    .collect();

  frame.render_widget(Line::from(spans), area);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncate_keeps_short_strings() {
    assert_eq!(truncate_str("Cinta", 10), "Cinta");
  }

  #[test]
  fn truncate_appends_ellipsis() {
    assert_eq!(truncate_str("Balas Dendam Sang Pewaris", 10), "Balas Den…");
  }

  #[test]
  fn truncate_counts_wide_chars() {
    // Each CJK char is two columns wide.
    assert_eq!(truncate_str("霸道总裁爱上我", 7), "霸道总…");
  }

  #[test]
  fn display_width_counts_wide_chars() {
    assert_eq!(display_width("a霸b", 2), 3);
    assert_eq!(display_width("abc", 10), 3);
  }

  #[test]
  fn strip_keeps_cursor_in_view() {
    let widths = [10, 10, 10, 10];
    assert_eq!(strip_start(&widths, 0, 25), 0);
    assert_eq!(strip_start(&widths, 1, 25), 0);
    assert_eq!(strip_start(&widths, 3, 25), 2);
    // A card wider than the row is still the one shown.
    assert_eq!(strip_start(&[40, 40], 1, 25), 1);
  }

  #[test]
  fn popup_is_centered_and_clamped() {
    let area = Rect::new(0, 0, 40, 10);
    assert_eq!(popup_area(area, 20, 4), Rect::new(10, 3, 20, 4));
    assert_eq!(popup_area(area, 60, 20), area);
  }
}
