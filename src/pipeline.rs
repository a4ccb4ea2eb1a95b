//! Listing transformation: tag extraction, filtering, sorting and page slicing
//! applied to the items a listing fetch returned.
//!
//! Field reconciliation happens earlier, in [`crate::catalog::normalize_item`],
//! so every function here sees one canonical [`CatalogItem`] shape.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::catalog::CatalogItem;

/// Listing sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
  /// Keep fetch order.
  #[default]
  Relevance,
  EpisodesDesc,
  EpisodesAsc,
  NameAsc,
  NameDesc,
}

impl SortKey {
  pub const ALL: [SortKey; 5] =
    [SortKey::Relevance, SortKey::EpisodesDesc, SortKey::EpisodesAsc, SortKey::NameAsc, SortKey::NameDesc];

  pub fn label(self) -> &'static str {
    match self {
      SortKey::Relevance => "Relevan",
      SortKey::EpisodesDesc => "Episode terbanyak",
      SortKey::EpisodesAsc => "Episode tersedikit",
      SortKey::NameAsc => "Judul A-Z",
      SortKey::NameDesc => "Judul Z-A",
    }
  }

  pub fn config_name(self) -> &'static str {
    match self {
      SortKey::Relevance => "relevance",
      SortKey::EpisodesDesc => "episodes-desc",
      SortKey::EpisodesAsc => "episodes-asc",
      SortKey::NameAsc => "name-asc",
      SortKey::NameDesc => "name-desc",
    }
  }

  pub fn from_config(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "episodes-desc" => SortKey::EpisodesDesc,
      "episodes-asc" => SortKey::EpisodesAsc,
      "name-asc" => SortKey::NameAsc,
      "name-desc" => SortKey::NameDesc,
      _ => SortKey::Relevance,
    }
  }

  pub fn next(self) -> Self {
    let idx = SortKey::ALL.iter().position(|k| *k == self).unwrap_or(0);
    SortKey::ALL[(idx + 1) % SortKey::ALL.len()]
  }
}

/// Inclusive episode-count bounds. `None` leaves that side open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpisodeRange {
  pub min: Option<u32>,
  pub max: Option<u32>,
}

impl EpisodeRange {
  pub const PRESETS: [EpisodeRange; 5] = [
    EpisodeRange { min: None, max: None },
    EpisodeRange { min: Some(1), max: Some(30) },
    EpisodeRange { min: Some(31), max: Some(60) },
    EpisodeRange { min: Some(61), max: Some(100) },
    EpisodeRange { min: Some(101), max: None },
  ];

  pub fn contains(&self, count: u32) -> bool {
    self.min.is_none_or(|min| count >= min) && self.max.is_none_or(|max| count <= max)
  }

  pub fn is_unbounded(&self) -> bool {
    self.min.is_none() && self.max.is_none()
  }

  pub fn label(&self) -> String {
    match (self.min, self.max) {
      (None, None) => "Semua episode".to_string(),
      (Some(min), None) => format!("{}+ episode", min),
      (None, Some(max)) => format!("≤{} episode", max),
      (Some(min), Some(max)) => format!("{}-{} episode", min, max),
    }
  }

  /// Cycle through [`Self::PRESETS`]; a custom range restarts at the first preset.
  pub fn next_preset(self) -> Self {
    let idx = Self::PRESETS.iter().position(|r| *r == self);
    match idx {
      Some(i) => Self::PRESETS[(i + 1) % Self::PRESETS.len()],
      None => Self::PRESETS[0],
    }
  }
}

/// Per-listing filter selection. Owned by one listing view; reset on navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
  /// Selected tags in selection order, without duplicates.
  pub selected_tags: Vec<String>,
  pub range: EpisodeRange,
  pub sort: SortKey,
  /// Current page, 1-based.
  pub page: usize,
}

impl Default for FilterState {
  fn default() -> Self {
    Self { selected_tags: Vec::new(), range: EpisodeRange::default(), sort: SortKey::default(), page: 1 }
  }
}

impl FilterState {
  pub fn with_sort(sort: SortKey) -> Self {
    Self { sort, ..Self::default() }
  }

  pub fn is_tag_selected(&self, tag: &str) -> bool {
    self.selected_tags.iter().any(|t| t == tag)
  }

  /// Select `tag` if absent, deselect it otherwise. Returns to page 1.
  pub fn toggle_tag(&mut self, tag: &str) {
    if let Some(pos) = self.selected_tags.iter().position(|t| t == tag) {
      self.selected_tags.remove(pos);
    } else {
      self.selected_tags.push(tag.to_string());
    }
    self.page = 1;
  }

  pub fn clear_tags(&mut self) {
    self.selected_tags.clear();
    self.page = 1;
  }

  pub fn set_range(&mut self, range: EpisodeRange) {
    self.range = range;
    self.page = 1;
  }

  pub fn set_sort(&mut self, sort: SortKey) {
    self.sort = sort;
    self.page = 1;
  }

  pub fn next_page(&mut self, page_count: usize) {
    if self.page < page_count {
      self.page += 1;
    }
  }

  pub fn prev_page(&mut self) {
    self.page = self.page.saturating_sub(1).max(1);
  }

  /// Drop everything but the sort preference.
  pub fn reset(&mut self) {
    *self = Self::with_sort(self.sort);
  }
}

/// Sorted, deduplicated union of all tags across `items`, for filter chips.
pub fn extract_tags(items: &[CatalogItem]) -> Vec<String> {
  items.iter().flat_map(|item| item.tags.iter().cloned()).collect::<BTreeSet<_>>().into_iter().collect()
}

/// Curated tags first, then extracted tags not already present.
pub fn merge_tags(curated: &[String], extracted: &[String]) -> Vec<String> {
  let mut seen = BTreeSet::new();
  curated.iter().chain(extracted).filter(|t| !t.is_empty() && seen.insert(*t)).cloned().collect()
}

/// Range check plus, when any tag is selected, a non-empty tag intersection.
pub fn matches(item: &CatalogItem, filter: &FilterState) -> bool {
  if !filter.range.contains(item.episode_count) {
    return false;
  }
  filter.selected_tags.is_empty() || item.tags.iter().any(|t| filter.is_tag_selected(t))
}

pub fn apply_filter(items: &[CatalogItem], filter: &FilterState) -> Vec<CatalogItem> {
  items.iter().filter(|item| matches(item, filter)).cloned().collect()
}

fn compare_names(a: &CatalogItem, b: &CatalogItem) -> Ordering {
  a.name.to_lowercase().cmp(&b.name.to_lowercase()).then_with(|| a.name.cmp(&b.name))
}

/// Stable sort; equal keys keep their prior relative order.
pub fn sort_items(items: &mut [CatalogItem], key: SortKey) {
  match key {
    SortKey::Relevance => {}
    SortKey::EpisodesDesc => items.sort_by(|a, b| b.episode_count.cmp(&a.episode_count)),
    SortKey::EpisodesAsc => items.sort_by(|a, b| a.episode_count.cmp(&b.episode_count)),
    SortKey::NameAsc => items.sort_by(compare_names),
    SortKey::NameDesc => items.sort_by(|a, b| compare_names(b, a)),
  }
}

pub fn page_count(total: usize, page_size: usize) -> usize {
  if page_size == 0 { 0 } else { total.div_ceil(page_size) }
}

/// Slice out 1-based `page`. Page 0 or a page past the end is empty.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
  if page == 0 || page_size == 0 {
    return &[];
  }
  let start = (page - 1).saturating_mul(page_size);
  if start >= items.len() {
    return &[];
  }
  let end = start.saturating_add(page_size).min(items.len());
  &items[start..end]
}

/// A slot in the page-number bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMarker {
  Page(usize),
  Gap,
}

/// Page numbers to show around `current`, at most 7 slots with gaps.
pub fn page_window(current: usize, total: usize) -> Vec<PageMarker> {
  use PageMarker::{Gap, Page};
  if total <= 5 {
    return (1..=total).map(Page).collect();
  }
  if current <= 3 {
    let mut out: Vec<_> = (1..=4).map(Page).collect();
    out.extend([Gap, Page(total)]);
    out
  } else if current >= total - 2 {
    let mut out = vec![Page(1), Gap];
    out.extend((total - 3..=total).map(Page));
    out
  } else {
    vec![Page(1), Gap, Page(current - 1), Page(current), Page(current + 1), Gap, Page(total)]
  }
}

/// Everything a listing page renders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Listing {
  pub available_tags: Vec<String>,
  /// Item count after filtering, before slicing.
  pub total_items: usize,
  pub page_count: usize,
  pub page: usize,
  pub items: Vec<CatalogItem>,
}

/// Run the whole pipeline: extract tags, filter, sort, slice.
pub fn transform(items: &[CatalogItem], filter: &FilterState, page_size: usize) -> Listing {
  let available_tags = extract_tags(items);
  let mut filtered = apply_filter(items, filter);
  sort_items(&mut filtered, filter.sort);
  let page_count = page_count(filtered.len(), page_size);
  let slice = paginate(&filtered, filter.page, page_size).to_vec();
  Listing { available_tags, total_items: filtered.len(), page_count, page: filter.page, items: slice }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(name: &str, episodes: u32, tags: &[&str]) -> CatalogItem {
    CatalogItem {
      id: name.to_lowercase(),
      name: name.to_string(),
      episode_count: episodes,
      tags: tags.iter().map(|t| t.to_string()).collect(),
      ..CatalogItem::default()
    }
  }

  fn numbered(n: usize) -> Vec<CatalogItem> {
    (0..n).map(|i| item(&format!("Drama {:02}", i), i as u32, &[])).collect()
  }

  fn names(items: &[CatalogItem]) -> Vec<&str> {
    items.iter().map(|i| i.name.as_str()).collect()
  }

  // --- tags ---

  #[test]
  fn extract_tags_sorted_and_deduplicated() {
    let items = vec![item("A", 1, &["Romantis", "Drama"]), item("B", 1, &["Drama", "CEO"])];
    assert_eq!(extract_tags(&items), vec!["CEO", "Drama", "Romantis"]);
  }

  #[test]
  fn merge_tags_keeps_curated_order_first() {
    let curated = vec!["Romantis".to_string(), "Komedi".to_string()];
    let extracted = vec!["CEO".to_string(), "Komedi".to_string(), "Romantis".to_string()];
    assert_eq!(merge_tags(&curated, &extracted), vec!["Romantis", "Komedi", "CEO"]);
  }

  #[test]
  fn selecting_tag_keeps_only_matching_items() {
    let items = vec![item("First", 10, &["Romantis", "Drama"]), item("Second", 10, &["Komedi"])];
    let mut filter = FilterState::default();
    filter.toggle_tag("Romantis");
    assert_eq!(names(&apply_filter(&items, &filter)), vec!["First"]);
  }

  #[test]
  fn tag_match_is_case_sensitive() {
    let items = vec![item("A", 1, &["Romantis"])];
    let mut filter = FilterState::default();
    filter.toggle_tag("romantis");
    assert!(apply_filter(&items, &filter).is_empty());
  }

  #[test]
  fn multiple_tags_match_any() {
    let items = vec![item("A", 1, &["X"]), item("B", 1, &["Y"]), item("C", 1, &["Z"])];
    let mut filter = FilterState::default();
    filter.toggle_tag("Z");
    filter.toggle_tag("X");
    assert_eq!(names(&apply_filter(&items, &filter)), vec!["A", "C"]);
    assert_eq!(filter.selected_tags, vec!["Z", "X"]);
  }

  #[test]
  fn toggle_tag_twice_deselects_and_resets_page() {
    let mut filter = FilterState { page: 3, ..FilterState::default() };
    filter.toggle_tag("A");
    assert_eq!(filter.page, 1);
    filter.toggle_tag("A");
    assert!(filter.selected_tags.is_empty());
  }

  // --- range ---

  #[test]
  fn default_range_admits_zero_episodes() {
    let items = vec![item("A", 0, &[])];
    assert_eq!(apply_filter(&items, &FilterState::default()).len(), 1);
  }

  #[test]
  fn range_is_inclusive() {
    let items = vec![item("A", 30, &[]), item("B", 31, &[]), item("C", 0, &[])];
    let mut filter = FilterState::default();
    filter.set_range(EpisodeRange { min: Some(1), max: Some(30) });
    assert_eq!(names(&apply_filter(&items, &filter)), vec!["A"]);
  }

  #[test]
  fn range_presets_cycle() {
    let mut range = EpisodeRange::default();
    for _ in 0..EpisodeRange::PRESETS.len() {
      range = range.next_preset();
    }
    assert!(range.is_unbounded());
    assert_eq!(EpisodeRange { min: Some(101), max: None }.label(), "101+ episode");
  }

  #[test]
  fn filter_is_idempotent() {
    let items = vec![item("A", 10, &["X"]), item("B", 70, &["X"]), item("C", 20, &["Y"]), item("D", 5, &[])];
    let mut filter = FilterState::default();
    filter.toggle_tag("X");
    filter.set_range(EpisodeRange { min: Some(1), max: Some(60) });
    let once = apply_filter(&items, &filter);
    assert_eq!(apply_filter(&once, &filter), once);
  }

  // --- sorting ---

  #[test]
  fn relevance_preserves_fetch_order() {
    let mut items = vec![item("B", 2, &[]), item("A", 1, &[]), item("C", 3, &[])];
    sort_items(&mut items, SortKey::Relevance);
    assert_eq!(names(&items), vec!["B", "A", "C"]);
  }

  #[test]
  fn episode_sorts_are_stable() {
    let mut items = vec![item("A", 5, &[]), item("B", 9, &[]), item("C", 5, &[]), item("D", 1, &[])];
    sort_items(&mut items, SortKey::EpisodesDesc);
    assert_eq!(names(&items), vec!["B", "A", "C", "D"]);
    sort_items(&mut items, SortKey::EpisodesAsc);
    assert_eq!(names(&items), vec!["D", "A", "C", "B"]);
  }

  #[test]
  fn name_desc_reverses_name_asc() {
    let mut items = vec![item("cinta", 1, &[]), item("Balas", 1, &[]), item("Ayah", 1, &[]), item("dendam", 1, &[])];
    sort_items(&mut items, SortKey::NameAsc);
    let asc: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    assert_eq!(asc, vec!["Ayah", "Balas", "cinta", "dendam"]);
    sort_items(&mut items, SortKey::NameDesc);
    let mut desc: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    desc.reverse();
    assert_eq!(asc, desc);
  }

  #[test]
  fn sort_key_config_names_round_trip() {
    for key in SortKey::ALL {
      assert_eq!(SortKey::from_config(key.config_name()), key);
    }
    assert_eq!(SortKey::from_config("bogus"), SortKey::Relevance);
    assert_eq!(SortKey::NameDesc.next(), SortKey::Relevance);
  }

  // --- pagination ---

  #[test]
  fn twenty_five_items_over_pages_of_eighteen() {
    let items = numbered(25);
    assert_eq!(page_count(items.len(), 18), 2);
    assert_eq!(paginate(&items, 1, 18).len(), 18);
    assert_eq!(paginate(&items, 2, 18).len(), 7);
    assert!(paginate(&items, 3, 18).is_empty());
  }

  #[test]
  fn pages_concatenate_to_the_whole_list() {
    let items = numbered(41);
    let size = 18;
    let pages = page_count(items.len(), size);
    let joined: Vec<CatalogItem> = (1..=pages).flat_map(|p| paginate(&items, p, size).to_vec()).collect();
    assert_eq!(joined, items);
    assert_eq!(paginate(&items, pages, size).len(), items.len() - size * (pages - 1));
  }

  #[test]
  fn page_zero_and_empty_input() {
    let items = numbered(3);
    assert!(paginate(&items, 0, 18).is_empty());
    assert!(paginate::<CatalogItem>(&[], 1, 18).is_empty());
    assert_eq!(page_count(0, 18), 0);
    assert_eq!(page_count(5, 0), 0);
  }

  #[test]
  fn page_navigation_is_bounded() {
    let mut filter = FilterState::default();
    filter.prev_page();
    assert_eq!(filter.page, 1);
    filter.next_page(2);
    filter.next_page(2);
    assert_eq!(filter.page, 2);
  }

  #[test]
  fn page_window_shapes() {
    use PageMarker::{Gap, Page};
    assert_eq!(page_window(1, 3), vec![Page(1), Page(2), Page(3)]);
    assert_eq!(page_window(2, 10), vec![Page(1), Page(2), Page(3), Page(4), Gap, Page(10)]);
    assert_eq!(page_window(9, 10), vec![Page(1), Gap, Page(7), Page(8), Page(9), Page(10)]);
    assert_eq!(page_window(5, 10), vec![Page(1), Gap, Page(4), Page(5), Page(6), Gap, Page(10)]);
    assert!(page_window(1, 0).is_empty());
  }

  // --- transform ---

  #[test]
  fn transform_runs_every_stage() {
    let mut items = numbered(25);
    items[24].tags = vec!["Romantis".into()];
    items[3].tags = vec!["Romantis".into(), "Drama".into()];
    let mut filter = FilterState::with_sort(SortKey::EpisodesDesc);
    filter.toggle_tag("Romantis");

    let listing = transform(&items, &filter, 18);
    assert_eq!(listing.available_tags, vec!["Drama", "Romantis"]);
    assert_eq!(listing.total_items, 2);
    assert_eq!(listing.page_count, 1);
    assert_eq!(names(&listing.items), vec!["Drama 24", "Drama 03"]);
  }

  #[test]
  fn transform_empty_input_is_empty_listing() {
    let listing = transform(&[], &FilterState::default(), 18);
    assert_eq!(listing.total_items, 0);
    assert_eq!(listing.page_count, 0);
    assert!(listing.items.is_empty());
    assert!(listing.available_tags.is_empty());
  }

  #[test]
  fn reset_keeps_sort_only() {
    let mut filter = FilterState::with_sort(SortKey::NameAsc);
    filter.toggle_tag("X");
    filter.set_range(EpisodeRange::PRESETS[2]);
    filter.page = 4;
    filter.reset();
    assert_eq!(filter, FilterState::with_sort(SortKey::NameAsc));
  }
}
