use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::constants::constants;
use crate::player::StreamResolver;

// --- Catalog types ---

/// A title as rendered by listing pages. Built once by [`normalize_item`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogItem {
  pub id: String,
  pub name: String,
  pub cover: String,
  pub episode_count: u32,
  pub introduction: String,
  pub tags: Vec<String>,
  pub play_count: Option<String>,
  /// Badge label shown on the card corner (e.g. "Terpopuler").
  pub corner: Option<String>,
  /// 1-based position in the listing it was fetched from.
  pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterStub {
  pub id: String,
  pub name: String,
  pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DramaDetail {
  pub item: CatalogItem,
  pub author: Option<String>,
  pub status: Option<String>,
  pub update_time: Option<String>,
  pub chapters: Vec<ChapterStub>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamVariant {
  pub quality: u32,
  pub url: String,
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CdnEntry {
  pub domain: String,
  pub is_default: bool,
  pub variants: Vec<StreamVariant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRecord {
  pub id: String,
  pub name: String,
  pub index: u32,
  pub cdns: Vec<CdnEntry>,
  /// Paywalled episode (`isCharge`).
  pub locked: bool,
  pub thumbnail: Option<String>,
}

impl EpisodeRecord {
  /// The CDN flagged as default, else the first one.
  fn primary_cdn(&self) -> Option<&CdnEntry> {
    self.cdns.iter().find(|c| c.is_default).or_else(|| self.cdns.first())
  }

  /// Quality tiers offered by the primary CDN, highest first.
  pub fn qualities(&self) -> Vec<u32> {
    let mut tiers: Vec<u32> =
      self.primary_cdn().map(|cdn| cdn.variants.iter().map(|v| v.quality).collect()).unwrap_or_default();
    tiers.sort_unstable_by(|a, b| b.cmp(a));
    tiers.dedup();
    tiers
  }

  /// Stream picked on first load: default variant, else `preferred`, else first.
  pub fn initial_stream(&self, preferred: u32) -> Option<&StreamVariant> {
    let cdn = self.primary_cdn()?;
    cdn
      .variants
      .iter()
      .find(|v| v.is_default)
      .or_else(|| cdn.variants.iter().find(|v| v.quality == preferred))
      .or_else(|| cdn.variants.first())
  }

  /// Stream for an explicitly requested tier. Falls back to [`Self::initial_stream`].
  pub fn stream_for(&self, tier: u32) -> Option<&StreamVariant> {
    let cdn = self.primary_cdn()?;
    cdn.variants.iter().find(|v| v.quality == tier).or_else(|| self.initial_stream(tier))
  }
}

impl StreamResolver for EpisodeRecord {
  fn resolve(&self, tier: u32) -> Option<String> {
    self.stream_for(tier).map(|v| v.url.clone()).filter(|url| !url.is_empty())
  }
}

/// Listing categories exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
  Trending,
  Latest,
  ForYou,
  Random,
  DubIndo,
  Vip,
}

impl Category {
  pub const ALL: [Category; 6] =
    [Category::Trending, Category::Latest, Category::ForYou, Category::Random, Category::DubIndo, Category::Vip];

  pub fn from_slug(slug: &str) -> Option<Self> {
    match slug {
      "trending" => Some(Category::Trending),
      "latest" => Some(Category::Latest),
      "foryou" => Some(Category::ForYou),
      "random" => Some(Category::Random),
      "dubindo" => Some(Category::DubIndo),
      "vip" => Some(Category::Vip),
      _ => None,
    }
  }

  pub fn slug(self) -> &'static str {
    match self {
      Category::Trending => "trending",
      Category::Latest => "latest",
      Category::ForYou => "foryou",
      Category::Random => "random",
      Category::DubIndo => "dubindo",
      Category::Vip => "vip",
    }
  }

  pub fn title(self) -> &'static str {
    match self {
      Category::Trending => "Trending",
      Category::Latest => "Terbaru",
      Category::ForYou => "Untukmu",
      Category::Random => "Random",
      Category::DubIndo => "Dubbing Indonesia",
      Category::Vip => "VIP Eksklusif",
    }
  }

  pub fn subtitle(self) -> &'static str {
    match self {
      Category::Trending => "Drama paling populer saat ini",
      Category::Latest => "Drama yang baru ditambahkan",
      Category::ForYou => "Rekomendasi berdasarkan selera kamu",
      Category::Random => "Drama pilihan acak untuk kamu",
      Category::DubIndo => "Drama dengan dubbing Bahasa Indonesia",
      Category::Vip => "Konten premium untuk member VIP",
    }
  }

  fn endpoint(self) -> &'static str {
    match self {
      Category::Trending => "/trending",
      Category::Latest => "/latest",
      Category::ForYou => "/foryou",
      Category::Random => "/randomdrama",
      Category::DubIndo => "/dubindo",
      Category::Vip => "/vip",
    }
  }
}

/// What a listing view shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListingSource {
  Category(Category),
  Search(String),
  Tag(String),
}

impl ListingSource {
  pub fn title(&self) -> String {
    match self {
      ListingSource::Category(c) => c.title().to_string(),
      ListingSource::Search(q) => format!("Hasil pencarian \"{}\"", q),
      ListingSource::Tag(t) => format!("#{}", t),
    }
  }
}

/// Identity of a listing fetch. A result only lands if its key is still current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
  pub source: ListingSource,
  /// API page (1-based). Search and tag results are single-page.
  pub page: u32,
}

impl ListingKey {
  pub fn new(source: ListingSource, page: u32) -> Self {
    let page = match source {
      ListingSource::Category(_) => page.max(1),
      ListingSource::Search(_) | ListingSource::Tag(_) => 1,
    };
    Self { source, page }
  }
}

// --- Normalization ---

/// Unwrap the heterogeneous response envelope into a list of entries.
/// Accepts a bare array, or an object carrying the array under `data` or `result`.
pub fn unwrap_envelope(value: Value) -> Vec<Value> {
  match value {
    Value::Array(items) => items,
    Value::Object(mut map) => {
      for key in ["data", "result"] {
        if let Some(Value::Array(items)) = map.remove(key) {
          return items;
        }
      }
      Vec::new()
    }
    _ => Vec::new(),
  }
}

/// Non-empty string field. Numbers are accepted and stringified.
fn str_field(obj: &Value, key: &str) -> Option<String> {
  match obj.get(key)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Non-negative integer field. Numeric strings are accepted.
fn u32_field(obj: &Value, key: &str) -> Option<u32> {
  match obj.get(key)? {
    Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Truthy flag field: `true`, or a non-zero number.
fn flag_field(obj: &Value, key: &str) -> bool {
  match obj.get(key) {
    Some(Value::Bool(b)) => *b,
    Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
    _ => false,
  }
}

fn str_list(obj: &Value, key: &str) -> Vec<String> {
  obj
    .get(key)
    .and_then(Value::as_array)
    .map(|arr| arr.iter().filter_map(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
    .unwrap_or_default()
}

fn first_non_empty(obj: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| str_field(obj, k))
}

/// Resolve the tag list: first non-empty of `tags`/`tagNames`, unioned with
/// `tagV3s[].tagName`, deduplicated in first-seen order.
fn resolve_tags(obj: &Value) -> Vec<String> {
  let mut tags = str_list(obj, "tags");
  if tags.is_empty() {
    tags = str_list(obj, "tagNames");
  }
  let structured = obj
    .get("tagV3s")
    .and_then(Value::as_array)
    .map(|arr| arr.iter().filter_map(|t| str_field(t, "tagName")).collect::<Vec<_>>())
    .unwrap_or_default();

  let mut out: Vec<String> = Vec::with_capacity(tags.len() + structured.len());
  for tag in tags.into_iter().chain(structured) {
    if !out.contains(&tag) {
      out.push(tag);
    }
  }
  out
}

/// Build the canonical [`CatalogItem`] from one API entry.
/// Returns `None` only when the entry is not a JSON object.
pub fn normalize_item(value: &Value, rank: usize) -> Option<CatalogItem> {
  if !value.is_object() {
    return None;
  }
  Some(CatalogItem {
    id: str_field(value, "bookId").unwrap_or_default(),
    name: str_field(value, "bookName").unwrap_or_default(),
    cover: first_non_empty(value, &["coverWap", "cover", "bookCover"]).unwrap_or_default(),
    episode_count: u32_field(value, "chapterCount").unwrap_or(0),
    introduction: str_field(value, "introduction").unwrap_or_default(),
    tags: resolve_tags(value),
    play_count: str_field(value, "playCount"),
    corner: value.get("corner").and_then(|c| str_field(c, "name")),
    rank,
  })
}

pub fn normalize_items(entries: &[Value]) -> Vec<CatalogItem> {
  let mut items = Vec::with_capacity(entries.len());
  for entry in entries {
    match normalize_item(entry, items.len() + 1) {
      Some(item) => items.push(item),
      None => warn!(entry = %entry, "catalog: skipping non-object listing entry"),
    }
  }
  items
}

/// Flatten the VIP response (`columnVoList[].bookList[]`) into one list.
pub fn flatten_vip(value: &Value) -> Vec<Value> {
  let root = value.get("data").filter(|d| d.is_object()).unwrap_or(value);
  root
    .get("columnVoList")
    .and_then(Value::as_array)
    .map(|cols| {
      cols.iter().filter_map(|col| col.get("bookList").and_then(Value::as_array)).flatten().cloned().collect()
    })
    .unwrap_or_default()
}

pub fn normalize_detail(value: &Value) -> Option<DramaDetail> {
  let obj = value.get("data").filter(|d| d.is_object()).unwrap_or(value);
  let item = normalize_item(obj, 0)?;
  if item.id.is_empty() && item.name.is_empty() {
    return None;
  }
  let chapters = obj
    .get("chapterList")
    .and_then(Value::as_array)
    .map(|arr| {
      arr
        .iter()
        .filter(|c| c.is_object())
        .map(|c| ChapterStub {
          id: str_field(c, "chapterId").unwrap_or_default(),
          name: str_field(c, "chapterName").unwrap_or_default(),
          locked: flag_field(c, "isLock"),
        })
        .collect()
    })
    .unwrap_or_default();
  Some(DramaDetail {
    item,
    author: str_field(obj, "authorName"),
    status: str_field(obj, "status"),
    update_time: str_field(obj, "updateTime"),
    chapters,
  })
}

fn normalize_variant(value: &Value) -> Option<StreamVariant> {
  let url = str_field(value, "videoPath")?;
  Some(StreamVariant { quality: u32_field(value, "quality").unwrap_or(0), url, is_default: flag_field(value, "isDefault") })
}

pub fn normalize_episode(value: &Value, position: usize) -> Option<EpisodeRecord> {
  if !value.is_object() {
    return None;
  }
  let cdns = value
    .get("cdnList")
    .and_then(Value::as_array)
    .map(|arr| {
      arr
        .iter()
        .filter(|c| c.is_object())
        .map(|c| CdnEntry {
          domain: str_field(c, "cdnDomain").unwrap_or_default(),
          is_default: flag_field(c, "isDefault"),
          variants: c
            .get("videoPathList")
            .and_then(Value::as_array)
            .map(|v| v.iter().filter_map(normalize_variant).collect())
            .unwrap_or_default(),
        })
        .collect()
    })
    .unwrap_or_default();
  let index = u32_field(value, "chapterIndex").unwrap_or(position as u32);
  Some(EpisodeRecord {
    id: str_field(value, "chapterId").unwrap_or_default(),
    name: str_field(value, "chapterName").unwrap_or_else(|| format!("Episode {}", index + 1)),
    index,
    cdns,
    locked: flag_field(value, "isCharge"),
    thumbnail: str_field(value, "chapterImg"),
  })
}

// --- Response cache ---

/// In-memory listing cache keyed by [`ListingKey`], entries expire after `ttl`.
#[derive(Debug)]
pub struct ResponseCache {
  ttl: Duration,
  entries: HashMap<ListingKey, (Instant, Arc<Vec<CatalogItem>>)>,
}

impl ResponseCache {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl, entries: HashMap::new() }
  }

  pub fn get(&self, key: &ListingKey, now: Instant) -> Option<Arc<Vec<CatalogItem>>> {
    self
      .entries
      .get(key)
      .filter(|(stored, _)| now.saturating_duration_since(*stored) < self.ttl)
      .map(|(_, items)| Arc::clone(items))
  }

  pub fn insert(&mut self, key: ListingKey, items: Arc<Vec<CatalogItem>>, now: Instant) {
    self.entries.retain(|_, (stored, _)| now.saturating_duration_since(*stored) < self.ttl);
    self.entries.insert(key, (now, items));
  }

  pub fn invalidate(&mut self, key: &ListingKey) {
    self.entries.remove(key);
  }
}

// --- HTTP client ---

#[derive(Debug, Clone)]
pub struct CatalogClient {
  http: Client,
  base_url: String,
}

impl CatalogClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let http = Client::builder()
      .user_agent(constants().user_agent.as_str())
      .timeout(Duration::from_secs(20))
      .build()
      .context("Failed to build HTTP client")?;
    Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
  }

  async fn fetch_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value> {
    let mut url = Url::parse(&format!("{}{}", self.base_url, endpoint))
      .with_context(|| format!("Invalid API URL: {}{}", self.base_url, endpoint))?;
    if !params.is_empty() {
      url.query_pairs_mut().extend_pairs(params);
    }
    debug!(url = %url, "catalog: GET");

    let response = self
      .http
      .get(url)
      .header(reqwest::header::ACCEPT, "application/json")
      .send()
      .await
      .with_context(|| format!("Request to {} failed", endpoint))?;

    let status = response.status();
    if !status.is_success() {
      return Err(anyhow!("API error: {} ({})", status.as_u16(), endpoint));
    }
    response.json::<Value>().await.with_context(|| format!("Invalid JSON from {}", endpoint))
  }

  pub async fn category(&self, category: Category, page: u32) -> Result<Vec<CatalogItem>> {
    let page = page.max(1).to_string();
    let body = self.fetch_json(category.endpoint(), &[("page", page.as_str())]).await?;
    let entries = if category == Category::Vip { flatten_vip(&body) } else { unwrap_envelope(body) };
    Ok(normalize_items(&entries))
  }

  pub async fn search(&self, query: &str) -> Result<Vec<CatalogItem>> {
    let body = self.fetch_json("/search", &[("query", query)]).await?;
    Ok(normalize_items(&unwrap_envelope(body)))
  }

  pub async fn listing(&self, key: &ListingKey) -> Result<Vec<CatalogItem>> {
    match &key.source {
      ListingSource::Category(c) => self.category(*c, key.page).await,
      ListingSource::Search(q) | ListingSource::Tag(q) => self.search(q).await,
    }
  }

  /// `Ok(None)` when the API has no such title.
  pub async fn detail(&self, book_id: &str) -> Result<Option<DramaDetail>> {
    let body = self.fetch_json("/detail", &[("bookId", book_id)]).await?;
    Ok(normalize_detail(&body))
  }

  pub async fn episodes(&self, book_id: &str) -> Result<Vec<EpisodeRecord>> {
    let body = self.fetch_json("/allepisode", &[("bookId", book_id)]).await?;
    let entries = unwrap_envelope(body);
    Ok(entries.iter().enumerate().filter_map(|(i, e)| normalize_episode(e, i)).collect())
  }

  pub async fn popular_searches(&self) -> Result<Vec<String>> {
    let body = self.fetch_json("/populersearch", &[]).await?;
    Ok(
      unwrap_envelope(body)
        .iter()
        .filter_map(|v| match v {
          Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
          other => str_field(other, "keyword").or_else(|| str_field(other, "bookName")),
        })
        .collect(),
    )
  }
}
