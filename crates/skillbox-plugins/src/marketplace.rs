//! Read-only marketplace index client.
//!
//! The index is a JSON array of [`MarketplaceEntry`] records served over
//! HTTP(S) or read from a local file. The last good index is cached on disk
//! and used when the source is unreachable.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SkillError, SkillResult};
use crate::source::SkillSource;

/// Default number of results for listings and searches.
pub const DEFAULT_MARKETPLACE_LIMIT: usize = 20;

const CACHE_FILE_NAME: &str = "index.json";

/// One skill advertised by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceEntry {
    /// Skill ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Author or team.
    #[serde(default)]
    pub author: Option<String>,
    /// Latest published version.
    #[serde(default)]
    pub version: Option<String>,
    /// Download count.
    #[serde(default)]
    pub downloads: u64,
    /// Average rating.
    #[serde(default)]
    pub rating: f64,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Repository URL.
    #[serde(default)]
    pub repository: Option<String>,
    /// Explicit install source, overriding the one derived from `repository`.
    #[serde(default)]
    pub source: Option<String>,
}

impl MarketplaceEntry {
    /// Source identifier to install this entry from.
    ///
    /// Uses `source` when present, else maps a `https://github.com/org/repo`
    /// repository URL to `github:org/repo`.
    #[must_use]
    pub fn install_source(&self) -> Option<SkillSource> {
        if let Some(source) = &self.source {
            return SkillSource::parse(source).ok();
        }
        let repo = self.repository.as_deref()?;
        let rest = repo
            .strip_prefix("https://github.com/")
            .or_else(|| repo.strip_prefix("http://github.com/"))?;
        let rest = rest.trim_end_matches('/').trim_end_matches(".git");
        SkillSource::parse(&format!("github:{rest}")).ok()
    }

    fn matches(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(query)
            || self.description.to_lowercase().contains(query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(query))
    }
}

/// Where the marketplace index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    /// Fetched over HTTP(S).
    Url(String),
    /// Read from disk.
    File(PathBuf),
}

impl IndexLocation {
    /// `http://` and `https://` locations are URLs, anything else is a path.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        if location.starts_with("https://") || location.starts_with("http://") {
            Self::Url(location.to_string())
        } else {
            Self::File(PathBuf::from(
                location.strip_prefix("file://").unwrap_or(location),
            ))
        }
    }
}

/// Marketplace index client.
#[derive(Debug, Clone)]
pub struct Marketplace {
    location: IndexLocation,
    cache_dir: Option<PathBuf>,
}

impl Marketplace {
    /// Create a client for the index at `location`.
    #[must_use]
    pub fn new(location: IndexLocation) -> Self {
        Self {
            location,
            cache_dir: None,
        }
    }

    /// Cache the last good index under `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// The index location.
    #[must_use]
    pub fn location(&self) -> &IndexLocation {
        &self.location
    }

    /// Fetch the full index.
    ///
    /// Falls back to the cached copy when the source fails.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse error when there is no usable cache.
    pub async fn index(&self) -> SkillResult<Vec<MarketplaceEntry>> {
        match self.fetch_index().await {
            Ok(entries) => {
                self.store_cache(&entries);
                Ok(entries)
            },
            Err(e) => match self.load_cache() {
                Some(cached) => {
                    warn!(error = %e, "Marketplace unavailable, using cached index");
                    Ok(cached)
                },
                None => Err(e),
            },
        }
    }

    /// Entries in index order.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn featured(&self, limit: usize) -> SkillResult<Vec<MarketplaceEntry>> {
        let mut entries = self.index().await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Case-insensitive search over name, description and tags, optionally
    /// restricted to entries carrying one of `tags`.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn search(
        &self,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> SkillResult<Vec<MarketplaceEntry>> {
        let query = query.to_lowercase();
        Ok(self
            .index()
            .await?
            .into_iter()
            .filter(|e| e.matches(&query))
            .filter(|e| tags.is_empty() || tags.iter().any(|t| e.tags.contains(t)))
            .take(limit)
            .collect())
    }

    /// One entry by ID.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn details(&self, id: &str) -> SkillResult<Option<MarketplaceEntry>> {
        Ok(self.index().await?.into_iter().find(|e| e.id == id))
    }

    /// Highest rated first.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn top_rated(&self, limit: usize) -> SkillResult<Vec<MarketplaceEntry>> {
        let mut entries = self.index().await?;
        entries.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Most downloaded first.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn most_downloaded(&self, limit: usize) -> SkillResult<Vec<MarketplaceEntry>> {
        let mut entries = self.index().await?;
        entries.sort_by(|a, b| b.downloads.cmp(&a.downloads));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Every distinct tag, sorted.
    ///
    /// # Errors
    ///
    /// See [`Marketplace::index`].
    pub async fn tags(&self) -> SkillResult<Vec<String>> {
        let mut tags: Vec<String> = self
            .index()
            .await?
            .into_iter()
            .flat_map(|e| e.tags)
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn fetch_index(&self) -> SkillResult<Vec<MarketplaceEntry>> {
        let body = match &self.location {
            IndexLocation::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                SkillError::Fetch(format!("cannot read index {}: {e}", path.display()))
            })?,
            IndexLocation::Url(url) => fetch_url(url).await?,
        };
        let entries: Vec<MarketplaceEntry> = serde_json::from_str(&body)
            .map_err(|e| SkillError::Fetch(format!("invalid marketplace index: {e}")))?;
        debug!(entries = entries.len(), "Fetched marketplace index");
        Ok(entries)
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|d| d.join(CACHE_FILE_NAME))
    }

    fn load_cache(&self) -> Option<Vec<MarketplaceEntry>> {
        let path = self.cache_path()?;
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn store_cache(&self, entries: &[MarketplaceEntry]) {
        let Some(path) = self.cache_path() else {
            return;
        };
        if let Err(e) = write_cache(&path, entries) {
            debug!(path = %path.display(), error = %e, "Failed to cache marketplace index");
        }
    }
}

fn write_cache(path: &Path, entries: &[MarketplaceEntry]) -> SkillResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&serde_json::to_vec(entries)?)?;
    tmp.persist(path).map_err(|e| SkillError::Io(e.error))?;
    Ok(())
}

#[cfg(feature = "http")]
async fn fetch_url(url: &str) -> SkillResult<String> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("skillbox/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| SkillError::Fetch(format!("failed to create HTTP client: {e}")))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SkillError::Fetch(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(SkillError::Fetch(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| SkillError::Fetch(format!("{url}: {e}")))
}

#[cfg(not(feature = "http"))]
async fn fetch_url(url: &str) -> SkillResult<String> {
    Err(SkillError::Fetch(format!(
        "cannot fetch {url}: built without the `http` feature"
    )))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn write_index(dir: &Path) -> PathBuf {
        let path = dir.join("market.json");
        let index = json!([
            {"id": "weather", "name": "Weather", "description": "Forecasts",
             "downloads": 1250, "rating": 4.8, "tags": ["weather", "forecast"],
             "repository": "https://github.com/org/weather-skill"},
            {"id": "git", "name": "Git", "description": "Version control",
             "downloads": 2100, "rating": 4.9, "tags": ["git"]},
            {"id": "pdf", "name": "PDF", "description": "Read PDF documents",
             "downloads": 1190, "rating": 4.5, "tags": ["pdf", "document"],
             "source": "local:/opt/skills/pdf"}
        ]);
        std::fs::write(&path, index.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn listings_and_search() {
        let tmp = tempfile::tempdir().unwrap();
        let market = Marketplace::new(IndexLocation::File(write_index(tmp.path())));

        let featured = market.featured(2).await.unwrap();
        assert_eq!(featured.len(), 2);
        assert_eq!(featured[0].id, "weather");

        let hits = market.search("DOC", &[], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "pdf");

        let tagged = market
            .search("", &["forecast".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);

        assert_eq!(market.most_downloaded(1).await.unwrap()[0].id, "git");
        assert_eq!(market.top_rated(1).await.unwrap()[0].id, "git");
        assert!(market.tags().await.unwrap().contains(&"document".to_string()));
        assert!(market.details("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_index_survives_outage() {
        let tmp = tempfile::tempdir().unwrap();
        let index = write_index(tmp.path());
        let market =
            Marketplace::new(IndexLocation::File(index.clone())).with_cache_dir(tmp.path().join("cache"));
        assert_eq!(market.index().await.unwrap().len(), 3);

        std::fs::remove_file(&index).unwrap();
        assert_eq!(market.index().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_index_without_cache_fails() {
        let market = Marketplace::new(IndexLocation::File("/nonexistent/market.json".into()));
        assert!(matches!(market.index().await, Err(SkillError::Fetch(_))));
    }

    #[test]
    fn install_sources() {
        let entry: MarketplaceEntry = serde_json::from_value(json!({
            "id": "weather", "name": "Weather",
            "repository": "https://github.com/org/weather-skill.git"
        }))
        .unwrap();
        assert_eq!(
            entry.install_source().unwrap().to_string(),
            "github:org/weather-skill"
        );

        let entry: MarketplaceEntry =
            serde_json::from_value(json!({"id": "x", "name": "X"})).unwrap();
        assert!(entry.install_source().is_none());
    }

    #[test]
    fn location_parsing() {
        assert_eq!(
            IndexLocation::parse("https://example.com/index.json"),
            IndexLocation::Url("https://example.com/index.json".into())
        );
        assert_eq!(
            IndexLocation::parse("file:///srv/index.json"),
            IndexLocation::File("/srv/index.json".into())
        );
    }
}
