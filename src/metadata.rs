use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::NegativeCache;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    fn omdb_type(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmdbResponse {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct TmdbCandidate {
    #[serde(alias = "name")]
    title: Option<String>,
    #[serde(alias = "original_name", alias = "original_title")]
    original_title: Option<String>,
    #[serde(alias = "first_air_date")]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    #[serde(default)]
    results: Vec<TmdbCandidate>,
}

#[derive(Debug, Deserialize)]
struct TvMazeShow {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TvMazeSingleSearchHit {
    show: TvMazeShow,
}

#[derive(Debug, Deserialize)]
struct TvMazeMultiSearchHit {
    show: TvMazeShow,
}

/// Maps `(rawTitle, year, kind)` to a display title through a cascade of external providers,
/// caching both hits and misses so a provider that has already failed on a title is never
/// queried for it again in this process's lifetime.
pub struct MetadataResolver {
    http: reqwest::Client,
    omdb_api_key: Option<String>,
    tmdb_api_key: Option<String>,
    cache: NegativeCache<String>,
}

impl MetadataResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            omdb_api_key: config.omdb_api_key.clone(),
            tmdb_api_key: config.tmdb_api_key.clone(),
            cache: NegativeCache::new(1000),
        }
    }

    pub async fn resolve(&self, title: &str, year: Option<u16>, kind: MediaKind) -> Option<String> {
        if let Some(hit) = self.cascade_step("omdb", title, year, kind, self.omdb_search(title, year, kind)).await {
            return Some(hit);
        }
        if let Some(hit) = self.cascade_step("tmdb", title, year, kind, self.tmdb_search(title, year, kind)).await {
            return Some(hit);
        }
        if kind == MediaKind::Series {
            return self.cascade_step("tvmaze", title, year, kind, self.tvmaze_search(title)).await;
        }

        None
    }

    /// Runs one provider's cache-or-search step. A cached `None` means *this provider* already
    /// missed on this key; the caller falls through to the next provider either way, so a cached
    /// miss and a freshly-computed miss both just return `None` here.
    async fn cascade_step(
        &self,
        provider: &str,
        title: &str,
        year: Option<u16>,
        kind: MediaKind,
        search: impl std::future::Future<Output = Option<String>>,
    ) -> Option<String> {
        match self.cache_lookup(provider, title, year, kind) {
            Some(Some(hit)) => Some(hit),
            Some(None) => None,
            None => {
                let result = search.await;
                self.cache_store(provider, title, year, kind, result.clone());
                result
            }
        }
    }

    fn cache_key(provider: &str, title: &str, year: Option<u16>, kind: MediaKind) -> String {
        format!(
            "{provider}:{}:{}:{}",
            match kind {
                MediaKind::Movie => "movie",
                MediaKind::Series => "series",
            },
            title.to_lowercase().trim(),
            year.map(|y| y.to_string()).unwrap_or_default(),
        )
    }

    fn cache_lookup(&self, provider: &str, title: &str, year: Option<u16>, kind: MediaKind) -> Option<Option<String>> {
        self.cache.get(&Self::cache_key(provider, title, year, kind))
    }

    fn cache_store(&self, provider: &str, title: &str, year: Option<u16>, kind: MediaKind, value: Option<String>) {
        self.cache.insert(Self::cache_key(provider, title, year, kind), value);
    }

    async fn omdb_search(&self, title: &str, year: Option<u16>, kind: MediaKind) -> Option<String> {
        let api_key = self.omdb_api_key.as_ref()?;

        let mut result = self.omdb_request(api_key, title, year, kind).await;
        if result.is_none() && year.is_some() {
            result = self.omdb_request(api_key, title, None, kind).await;
        }
        result
    }

    async fn omdb_request(&self, api_key: &str, title: &str, year: Option<u16>, kind: MediaKind) -> Option<String> {
        let mut query = vec![
            ("apikey", api_key.to_string()),
            ("t", title.to_string()),
            ("type", kind.omdb_type().to_string()),
        ];
        if let Some(y) = year {
            query.push(("y", y.to_string()));
        }

        let resp = match self.http.get("https://www.omdbapi.com/").query(&query).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "omdb request failed");
                return None;
            }
        };

        let body = resp.json::<OmdbResponse>().await.ok()?;
        if body.response != "True" {
            return None;
        }

        let name = body.title?;
        match kind {
            MediaKind::Movie => {
                let clean_year = body.year.map(|y| y.trim_end_matches(['–', '-']).to_string());
                match clean_year {
                    Some(y) if !y.is_empty() => Some(format!("{name} ({y})")),
                    _ => Some(name),
                }
            }
            MediaKind::Series => Some(name),
        }
    }

    async fn tmdb_search(&self, title: &str, year: Option<u16>, kind: MediaKind) -> Option<String> {
        let api_key = self.tmdb_api_key.as_ref()?;

        let url = match kind {
            MediaKind::Movie => "https://api.themoviedb.org/3/search/movie",
            MediaKind::Series => "https://api.themoviedb.org/3/search/tv",
        };
        let mut query = vec![("api_key", api_key.to_string()), ("query", title.to_string())];
        if let Some(y) = year {
            match kind {
                MediaKind::Movie => query.push(("year", y.to_string())),
                MediaKind::Series => query.push(("first_air_date_year", y.to_string())),
            }
        }

        let resp = match self.http.get(url).query(&query).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "tmdb request failed");
                return None;
            }
        };

        let body = resp.json::<TmdbSearchResponse>().await.ok()?;
        // Ties keep the earliest candidate in input order, matching a stable sort-then-take-first.
        let mut best: Option<(&TmdbCandidate, f64)> = None;
        for candidate in &body.results {
            let score = tmdb_candidate_score(candidate, title);
            let replace = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if replace {
                best = Some((candidate, score));
            }
        }
        let (candidate, _) = best?;
        let name = candidate.title.clone()?;
        match kind {
            MediaKind::Movie => {
                let year_str = candidate.release_date.as_deref().and_then(|d| d.get(0..4));
                match year_str {
                    Some(y) => Some(format!("{name} ({y})")),
                    None => Some(name),
                }
            }
            MediaKind::Series => Some(name),
        }
    }

    async fn tvmaze_search(&self, title: &str) -> Option<String> {
        let single_url = "https://api.tvmaze.com/singlesearch/shows";
        if let Ok(resp) = self.http.get(single_url).query(&[("q", title)]).send().await {
            if let Ok(hit) = resp.json::<TvMazeSingleSearchHit>().await {
                return Some(hit.show.name);
            }
        }

        debug!(title, "tvmaze single search failed, falling back to multi search");
        let multi_url = "https://api.tvmaze.com/search/shows";
        let resp = self.http.get(multi_url).query(&[("q", title)]).send().await.ok()?;
        let hits = resp.json::<Vec<TvMazeMultiSearchHit>>().await.ok()?;
        hits.into_iter().next().map(|h| h.show.name)
    }
}

fn tmdb_candidate_score(candidate: &TmdbCandidate, query: &str) -> f64 {
    let primary = candidate.title.as_deref().map(|t| title_similarity(query, t)).unwrap_or(0.0);
    let original = candidate
        .original_title
        .as_deref()
        .map(|t| title_similarity(query, t))
        .unwrap_or(0.0);
    primary.max(original)
}

/// Deterministic title-similarity score in `[0.0, 1.0]`: exact match wins outright, a substring
/// relationship scores by length ratio, otherwise falls back to word-overlap.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    if a.contains(&b) || b.contains(&a) {
        let min_len = a.len().min(b.len()) as f64;
        let max_len = a.len().max(b.len()) as f64;
        return 0.8 * min_len / max_len;
    }

    let words_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let words_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count() as f64;
    let denom = words_a.len().max(words_b.len()) as f64;
    intersection / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_scores_one() {
        assert_eq!(title_similarity("The Matrix", "the matrix"), 1.0);
    }

    #[test]
    fn substring_scores_by_length_ratio() {
        let score = title_similarity("Matrix", "The Matrix Reloaded");
        assert!(score > 0.0 && score < 0.8);
    }

    #[test]
    fn word_overlap_fallback() {
        let score = title_similarity("Gen V Show", "Gen V Series");
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn disjoint_titles_score_zero() {
        assert_eq!(title_similarity("Gen V", "Breaking Bad"), 0.0);
    }

    fn test_config() -> Config {
        Config {
            rd_webdav_url: "http://upstream.invalid".to_string(),
            rd_username: "user".to_string(),
            rd_password: "pass".to_string(),
            omdb_api_key: None,
            tmdb_api_key: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            cache_ttl_secs: 300,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn a_cached_provider_miss_falls_through_to_the_next_provider() {
        let resolver = MetadataResolver::new(&test_config());

        // A cached `None` for OMDB must not short-circuit the whole cascade: a later cached hit
        // on TMDB for the same key should still win.
        resolver.cache_store("omdb", "Gen V", Some(2023), MediaKind::Movie, None);
        resolver.cache_store("tmdb", "Gen V", Some(2023), MediaKind::Movie, Some("Gen V (2023)".to_string()));

        let resolved = resolver.resolve("Gen V", Some(2023), MediaKind::Movie).await;
        assert_eq!(resolved, Some("Gen V (2023)".to_string()));
    }

    #[tokio::test]
    async fn a_cached_miss_on_every_provider_returns_none_without_reraising() {
        let resolver = MetadataResolver::new(&test_config());

        resolver.cache_store("omdb", "Totally Unknown Film", None, MediaKind::Movie, None);
        resolver.cache_store("tmdb", "Totally Unknown Film", None, MediaKind::Movie, None);

        let resolved = resolver.resolve("Totally Unknown Film", None, MediaKind::Movie).await;
        assert_eq!(resolved, None);
    }

    #[test]
    fn tmdb_candidate_tie_break_keeps_the_earliest_candidate() {
        let first = TmdbCandidate {
            title: Some("Gen V".to_string()),
            original_title: None,
            release_date: Some("2023-09-29".to_string()),
        };
        let second = TmdbCandidate {
            title: Some("Gen V".to_string()),
            original_title: None,
            release_date: Some("1999-01-01".to_string()),
        };
        let candidates = [first.clone(), second];

        let mut best: Option<(&TmdbCandidate, f64)> = None;
        for candidate in &candidates {
            let score = tmdb_candidate_score(candidate, "Gen V");
            let replace = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if replace {
                best = Some((candidate, score));
            }
        }
        let (winner, _) = best.unwrap();
        assert_eq!(winner.release_date.as_deref(), first.release_date.as_deref());
    }
}
