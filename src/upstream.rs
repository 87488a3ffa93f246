use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::AppError;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
  </D:prop>
</D:propfind>
"#;

const MAX_ATTEMPTS: u32 = 5;

/// One child of an upstream WebDAV collection, as seen by a `PROPFIND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub href: String,
    pub is_dir: bool,
    pub size: u64,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    listing_cache: TtlCache<Vec<RawEntry>>,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");

        Self {
            http,
            base_url: config.rd_webdav_url.trim_end_matches('/').to_string(),
            username: config.rd_username.clone(),
            password: config.rd_password.clone(),
            listing_cache: TtlCache::new(500, Duration::from_secs(config.cache_ttl_secs)),
        }
    }

    /// One-depth PROPFIND on `/torrents`, TTL-cached under `"torrents"`.
    pub async fn list_torrents(&self) -> Vec<RawEntry> {
        if let Some(cached) = self.listing_cache.get("torrents") {
            return cached;
        }

        let entries = self.propfind_depth1("/torrents").await.unwrap_or_else(|err| {
            warn!(error = %err, "failed to list torrents from upstream");
            Vec::new()
        });
        self.listing_cache.insert("torrents".to_string(), entries.clone());
        entries
    }

    /// One-depth PROPFIND on a torrent's href, filtered to non-directory children.
    pub async fn list_torrent_files(&self, torrent: &RawEntry) -> Vec<RawEntry> {
        let key = format!("files:{}", torrent.href);
        if let Some(cached) = self.listing_cache.get(&key) {
            return cached;
        }

        let entries = self
            .propfind_depth1(&torrent.href)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, href = %torrent.href, "failed to list torrent files from upstream");
                Vec::new()
            })
            .into_iter()
            .filter(|e| !e.is_dir)
            .collect::<Vec<_>>();

        self.listing_cache.insert(key, entries.clone());
        entries
    }

    pub fn file_url(&self, entry: &RawEntry) -> String {
        format!("{}{}", self.base_url, entry.href)
    }

    /// HTTP GET with a `Range` header; open-ended when `length` is `None`.
    pub async fn open_range(
        &self,
        url: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Response, AppError> {
        let range = match length {
            Some(len) => format!("bytes={}-{}", offset, offset + len - 1),
            None => format!("bytes={}-", offset),
        };

        let resp = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::RANGE, range)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "range GET failed: HTTP {}",
                resp.status()
            )));
        }
        Ok(resp)
    }

    /// Drops every cached listing; the next access re-crawls the upstream.
    pub fn invalidate(&self) {
        self.listing_cache.invalidate();
    }

    async fn propfind_depth1(&self, path: &str) -> Result<Vec<RawEntry>, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let text = self.propfind_with_retry(&url).await?;
        let mut entries = parse_propfind_multistatus(&text)?;
        filter_self_entry(path, &mut entries);
        Ok(entries)
    }

    async fn propfind_with_retry(&self, url: &str) -> Result<String, AppError> {
        let depth = HeaderName::from_static("depth");
        let mut last_error: Option<AppError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            debug!(url, attempt, "propfind depth=1");
            let request = self
                .http
                .request(reqwest::Method::from_bytes(b"PROPFIND").unwrap(), url)
                .basic_auth(&self.username, Some(&self.password))
                .header(depth.clone(), HeaderValue::from_static("1"))
                .header(CONTENT_TYPE, "application/xml")
                .body(PROPFIND_BODY);

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    last_error = Some(err.into());
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::MULTI_STATUS || status == StatusCode::OK {
                return resp
                    .text()
                    .await
                    .map_err(|err| AppError::UpstreamUnavailable(err.to_string()));
            }

            if is_retryable(status) {
                if let Some(delay) = retry_after(&resp) {
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(AppError::UpstreamUnavailable(format!(
                    "PROPFIND {} returned HTTP {}",
                    url, status
                )));
                continue;
            }

            return Err(AppError::UpstreamUnavailable(format!(
                "PROPFIND {} returned HTTP {}",
                url, status
            )));
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::UpstreamUnavailable(format!("PROPFIND {} exhausted retries", url))
        }))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn retry_after(resp: &Response) -> Option<Duration> {
    let raw = resp.headers().get(RETRY_AFTER)?.to_str().ok()?.trim().to_string();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(&raw).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

fn backoff_delay(attempt: u32) -> Duration {
    let backoff_ms = 2u64.pow(attempt - 2) * 1000;
    let jitter_ms = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        % 500) as u64;
    Duration::from_millis(backoff_ms + jitter_ms)
}

/// Parses a PROPFIND multistatus body into raw entries, skipping propstats that didn't return 200.
fn parse_propfind_multistatus(xml: &str) -> Result<Vec<RawEntry>, AppError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|err| AppError::UpstreamUnavailable(format!("malformed PROPFIND xml: {err}")))?;

    let mut out = Vec::new();
    for response in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "response")
    {
        let Some(mut href) = response
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .and_then(decode_href_path)
        else {
            continue;
        };

        let mut is_dir = false;
        let mut size = 0u64;

        for propstat in response
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "propstat")
        {
            let status = propstat
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "status")
                .and_then(|n| n.text())
                .unwrap_or("");
            if !status.contains(" 200 ") {
                continue;
            }

            let Some(prop) = propstat
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "prop")
            else {
                continue;
            };

            if let Some(resourcetype) = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "resourcetype")
            {
                is_dir = resourcetype
                    .children()
                    .any(|n| n.is_element() && n.tag_name().name() == "collection");
                if is_dir && !href.ends_with('/') {
                    href.push('/');
                }
            }

            if let Some(v) = prop
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "getcontentlength")
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|v| !v.is_empty())
            {
                size = v.parse().unwrap_or(0);
            }
        }

        out.push(RawEntry {
            name: basename(&href),
            href,
            is_dir,
            size,
        });
    }

    Ok(out)
}

fn decode_href_path(href: &str) -> Option<String> {
    let raw = href.trim();
    if raw.is_empty() {
        return None;
    }

    let path = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.splitn(4, '/').last().map(|p| format!("/{p}"))?
    } else {
        raw.to_string()
    };

    let trailing_slash = path.ends_with('/');
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>();

    let mut decoded = format!("/{}", segments.join("/"));
    if trailing_slash && !decoded.ends_with('/') {
        decoded.push('/');
    }
    Some(decoded)
}

fn basename(href: &str) -> String {
    let trimmed = href.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// The multistatus response includes an entry describing the requested collection itself
/// (the "parent" entry); it must not be treated as a child.
fn filter_self_entry(request_path: &str, entries: &mut Vec<RawEntry>) {
    let with_slash = if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{request_path}/")
    };
    let without_slash = with_slash.trim_end_matches('/').to_string();
    entries.retain(|e| e.href != with_slash && e.href != without_slash);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/torrents/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/torrents/Gen.V.S01E03.1080p.WEB.x264/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/torrents/cover%20art.jpg</D:href>
    <D:propstat>
      <D:prop><D:resourcetype/><D:getcontentlength>1024</D:getcontentlength></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/torrents/broken.mkv</D:href>
    <D:propstat>
      <D:prop><D:getcontentlength>999</D:getcontentlength></D:prop>
      <D:status>HTTP/1.1 404 Not Found</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn parses_dirs_and_files_and_decodes_percent_encoding() {
        let entries = parse_propfind_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 4);

        let dir = entries.iter().find(|e| e.name == "Gen.V.S01E03.1080p.WEB.x264").unwrap();
        assert!(dir.is_dir);

        let file = entries.iter().find(|e| e.name == "cover art.jpg").unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 1024);

        // 404 propstat contributes no properties but the response still has an href/name.
        let broken = entries.iter().find(|e| e.name == "broken.mkv").unwrap();
        assert_eq!(broken.size, 0);
    }

    #[test]
    fn filter_self_entry_removes_parent_with_or_without_slash() {
        let mut entries = parse_propfind_multistatus(MULTISTATUS).unwrap();
        filter_self_entry("/torrents", &mut entries);
        assert!(!entries.iter().any(|e| e.href == "/torrents/"));
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn basename_handles_trailing_slash_and_root() {
        assert_eq!(basename("/torrents/Foo/"), "Foo");
        assert_eq!(basename("/"), "/");
    }
}
