use regex::Regex;

/// Parsed `(title, year, season, episode, kind)` tuple extracted from a torrent or file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub is_series: bool,
    pub original_name: String,
}

const QUALITY_KEYWORDS: &str = r"(?ix)\b(
    1080p|720p|480p|2160p|4k|
    bluray|blu-ray|bdrip|brrip|webrip|web-dl|webdl|
    hdtv|dvdrip|hdrip|remux|
    x264|x265|hevc|h264|h265|avc|
    aac|ac3|dts|truehd|atmos|hdr|
    proper|repack|extended|unrated|directors|remastered|complete
)\b";

fn site_prefix_re() -> Regex {
    Regex::new(r"(?i)^www\.\S+\.\w+\s*[-\u{2013}\u{2014}]\s*").unwrap()
}

fn year_re() -> Regex {
    Regex::new(r"\b(19|20)\d{2}\b").unwrap()
}

fn season_episode_re() -> Regex {
    Regex::new(r"(?i)s(\d{1,2})[\s._-]*e(\d{1,2})").unwrap()
}

fn season_episode_rescue_re() -> Regex {
    Regex::new(r"(?i)S(\d{1,2})E(\d{1,2})").unwrap()
}

fn season_only_rescue_re() -> Regex {
    // The `regex` crate has no look-around support, so the trailing `(?!E)` from the
    // original pattern is enforced by `season_only_rescue_match` instead.
    Regex::new(r"(?i)S(\d{1,2})").unwrap()
}

/// Equivalent to matching `season_only_rescue_re` followed by a negative lookahead for `E`:
/// returns the first match whose next character (if any) is not `e`/`E`.
fn season_only_rescue_match(haystack: &str) -> Option<regex::Captures<'_>> {
    season_only_rescue_re().captures_iter(haystack).find(|caps| {
        let m = caps.get(0).unwrap();
        !matches!(haystack[m.end()..].chars().next(), Some(c) if c.eq_ignore_ascii_case(&'e'))
    })
}

fn quality_re() -> Regex {
    Regex::new(QUALITY_KEYWORDS).unwrap()
}

fn clean_site_prefix(name: &str) -> String {
    site_prefix_re().replace(name, "").to_string()
}

/// Replaces underscores with dots when the name uses underscores as its only separator.
fn normalize_separators(name: &str) -> String {
    if !name.contains('.') && name.contains('_') {
        name.replace('_', ".")
    } else {
        name.to_string()
    }
}

fn title_case_if_all_caps(title: &str) -> String {
    if title.chars().any(|c| c.is_lowercase()) || title.chars().filter(|c| c.is_alphabetic()).count() <= 2 {
        return title.to_string();
    }
    title
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a torrent or file name into a `MediaInfo`. Never fails: an unparseable name falls back
/// to itself as the title (the name parser has no concept of failure, per the spec's "parse
/// ambiguity never blocks placement" policy — callers that need an explicit failure signal check
/// `title.is_empty()` instead).
pub fn parse_media_info(name: &str) -> MediaInfo {
    let prefixed_stripped = clean_site_prefix(name);
    let normalized = normalize_separators(&prefixed_stripped);

    let year = year_re()
        .find(&normalized)
        .and_then(|m| m.as_str().parse::<u16>().ok());

    let mut season = None;
    let mut episode = None;
    let mut cut_at = None;

    if let Some(caps) = season_episode_re().captures(&normalized) {
        let m = caps.get(0).unwrap();
        season = caps.get(1).and_then(|g| g.as_str().parse().ok());
        episode = caps.get(2).and_then(|g| g.as_str().parse().ok());
        cut_at = Some(m.start());
    } else if let Some(caps) = season_episode_rescue_re().captures(&normalized) {
        let m = caps.get(0).unwrap();
        season = caps.get(1).and_then(|g| g.as_str().parse().ok());
        episode = caps.get(2).and_then(|g| g.as_str().parse().ok());
        cut_at = Some(m.start());
    } else if let Some(caps) = season_only_rescue_match(&normalized) {
        let m = caps.get(0).unwrap();
        season = caps.get(1).and_then(|g| g.as_str().parse().ok());
        cut_at = Some(m.start());
    }

    if let Some(m) = year_re().find(&normalized) {
        cut_at = Some(cut_at.map_or(m.start(), |c| c.min(m.start())));
    }
    if let Some(m) = quality_re().find(&normalized) {
        cut_at = Some(cut_at.map_or(m.start(), |c| c.min(m.start())));
    }

    let title_raw = match cut_at {
        Some(idx) => &normalized[..idx],
        None => &normalized,
    };
    let title = title_raw.replace(['.', '_'], " ");
    let title = title.trim().trim_end_matches('.').trim().to_string();
    let title = title_case_if_all_caps(&title);
    let title = if title.is_empty() { normalized.clone() } else { title };

    MediaInfo {
        title,
        year,
        season,
        episode,
        is_series: season.is_some(),
        original_name: name.to_string(),
    }
}
