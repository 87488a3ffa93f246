use crate::parser::{parse_media_info, MediaInfo};
use crate::upstream::RawEntry;

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "iso", "m4v", "ts", "wmv"];
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "sub", "ass", "ssa", "vtt"];

/// A file beneath a torrent, merged with the torrent's own parse, ready for placement.
#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub entry: RawEntry,
    pub title: String,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub is_series: bool,
    pub is_subtitle: bool,
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

fn is_playable(name: &str) -> bool {
    match extension_of(name) {
        Some(ext) => VIDEO_EXTENSIONS.contains(&ext.as_str()) || SUBTITLE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

fn is_subtitle(name: &str) -> bool {
    matches!(extension_of(name), Some(ext) if SUBTITLE_EXTENSIONS.contains(&ext.as_str()))
}

/// Merges a torrent-level parse with a file-level parse: season and episode always come from the
/// file when the file has them (a pack's per-file name is the only place episode numbers live);
/// title and year prefer the torrent's parse, falling back to the file's when the torrent's own
/// name yielded nothing usable.
fn merge(torrent: &MediaInfo, file: &MediaInfo) -> (String, Option<u16>, Option<u32>, Option<u32>, bool) {
    let title = if torrent.title.trim().is_empty() {
        file.title.clone()
    } else {
        torrent.title.clone()
    };
    let year = torrent.year.or(file.year);
    let season = file.season.or(torrent.season);
    let episode = file.episode.or(torrent.episode);
    let is_series = season.is_some();
    (title, year, season, episode, is_series)
}

/// Classifies every playable file under a torrent, dropping artwork and non-media junk.
pub fn classify_torrent_files(torrent_name: &str, files: &[RawEntry]) -> Vec<ClassifiedFile> {
    let torrent_info = parse_media_info(torrent_name);

    files
        .iter()
        .filter(|f| is_playable(&f.name))
        .map(|f| {
            let file_info = parse_media_info(&f.name);
            let (title, year, season, episode, is_series) = merge(&torrent_info, &file_info);
            ClassifiedFile {
                entry: f.clone(),
                title,
                year,
                season,
                episode,
                is_series,
                is_subtitle: is_subtitle(&f.name),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> RawEntry {
        RawEntry {
            name: name.to_string(),
            href: format!("/torrents/x/{name}"),
            is_dir: false,
            size: 100,
        }
    }

    #[test]
    fn non_media_extensions_are_dropped() {
        let files = vec![file("cover.jpg"), file("movie.mkv")];
        let classified = classify_torrent_files("The.Matrix.1999.1080p.BluRay", &files);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].entry.name, "movie.mkv");
    }

    #[test]
    fn file_level_season_and_episode_win_over_torrent_all_caps_name() {
        let files = vec![file("GEN.V.S02.E05.mkv")];
        let classified = classify_torrent_files("GEN V", &files);
        assert_eq!(classified.len(), 1);
        let f = &classified[0];
        assert_eq!(f.title, "Gen V");
        assert_eq!(f.season, Some(2));
        assert_eq!(f.episode, Some(5));
        assert!(f.is_series);
    }

    #[test]
    fn season_pack_assigns_torrent_season_to_every_episode_file() {
        let files = vec![file("Show.Name.S03E01.mkv"), file("Show.Name.S03E02.mkv")];
        let classified = classify_torrent_files("Show.Name.S03.COMPLETE", &files);
        assert_eq!(classified.len(), 2);
        for f in &classified {
            assert_eq!(f.title, "Show Name");
            assert_eq!(f.season, Some(3));
        }
        assert_eq!(classified[0].episode, Some(1));
        assert_eq!(classified[1].episode, Some(2));
    }

    #[test]
    fn movie_torrent_has_no_season() {
        let files = vec![file("the.matrix.1999.mkv")];
        let classified = classify_torrent_files("www.UIndex.org    -    The.Matrix.1999.1080p.BluRay", &files);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].title, "The Matrix");
        assert_eq!(classified[0].year, Some(1999));
        assert!(!classified[0].is_series);
    }

    #[test]
    fn subtitle_files_are_kept_and_flagged() {
        let files = vec![file("Show.Name.S01E01.srt")];
        let classified = classify_torrent_files("Show.Name.S01.COMPLETE", &files);
        assert_eq!(classified.len(), 1);
        assert!(classified[0].is_subtitle);
    }
}
