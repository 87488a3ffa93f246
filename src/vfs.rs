use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::classifier::{classify_torrent_files, ClassifiedFile};
use crate::metadata::{MediaKind, MetadataResolver};
use crate::upstream::UpstreamClient;

/// A leaf: one playable file, addressable on the upstream WebDAV server.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub href: String,
    pub size: u64,
}

/// An interior node. Ordinary `HashMap` iteration order is fine: directory listings have no
/// ordering guarantee across requests.
#[derive(Debug, Clone, Default)]
pub struct VirtualDir {
    pub children: HashMap<String, VirtualNode>,
}

#[derive(Debug, Clone)]
pub enum VirtualNode {
    Dir(VirtualDir),
    File(VirtualFile),
}

impl VirtualDir {
    /// Gets or creates a child directory. Returns `None` when a file already occupies `name` —
    /// the caller skips the file being placed rather than clobbering the existing leaf.
    fn child_dir_mut(&mut self, name: &str) -> Option<&mut VirtualDir> {
        let entry = self
            .children
            .entry(name.to_string())
            .or_insert_with(|| VirtualNode::Dir(VirtualDir::default()));
        match entry {
            VirtualNode::Dir(dir) => Some(dir),
            VirtualNode::File(_) => None,
        }
    }
}

/// Replaces characters illegal in filesystem paths with a space, collapses whitespace runs, trims.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if "/\\:*?\"<>|".contains(c) { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn season_dir_name(season: Option<u32>) -> String {
    format!("Season {:02}", season.unwrap_or(1))
}

/// Walks a snapshot by path without touching freshness or the lock; shared by `resolve` and by
/// tests that want to check tree shape without driving a network rebuild.
pub fn resolve_in(root: &VirtualDir, path: &str) -> Option<Resolved> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Some(Resolved::Dir(Arc::new(root.clone())));
    }

    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        match current.children.get(*segment) {
            Some(VirtualNode::Dir(dir)) => current = dir,
            Some(VirtualNode::File(file)) if i == segments.len() - 1 => {
                return Some(Resolved::File(file.clone()))
            }
            _ => return None,
        }
    }

    Some(Resolved::Dir(Arc::new(current.clone())))
}

pub enum Resolved {
    Dir(Arc<VirtualDir>),
    File(VirtualFile),
}

/// Owns the current tree snapshot and drives rebuilds against the upstream client and the
/// metadata resolver. Readers never observe a half-built tree: `resolve` snapshots the `Arc`
/// under the lock and then walks it lock-free.
pub struct VirtualFileSystem {
    upstream: Arc<UpstreamClient>,
    metadata: Arc<MetadataResolver>,
    ttl: Duration,
    state: Mutex<(Arc<VirtualDir>, Instant)>,
}

impl VirtualFileSystem {
    pub fn new(upstream: Arc<UpstreamClient>, metadata: Arc<MetadataResolver>, ttl: Duration) -> Self {
        let empty = Arc::new(VirtualDir::default());
        Self {
            upstream,
            metadata,
            ttl,
            state: Mutex::new((empty, Instant::now() - ttl - Duration::from_secs(1))),
        }
    }

    /// Rebuilds unconditionally. Used for the synchronous startup build and the background
    /// ticker, both of which want an unconditional rebuild rather than a freshness check.
    pub async fn rebuild(&self) {
        let fresh_root = self.build_tree().await;
        let mut guard = self.state.lock().await;
        *guard = (Arc::new(fresh_root), Instant::now());
    }

    pub async fn ensure_fresh(&self) {
        let stale = {
            let guard = self.state.lock().await;
            guard.1.elapsed() > self.ttl
        };
        if stale {
            self.rebuild().await;
        }
    }

    /// Resolves a slash-separated path against the live snapshot after ensuring freshness.
    /// Root (`""`) resolves to the root directory.
    pub async fn resolve(&self, path: &str) -> Option<Resolved> {
        self.ensure_fresh().await;

        let root = {
            let guard = self.state.lock().await;
            guard.0.clone()
        };

        resolve_in(&root, path)
    }

    async fn build_tree(&self) -> VirtualDir {
        let mut root = VirtualDir::default();
        root.children.insert("Movies".to_string(), VirtualNode::Dir(VirtualDir::default()));
        root.children.insert("Series".to_string(), VirtualNode::Dir(VirtualDir::default()));

        let torrents = self.upstream.list_torrents().await;
        for torrent in torrents {
            let files = self.upstream.list_torrent_files(&torrent).await;
            if files.is_empty() {
                continue;
            }
            let classified = classify_torrent_files(&torrent.name, &files);
            for file in classified {
                self.place(&mut root, file).await;
            }
        }

        root
    }

    async fn place(&self, root: &mut VirtualDir, file: ClassifiedFile) {
        let href = self.upstream.file_url(&file.entry);
        let vfile = VirtualFile { href, size: file.entry.size };

        if file.is_series {
            let clean = self.metadata.resolve(&file.title, file.year, MediaKind::Series).await;
            let show_name = sanitize_name(&clean.unwrap_or_else(|| file.title.clone()));
            if show_name.is_empty() {
                warn!(title = %file.title, "skipping file with empty sanitized show title");
                return;
            }

            let Some(series_root) = root.child_dir_mut("Series") else { return };
            let Some(show_dir) = series_root.child_dir_mut(&show_name) else {
                warn!(show = %show_name, "skipping file: a leaf already occupies this show's directory name");
                return;
            };
            let Some(season_dir) = show_dir.child_dir_mut(&season_dir_name(file.season)) else {
                warn!(show = %show_name, "skipping file: a leaf already occupies this season's directory name");
                return;
            };
            season_dir
                .children
                .insert(file.entry.name.clone(), VirtualNode::File(vfile));
        } else {
            let clean = self.metadata.resolve(&file.title, file.year, MediaKind::Movie).await;
            let movie_name = match clean {
                Some(title) => title,
                None => match file.year {
                    Some(year) => format!("{} ({})", file.title, year),
                    None => file.title.clone(),
                },
            };
            let movie_name = sanitize_name(&movie_name);
            if movie_name.is_empty() {
                warn!(title = %file.title, "skipping file with empty sanitized movie title");
                return;
            }

            let Some(movies_root) = root.child_dir_mut("Movies") else { return };
            let Some(movie_dir) = movies_root.child_dir_mut(&movie_name) else {
                warn!(movie = %movie_name, "skipping file: a leaf already occupies this movie's directory name");
                return;
            };
            movie_dir
                .children
                .insert(file.entry.name.clone(), VirtualNode::File(vfile));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_illegal_characters_and_collapses_whitespace() {
        assert_eq!(sanitize_name("Gen V: Origins?"), "Gen V Origins");
        assert_eq!(sanitize_name("  Too   Many   Spaces  "), "Too Many Spaces");
    }

    #[test]
    fn season_dir_name_defaults_to_one_and_zero_pads() {
        assert_eq!(season_dir_name(None), "Season 01");
        assert_eq!(season_dir_name(Some(3)), "Season 03");
        assert_eq!(season_dir_name(Some(12)), "Season 12");
    }

    #[test]
    fn child_dir_mut_creates_nested_directories() {
        let mut root = VirtualDir::default();
        root.child_dir_mut("Series")
            .unwrap()
            .child_dir_mut("Gen V")
            .unwrap()
            .child_dir_mut("Season 01")
            .unwrap()
            .children
            .insert(
                "ep1.mkv".to_string(),
                VirtualNode::File(VirtualFile { href: "http://x/ep1.mkv".to_string(), size: 10 }),
            );

        let VirtualNode::Dir(series) = root.children.get("Series").unwrap() else { panic!() };
        let VirtualNode::Dir(show) = series.children.get("Gen V").unwrap() else { panic!() };
        let VirtualNode::Dir(season) = show.children.get("Season 01").unwrap() else { panic!() };
        assert!(season.children.contains_key("ep1.mkv"));
    }

    #[test]
    fn child_dir_mut_refuses_to_clobber_an_existing_file() {
        let mut root = VirtualDir::default();
        root.children.insert(
            "Gen V".to_string(),
            VirtualNode::File(VirtualFile { href: "http://x/Gen V".to_string(), size: 1 }),
        );
        assert!(root.child_dir_mut("Gen V").is_none());
    }

    #[test]
    fn resolve_in_walks_nested_paths_and_rejects_descending_into_files() {
        let mut root = VirtualDir::default();
        root.child_dir_mut("Series")
            .unwrap()
            .child_dir_mut("Gen V")
            .unwrap()
            .child_dir_mut("Season 01")
            .unwrap()
            .children
            .insert(
                "Gen.V.S01E03.1080p.WEB.x264.mkv".to_string(),
                VirtualNode::File(VirtualFile { href: "http://x/ep3.mkv".to_string(), size: 42 }),
            );

        match resolve_in(&root, "Series/Gen V/Season 01/Gen.V.S01E03.1080p.WEB.x264.mkv") {
            Some(Resolved::File(f)) => assert_eq!(f.size, 42),
            _ => panic!("expected a file"),
        }

        match resolve_in(&root, "Series/Gen V") {
            Some(Resolved::Dir(dir)) => assert!(dir.children.contains_key("Season 01")),
            _ => panic!("expected a directory"),
        }

        assert!(resolve_in(&root, "Series/Gen V/Season 01/Gen.V.S01E03.1080p.WEB.x264.mkv/extra").is_none());
        assert!(resolve_in(&root, "Movies/Nonexistent").is_none());
    }

    #[test]
    fn resolve_in_root_lists_top_level_collections() {
        let mut root = VirtualDir::default();
        root.children.insert("Movies".to_string(), VirtualNode::Dir(VirtualDir::default()));
        root.children.insert("Series".to_string(), VirtualNode::Dir(VirtualDir::default()));

        match resolve_in(&root, "") {
            Some(Resolved::Dir(dir)) => {
                let mut names: Vec<&String> = dir.children.keys().collect();
                names.sort();
                assert_eq!(names, vec!["Movies", "Series"]);
            }
            _ => panic!("expected root directory"),
        }
    }
}
