use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::SystemTime;

use dav_server::davpath::DavPath;
use dav_server::fs::*;
use futures_util::FutureExt;

use crate::stream::RangeStream;
use crate::upstream::UpstreamClient;
use crate::vfs::{Resolved, VirtualFile, VirtualFileSystem, VirtualNode};

/// Bridges the projection engine (C5) and range stream (C6) onto `dav-server`'s resource model.
/// Entirely read-only: every mutating call fails with `Forbidden`.
#[derive(Clone)]
pub struct MediaDavFileSystem {
    vfs: Arc<VirtualFileSystem>,
    upstream: Arc<UpstreamClient>,
}

impl MediaDavFileSystem {
    pub fn new(vfs: Arc<VirtualFileSystem>, upstream: Arc<UpstreamClient>) -> Self {
        Self { vfs, upstream }
    }

    fn path_str(path: &DavPath) -> String {
        path.as_rel_ospath()
            .to_str()
            .map(|s| if s == "." { String::new() } else { s.to_string() })
            .unwrap_or_default()
    }
}

impl DavFileSystem for MediaDavFileSystem {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            if options.write {
                return Err(FsError::Forbidden);
            }

            match self.vfs.resolve(&Self::path_str(path)).await {
                Some(Resolved::File(file)) => {
                    let stream = RangeStream::new(self.upstream.clone(), file.href.clone(), file.size);
                    Ok(Box::new(stream) as Box<dyn DavFile>)
                }
                Some(Resolved::Dir(_)) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        }
        .boxed()
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath, _meta: ReadDirMeta) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            match self.vfs.resolve(&Self::path_str(path)).await {
                Some(Resolved::Dir(dir)) => {
                    let entries: Vec<Box<dyn DavDirEntry>> = dir
                        .children
                        .iter()
                        .map(|(name, node)| {
                            Box::new(MediaDirEntry { name: name.clone(), node: node.clone() }) as Box<dyn DavDirEntry>
                        })
                        .collect();
                    let stream = futures_util::stream::iter(entries.into_iter().map(Ok));
                    Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
                }
                Some(Resolved::File(_)) => Err(FsError::Forbidden),
                None => Err(FsError::NotFound),
            }
        }
        .boxed()
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            match self.vfs.resolve(&Self::path_str(path)).await {
                Some(Resolved::Dir(_)) => Ok(Box::new(MediaMetaData::Dir) as Box<dyn DavMetaData>),
                Some(Resolved::File(file)) => Ok(Box::new(MediaMetaData::File(file)) as Box<dyn DavMetaData>),
                None => Err(FsError::NotFound),
            }
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn remove_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn remove_file<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn rename<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn copy<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }
}

#[derive(Debug, Clone)]
enum MediaMetaData {
    Dir,
    File(VirtualFile),
}

impl DavMetaData for MediaMetaData {
    fn len(&self) -> u64 {
        match self {
            MediaMetaData::Dir => 0,
            MediaMetaData::File(f) => f.size,
        }
    }
    fn modified(&self) -> FsResult<SystemTime> {
        Ok(SystemTime::now())
    }
    fn is_dir(&self) -> bool {
        matches!(self, MediaMetaData::Dir)
    }
    fn etag(&self) -> Option<String> {
        match self {
            MediaMetaData::Dir => None,
            MediaMetaData::File(f) => Some(file_etag(&f.href, f.size)),
        }
    }
}

fn file_etag(href: &str, size: u64) -> String {
    let mut hasher = DefaultHasher::new();
    href.hash(&mut hasher);
    format!("{}-{}", hasher.finish(), size)
}

struct MediaDirEntry {
    name: String,
    node: VirtualNode,
}

impl DavDirEntry for MediaDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move {
            let meta = match &self.node {
                VirtualNode::Dir(_) => MediaMetaData::Dir,
                VirtualNode::File(f) => MediaMetaData::File(f.clone()),
            };
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }
}

/// Maps a file extension to the MIME type a media client expects, falling back to an opaque
/// octet-stream for anything unrecognized.
pub fn mime_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "mkv" => "video/x-matroska",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "m4v" => "video/x-m4v",
        "ts" => "video/mp2t",
        "wmv" => "video/x-ms-wmv",
        "iso" => "application/x-iso9660-image",
        "vtt" => "text/vtt",
        "srt" | "sub" | "ass" | "ssa" => "text/plain",
        _ => "application/octet-stream",
    }
}
