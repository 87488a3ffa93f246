use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use std::fmt;
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture, FsResult};
use futures_util::Stream;
use futures_util::{FutureExt, StreamExt};

use crate::upstream::UpstreamClient;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send + Sync>>;

#[derive(Debug, Clone, Copy)]
struct RangeFileMetaData {
    size: u64,
}

impl DavMetaData for RangeFileMetaData {
    fn len(&self) -> u64 {
        self.size
    }
    fn modified(&self) -> FsResult<SystemTime> {
        Ok(SystemTime::now())
    }
    fn is_dir(&self) -> bool {
        false
    }
}

/// A seekable byte stream over a file served by the upstream WebDAV server. Opens lazily: the
/// first read (or the first read following a seek to a different position) issues a fresh
/// ranged GET and iterates 64 KiB chunks from there. Reads smaller than a chunk drain a leftover
/// buffer before pulling the next one from upstream.
pub struct RangeStream {
    upstream: Arc<UpstreamClient>,
    url: String,
    size: u64,
    pos: u64,
    body: Option<BodyStream>,
    leftover: BytesMut,
}

impl fmt::Debug for RangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeStream")
            .field("url", &self.url)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("has_body", &self.body.is_some())
            .field("leftover_len", &self.leftover.len())
            .finish()
    }
}

impl RangeStream {
    pub fn new(upstream: Arc<UpstreamClient>, url: String, size: u64) -> Self {
        Self {
            upstream,
            url,
            size,
            pos: 0,
            body: None,
            leftover: BytesMut::new(),
        }
    }

    async fn open_at(&mut self, offset: u64) -> Result<(), FsError> {
        let resp = self.upstream.open_range(&self.url, offset, None).await.map_err(FsError::from)?;
        self.body = Some(Box::pin(resp.bytes_stream()) as BodyStream);
        self.leftover.clear();
        self.pos = offset;
        Ok(())
    }

    async fn read_n(&mut self, n: usize) -> Result<Bytes, FsError> {
        if self.body.is_none() {
            self.open_at(self.pos).await?;
        }

        while self.leftover.len() < n {
            let Some(stream) = self.body.as_mut() else { break };
            match stream.next().await {
                Some(Ok(chunk)) => self.leftover.extend_from_slice(&chunk),
                Some(Err(_)) => return Err(FsError::GeneralFailure),
                None => break,
            }
        }

        let take = n.min(self.leftover.len());
        let data = self.leftover.split_to(take).freeze();
        self.pos += data.len() as u64;
        Ok(data)
    }
}

impl DavFile for RangeStream {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move { Ok(Box::new(RangeFileMetaData { size: self.size }) as Box<dyn DavMetaData>) }.boxed()
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        async move { Err(FsError::Forbidden) }.boxed()
    }

    fn read_bytes(&mut self, len: usize) -> FsFuture<'_, Bytes> {
        async move { self.read_n(len).await }.boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        async move {
            let requested = match pos {
                SeekFrom::Start(p) => p as i64,
                SeekFrom::Current(p) => self.pos as i64 + p,
                SeekFrom::End(p) => self.size as i64 + p,
            };
            let new_pos = requested.clamp(0, self.size as i64) as u64;

            if new_pos != self.pos {
                self.body = None;
                self.leftover.clear();
                self.pos = new_pos;
            }

            Ok(self.pos)
        }
        .boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async move { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_stream(chunks: Vec<&'static [u8]>) -> RangeStream {
        let mut s = RangeStream::new(
            Arc::new(UpstreamClient::new(&test_config())),
            "http://upstream.invalid/movie.mkv".to_string(),
            chunks.iter().map(|c| c.len() as u64).sum(),
        );
        s.body = Some(Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        )) as BodyStream);
        s
    }

    fn test_config() -> crate::config::Config {
        crate::config::Config {
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
    async fn short_reads_drain_leftover_before_pulling_the_next_chunk() {
        let mut s = fake_stream(vec![b"hello ", b"world"]);
        let first = s.read_n(3).await.unwrap();
        assert_eq!(&first[..], b"hel");
        let second = s.read_n(8).await.unwrap();
        assert_eq!(&second[..], b"lo world");
    }

    #[tokio::test]
    async fn range_composition_matches_reading_the_full_span_at_once() {
        let mut whole = fake_stream(vec![b"0123456789"]);
        let combined = whole.read_n(10).await.unwrap();

        let mut split = fake_stream(vec![b"0123456789"]);
        let first = split.read_n(4).await.unwrap();
        let rest = split.read_n(6).await.unwrap();
        let mut reassembled = first.to_vec();
        reassembled.extend_from_slice(&rest);

        assert_eq!(&combined[..], &reassembled[..]);
    }

    #[tokio::test]
    async fn seek_clamps_into_bounds_and_defers_reopen() {
        let mut s = fake_stream(vec![b"0123456789"]);
        assert_eq!(s.seek(SeekFrom::Start(1000)).await.unwrap(), 10);
        assert_eq!(s.seek(SeekFrom::Start(0)).await.unwrap(), 0);
        assert!(s.body.is_none());
    }
}
