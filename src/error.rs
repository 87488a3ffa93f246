use thiserror::Error;

/// Upstream transport failures, the only error this crate needs a named type for: metadata
/// misses and parse ambiguity are handled as graceful fallbacks (see `metadata::resolve` and
/// `parser::parse_media_info`), never surfaced as hard errors, and the VFS/WebDAV layers speak
/// `dav_server::fs::FsError` directly since they have no upstream-transport concern of their own.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

impl From<AppError> for dav_server::fs::FsError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::UpstreamUnavailable(_) => dav_server::fs::FsError::GeneralFailure,
        }
    }
}
