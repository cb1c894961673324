//! Download source kinds and the first-match resolver.
//!
//! Each kind claims URLs by predicate; the first claimant wins. Schemes
//! nothing claims, and kinds without a registered engine, surface as
//! `UNSUPPORTED`.

use crate::error::DownloadError;
use crate::http::HttpEngine;
use std::sync::Arc;

/// Kind of remote source a URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Http,
    Ftp,
    Torrent,
}

impl SourceKind {
    /// Tag stored on the persisted record.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Http => "http",
            SourceKind::Ftp => "ftp",
            SourceKind::Torrent => "torrent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "http" => Some(SourceKind::Http),
            "ftp" => Some(SourceKind::Ftp),
            "torrent" => Some(SourceKind::Torrent),
            _ => None,
        }
    }

    fn can_handle(self, url: &url::Url) -> bool {
        match self {
            SourceKind::Http => matches!(url.scheme(), "http" | "https"),
            SourceKind::Ftp => matches!(url.scheme(), "ftp" | "ftps"),
            SourceKind::Torrent => {
                url.scheme() == "magnet" || url.path().ends_with(".torrent")
            }
        }
    }

    /// First kind that claims the URL, in declaration order.
    pub fn for_url(url: &url::Url) -> Option<Self> {
        [SourceKind::Torrent, SourceKind::Http, SourceKind::Ftp]
            .into_iter()
            .find(|k| k.can_handle(url))
    }
}

/// Registered engines, one per source kind. Only HTTP ships an engine by
/// default; the other kinds resolve but report `UNSUPPORTED` until an
/// embedder registers one.
#[derive(Clone)]
pub struct SourceSet {
    engines: Vec<(SourceKind, Arc<dyn HttpEngine>)>,
}

impl SourceSet {
    pub fn with_http(engine: Arc<dyn HttpEngine>) -> Self {
        Self {
            engines: vec![(SourceKind::Http, engine)],
        }
    }

    pub fn register(&mut self, kind: SourceKind, engine: Arc<dyn HttpEngine>) {
        self.engines.retain(|(k, _)| *k != kind);
        self.engines.push((kind, engine));
    }

    /// Resolve a URL to its source kind and engine.
    pub fn resolve(&self, url: &str) -> Result<(SourceKind, Arc<dyn HttpEngine>), DownloadError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DownloadError::Unsupported(format!("invalid url {url:?}: {e}")))?;
        let kind = SourceKind::for_url(&parsed).ok_or_else(|| {
            DownloadError::Unsupported(format!("no source handles scheme {:?}", parsed.scheme()))
        })?;
        let engine = self
            .engines
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, e)| Arc::clone(e))
            .ok_or_else(|| {
                DownloadError::Unsupported(format!(
                    "no engine registered for {} sources",
                    kind.as_str()
                ))
            })?;
        Ok((kind, engine))
    }
}
