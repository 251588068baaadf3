//! # Image Fetch/Embed Cache
//!
//! Resolves remote image URLs (template backgrounds, recipient photos) to
//! inline data URLs the renderer can embed, memoized by source URL.
//!
//! A fetch failure returns the empty-string sentinel instead of an error:
//! a missing decorative image must never fail certificate issuance. The
//! caller treats the sentinel as "no image" and the renderer records a
//! warning for the affected element.

use super::TtlStore;
use log::{debug, warn};
use std::time::Duration;

/// Default time a fetched image stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);
/// Default entry bound.
pub const DEFAULT_MAX_ENTRIES: usize = 200;
/// Entries older than this are dropped by [`ImageCache::invalidate_stale`],
/// so template background updates show up without waiting out the full TTL.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// A fetched remote resource: raw bytes plus the server's content type.
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Abstracts the HTTP client so tests can inject fakes.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedImage, String>;
}

/// Production fetcher backed by a blocking reqwest client.
pub struct HttpImageFetcher {
    client: reqwest::blocking::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| format!("request to '{url}' failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("'{url}' returned status {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());

        let bytes = response
            .bytes()
            .map_err(|e| format!("reading body of '{url}' failed: {e}"))?
            .to_vec();

        Ok(FetchedImage { bytes, content_type })
    }
}

/// URL -> data URL cache.
pub struct ImageCache {
    store: TtlStore<String, String>,
    fetcher: Box<dyn ImageFetcher>,
    stale_after: Duration,
}

impl ImageCache {
    pub fn new(fetcher: Box<dyn ImageFetcher>) -> Self {
        Self::with_config(fetcher, DEFAULT_TTL, DEFAULT_MAX_ENTRIES, DEFAULT_STALE_AFTER)
    }

    pub fn with_config(
        fetcher: Box<dyn ImageFetcher>,
        ttl: Duration,
        max_entries: usize,
        stale_after: Duration,
    ) -> Self {
        Self {
            store: TtlStore::new(ttl, max_entries, TtlStore::<String, String>::tenth_of(max_entries)),
            fetcher,
            stale_after,
        }
    }

    /// Resolve a URL to a data URL, fetching on first use.
    ///
    /// Returns the empty-string sentinel on any failure; issuance carries
    /// on without the image.
    pub fn data_url(&self, url: &str) -> String {
        if url.is_empty() {
            return String::new();
        }

        if let Some(cached) = self.store.get(&url.to_string()) {
            debug!("image cache hit for '{url}'");
            return cached;
        }

        debug!("image cache miss for '{url}', fetching");
        match self.fetcher.fetch(url) {
            Ok(fetched) => {
                let data_url = encode_data_url(&fetched);
                self.store.insert(url.to_string(), data_url.clone());
                data_url
            }
            Err(e) => {
                warn!("image fetch failed, continuing without it: {e}");
                String::new()
            }
        }
    }

    /// Drop one URL, e.g. after a template background was replaced.
    pub fn invalidate(&self, url: &str) -> bool {
        self.store.remove(&url.to_string())
    }

    /// Drop every entry older than the stale threshold. Returns the
    /// number removed.
    pub fn invalidate_stale(&self) -> usize {
        self.store.remove_older_than(self.stale_after)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> &super::CacheStats {
        self.store.stats()
    }
}

/// Encode fetched bytes as a data URL. The server's content type wins when
/// it looks like an image type; otherwise the magic bytes decide.
fn encode_data_url(fetched: &FetchedImage) -> String {
    use base64::Engine;

    let mime = match &fetched.content_type {
        Some(ct) if ct.starts_with("image/") => ct.clone(),
        _ => sniff_mime(&fetched.bytes).to_string(),
    };

    let b64 = base64::engine::general_purpose::STANDARD.encode(&fetched.bytes);
    format!("data:{mime};base64,{b64}")
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
        "image/jpeg"
    } else if bytes.len() >= 4 && bytes[..4] == [0x89, 0x50, 0x4E, 0x47] {
        "image/png"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.len() >= 4 && &bytes[..4] == b"GIF8" {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}
