//! # QR Code Cache
//!
//! Generates the verification QR code for a certificate's public URL and
//! memoizes the result by (URL, generation options). Verification URLs
//! rarely change after issuance, so the TTL is long.
//!
//! Generation failure returns the empty-string sentinel; the renderer
//! skips the QR element and the certificate still issues.

use super::TtlStore;
use log::{debug, warn};
use qrcode::{Color, QrCode};
use std::time::Duration;

/// Default time a generated QR stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default entry bound.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Error-correction level, mirroring the qrcode crate's four levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrEcLevel {
    Low,
    #[default]
    Medium,
    Quartile,
    High,
}

impl QrEcLevel {
    fn to_qrcode(self) -> qrcode::EcLevel {
        match self {
            Self::Low => qrcode::EcLevel::L,
            Self::Medium => qrcode::EcLevel::M,
            Self::Quartile => qrcode::EcLevel::Q,
            Self::High => qrcode::EcLevel::H,
        }
    }

    fn key_char(self) -> char {
        match self {
            Self::Low => 'L',
            Self::Medium => 'M',
            Self::Quartile => 'Q',
            Self::High => 'H',
        }
    }
}

/// QR generation options. Different options for the same URL are distinct
/// cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrOptions {
    pub ec_level: QrEcLevel,
    /// Quiet-zone border, in modules. 0 disables the border.
    pub margin: u32,
    /// Output image width/height in pixels.
    pub width: u32,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            ec_level: QrEcLevel::Medium,
            margin: 2,
            width: 300,
        }
    }
}

impl QrOptions {
    /// Stable serialization for key derivation.
    fn key_suffix(&self) -> String {
        format!(
            "ec={};margin={};width={}",
            self.ec_level.key_char(),
            self.margin,
            self.width
        )
    }
}

/// (URL, options) -> QR PNG data URL cache.
pub struct QrCache {
    store: TtlStore<String, String>,
}

impl Default for QrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QrCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_config(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: TtlStore::new(
                ttl,
                max_entries,
                TtlStore::<String, String>::tenth_of(max_entries),
            ),
        }
    }

    fn cache_key(url: &str, options: &QrOptions) -> String {
        format!("{url}\n{}", options.key_suffix())
    }

    /// Generate (or recall) the QR PNG data URL for a verification URL.
    /// Returns the empty-string sentinel on failure.
    pub fn data_url(&self, url: &str, options: &QrOptions) -> String {
        if url.is_empty() {
            return String::new();
        }

        let key = Self::cache_key(url, options);
        if let Some(cached) = self.store.get(&key) {
            debug!("qr cache hit for '{url}'");
            return cached;
        }

        debug!("qr cache miss for '{url}', generating");
        match generate_qr_png(url, options) {
            Ok(data_url) => {
                self.store.insert(key, data_url.clone());
                data_url
            }
            Err(e) => {
                warn!("qr generation for '{url}' failed, continuing without it: {e}");
                String::new()
            }
        }
    }

    pub fn invalidate(&self, url: &str, options: &QrOptions) -> bool {
        self.store.remove(&Self::cache_key(url, options))
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

/// Render a QR code to a PNG data URL. The module matrix is rasterized
/// directly; the qrcode crate's image feature is disabled.
fn generate_qr_png(url: &str, options: &QrOptions) -> Result<String, String> {
    use base64::Engine;

    let code = QrCode::with_error_correction_level(url.as_bytes(), options.ec_level.to_qrcode())
        .map_err(|e| format!("encoding failed: {e}"))?;

    let modules = code.width();
    let colors = code.to_colors();
    let margin = options.margin as usize;
    let total = modules + 2 * margin;

    // Scale up so the output is at least the requested width, square.
    let scale = ((options.width as usize + total - 1) / total).max(1);
    let size = (total * scale) as u32;

    let mut img = image::GrayImage::from_pixel(size, size, image::Luma([255u8]));
    for (i, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let mx = i % modules;
        let my = i / modules;
        let px0 = ((mx + margin) * scale) as u32;
        let py0 = ((my + margin) * scale) as u32;
        for dy in 0..scale as u32 {
            for dx in 0..scale as u32 {
                img.put_pixel(px0 + dx, py0 + dy, image::Luma([0u8]));
            }
        }
    }

    let mut png = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png);
    image::ImageEncoder::write_image(encoder, img.as_raw(), size, size, image::ColorType::L8)
        .map_err(|e| format!("png encoding failed: {e}"))?;

    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&png)
    ))
}
