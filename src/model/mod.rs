//! # Certificate Template Model
//!
//! The input representation for the rendering engine. A template is a fixed
//! canvas with a background plus an ordered list of absolutely positioned
//! elements. This is designed to be easily produced by a visual editor, a
//! database row, or direct JSON construction.
//!
//! Elements are an internally tagged enum over the five drawable kinds, each
//! carrying only the fields that kind uses. Malformed templates are rejected
//! at the store boundary by [`Template::validate`] instead of failing deep
//! inside the renderer.

use crate::error::CertoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recipient-submitted values keyed by placeholder id (plus synthetic fields
/// such as `email`). A sorted map so that serialization is stable regardless
/// of insertion order, which the PDF cache key derivation relies on.
pub type RecipientData = BTreeMap<String, String>;

/// A complete certificate template ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Stable identifier, assigned by the template store.
    pub id: String,

    /// Human-readable name shown in the editor.
    #[serde(default)]
    pub name: String,

    /// Canvas dimensions in template pixels.
    pub canvas: CanvasSize,

    /// Page background, painted before any element.
    #[serde(default)]
    pub background: Background,

    /// Drawable elements. Painted in ascending z-order.
    #[serde(default)]
    pub elements: Vec<Element>,

    /// Declared placeholder contracts between the design and the
    /// issuance form.
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,

    /// Custom fonts to register before rendering. Family name,
    /// base64-encoded TTF data, weight, and style.
    #[serde(default)]
    pub fonts: Vec<FontEntry>,
}

/// Canvas dimensions in template pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    /// Page dimensions for the PDF writer.
    ///
    /// Template pixels map 1:1 to PDF user-space units, so a 1200x850
    /// canvas becomes a 1200x850 page. Orientation follows automatically:
    /// width > height reads as landscape.
    pub fn page_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

/// Page background: a solid color and/or a stretched image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    /// Fill color painted first. Hex string form (`#rrggbb`).
    #[serde(default = "default_background_color")]
    pub color: String,

    /// Optional background image source, stretched to the full page.
    /// A URL (resolved by the image cache before rendering), a data URL,
    /// or raw base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_background_color() -> String {
    "#ffffff".to_string()
}

impl Default for Background {
    fn default() -> Self {
        Self {
            color: default_background_color(),
            image: None,
        }
    }
}

/// A custom font to register with the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontEntry {
    /// Font family name (e.g. "Inter", "Roboto").
    pub family: String,
    /// Base64-encoded font data, or a data URI (e.g. "data:font/ttf;base64,...").
    pub src: String,
    /// Font weight (100-900). Defaults to 400.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Whether this is an italic variant.
    #[serde(default)]
    pub italic: bool,
}

fn default_weight() -> u32 {
    400
}

/// A positioned drawable unit within a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Unique id within the template.
    pub id: String,

    /// What this element draws.
    #[serde(flatten)]
    pub kind: ElementKind,

    /// Bounding box in template pixels.
    #[serde(flatten)]
    pub frame: Frame,

    /// Paint order. Lower values paint first.
    #[serde(default)]
    pub z: i32,
}

/// Bounding box in the template's pixel coordinate space. Origin is the
/// canvas top-left, y grows downward (editor convention; the PDF writer
/// flips to PDF's bottom-left origin).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The five element kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ElementKind {
    /// Literal text, possibly containing `{{token}}` references.
    Text {
        content: String,
        #[serde(flatten)]
        style: TextStyle,
    },

    /// Text bound to a declared placeholder. Resolved from recipient data
    /// at render time; renders the substituted content like `Text`.
    Placeholder {
        /// The placeholder id this element renders.
        tag: String,
        #[serde(flatten)]
        style: TextStyle,
    },

    /// A static bitmap with a fixed box.
    Image {
        /// Data URL, raw base64, file path, or a remote URL that the
        /// image cache resolves before rendering.
        src: String,
    },

    /// A named image slot filled from recipient-submitted data.
    ImagePlaceholder {
        /// The placeholder id whose value supplies the image.
        tag: String,
    },

    /// The verification QR code. Content is generated at render time;
    /// at most one per template.
    Qrcode,
}

/// Typography attributes shared by text and placeholder elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    /// Font size in template pixels.
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    /// Font weight (100-900).
    #[serde(default = "default_weight")]
    pub font_weight: u32,
    #[serde(default)]
    pub font_style: FontStyle,
    /// Text color. Hex string form (`#rrggbb`).
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default)]
    pub align: TextAlign,
    #[serde(default)]
    pub decoration: TextDecoration,
}

fn default_font_family() -> String {
    "Helvetica".to_string()
}

fn default_font_size() -> f64 {
    16.0
}

fn default_text_color() -> String {
    "#000000".to_string()
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
            font_weight: 400,
            font_style: FontStyle::Normal,
            color: default_text_color(),
            align: TextAlign::Left,
            decoration: TextDecoration::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    LineThrough,
}

/// A declared slot contract between the template design and the
/// issuance form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
    pub id: String,
    /// Label shown on the public submission form.
    pub label: String,
    #[serde(default)]
    pub kind: PlaceholderKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    #[default]
    Text,
    Image,
}

/// The persisted outcome of a successful issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    /// Unique, generated certificate number.
    pub certificate_number: String,
    /// Source template id.
    pub template_id: String,
    /// Snapshot of recipient data at issuance time.
    pub recipient_data: RecipientData,
    /// Optional recipient photo reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Public location of the rendered PDF.
    pub pdf_url: String,
    /// Issuance timestamp, RFC 3339.
    pub issued_at: String,
}

impl Template {
    /// Validate a template at the store boundary.
    ///
    /// Enforced invariants: positive canvas dimensions, unique element ids,
    /// at most one QR element, non-negative element boxes. A placeholder
    /// element referencing an undeclared tag is NOT an error; it resolves
    /// to empty at render time per the substitution contract.
    pub fn validate(&self) -> Result<(), CertoError> {
        if !(self.canvas.width > 0.0) || !(self.canvas.height > 0.0) {
            return Err(CertoError::InvalidTemplate(format!(
                "canvas dimensions must be positive, got {}x{}",
                self.canvas.width, self.canvas.height
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for element in &self.elements {
            if !seen.insert(element.id.as_str()) {
                return Err(CertoError::InvalidTemplate(format!(
                    "duplicate element id '{}'",
                    element.id
                )));
            }
            if element.frame.width < 0.0 || element.frame.height < 0.0 {
                return Err(CertoError::InvalidTemplate(format!(
                    "element '{}' has a negative box",
                    element.id
                )));
            }
        }

        let qr_count = self
            .elements
            .iter()
            .filter(|e| matches!(e.kind, ElementKind::Qrcode))
            .count();
        if qr_count > 1 {
            return Err(CertoError::InvalidTemplate(format!(
                "at most one qrcode element is allowed, found {qr_count}"
            )));
        }

        Ok(())
    }

    /// Elements in paint order (ascending z, stable for equal z).
    pub fn elements_by_z(&self) -> Vec<&Element> {
        let mut ordered: Vec<&Element> = self.elements.iter().collect();
        ordered.sort_by_key(|e| e.z);
        ordered
    }

    /// Look up a declared placeholder by id.
    pub fn placeholder(&self, id: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.id == id)
    }
}

impl Element {
    /// Create a text element. Convenience for tests and the CLI example.
    pub fn text(id: &str, content: &str, frame: Frame, style: TextStyle) -> Self {
        Self {
            id: id.to_string(),
            kind: ElementKind::Text {
                content: content.to_string(),
                style,
            },
            frame,
            z: 0,
        }
    }

    /// Create a QR element.
    pub fn qrcode(id: &str, frame: Frame) -> Self {
        Self {
            id: id.to_string(),
            kind: ElementKind::Qrcode,
            frame,
            z: 0,
        }
    }
}

/// Parse a `#rgb` / `#rrggbb` hex color into normalized RGB components.
/// Unparseable input yields black, matching the editor's fallback.
pub fn parse_hex_color(hex: &str) -> (f64, f64, f64) {
    let hex = hex.trim().trim_start_matches('#');
    let (r, g, b) = match hex.len() {
        3 => {
            let r = u8::from_str_radix(&hex[0..1].repeat(2), 16).unwrap_or(0);
            let g = u8::from_str_radix(&hex[1..2].repeat(2), 16).unwrap_or(0);
            let b = u8::from_str_radix(&hex[2..3].repeat(2), 16).unwrap_or(0);
            (r, g, b)
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
            let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
            let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
            (r, g, b)
        }
        _ => (0, 0, 0),
    };
    (
        r as f64 / 255.0,
        g as f64 / 255.0,
        b as f64 / 255.0,
    )
}
