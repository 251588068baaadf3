//! # Certificate Layout
//!
//! Converts a validated template plus resolved recipient values into the
//! flat list of draw commands the PDF serializer consumes.
//!
//! Certificates are absolutely positioned: every element carries its own
//! box in template pixels, so there is no flow, no page breaking, and a
//! render is always exactly one page. The work here is ordering
//! (background fill, background image, then elements by ascending
//! z-order), text wrapping/placement, and per-element fault isolation.
//!
//! Any single element's failure becomes a [`RenderWarning`] and the rest
//! of the certificate still renders. Partial output beats total failure;
//! callers inspect the warnings instead of scraping logs.

use log::{debug, warn};

use crate::font::FontContext;
use crate::image_loader::{self, LoadedImage};
use crate::model::{
    parse_hex_color, Element, ElementKind, RecipientData, Template, TextDecoration, TextStyle,
};
use crate::text::{PlacedLine, TextLayout};

/// An RGB color in the 0.0..=1.0 range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub fn from_hex(hex: &str) -> Self {
        let (r, g, b) = parse_hex_color(hex);
        Self { r, g, b }
    }
}

/// The single laid-out page of a certificate.
#[derive(Debug)]
pub struct LayoutPage {
    pub width: f64,
    pub height: f64,
    pub elements: Vec<LayoutElement>,
}

/// A positioned draw command. Coordinates are template-space (top-left
/// origin, y down); the PDF writer flips to PDF's bottom-left origin.
#[derive(Debug)]
pub struct LayoutElement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub draw: DrawCommand,
}

#[derive(Debug)]
pub enum DrawCommand {
    /// A filled rectangle (background fill, text decoration strokes).
    Rect { color: Rgb },

    /// A decoded image drawn into the element box.
    Image { image: LoadedImage },

    /// Positioned text lines sharing one font and color.
    Text {
        lines: Vec<PlacedLine>,
        color: Rgb,
        font_family: String,
        font_size: f64,
        font_weight: u32,
        italic: bool,
    },
}

/// A non-fatal degradation recorded during layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderWarning {
    /// Id of the degraded element, or `"background"`.
    pub element_id: String,
    pub reason: String,
}

impl RenderWarning {
    fn new(element_id: &str, reason: impl Into<String>) -> Self {
        let w = Self {
            element_id: element_id.to_string(),
            reason: reason.into(),
        };
        warn!("element '{}' degraded: {}", w.element_id, w.reason);
        w
    }
}

pub struct CertificateLayout {
    text: TextLayout,
}

impl Default for CertificateLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateLayout {
    pub fn new() -> Self {
        Self { text: TextLayout::new() }
    }

    /// Lay out one certificate.
    ///
    /// `values` is the fully resolved mapping (recipient data + system
    /// fields), `qr_image` the pre-generated QR data URL if the template
    /// has a QR element. All image sources must already be embeddable;
    /// remote URLs degrade to warnings here.
    pub fn layout(
        &self,
        template: &Template,
        values: &RecipientData,
        qr_image: Option<&str>,
        font_context: &FontContext,
    ) -> (LayoutPage, Vec<RenderWarning>) {
        let (width, height) = template.canvas.page_size();
        let mut elements = Vec::new();
        let mut warnings = Vec::new();

        // 1. Background color fills the full page.
        elements.push(LayoutElement {
            x: 0.0,
            y: 0.0,
            width,
            height,
            draw: DrawCommand::Rect {
                color: Rgb::from_hex(&template.background.color),
            },
        });

        // 2. Background image, stretched to the full page.
        if let Some(src) = &template.background.image {
            match self.load_embeddable("background", src) {
                Ok(image) => elements.push(LayoutElement {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                    draw: DrawCommand::Image { image },
                }),
                Err(w) => warnings.push(w),
            }
        }

        // 3. Elements in ascending z-order.
        for element in template.elements_by_z() {
            match self.layout_element(element, values, qr_image, font_context) {
                Ok(mut drawn) => elements.append(&mut drawn),
                Err(Some(w)) => warnings.push(w),
                Err(None) => {} // silent skip (e.g. QR with no image supplied)
            }
        }

        (LayoutPage { width, height, elements }, warnings)
    }

    /// Lay out a single element. `Err(Some(_))` is a degradation worth
    /// reporting; `Err(None)` is an expected skip.
    fn layout_element(
        &self,
        element: &Element,
        values: &RecipientData,
        qr_image: Option<&str>,
        font_context: &FontContext,
    ) -> Result<Vec<LayoutElement>, Option<RenderWarning>> {
        match &element.kind {
            ElementKind::Text { content, style } => {
                let resolved = crate::substitute::substitute(content, values);
                Ok(self.layout_text(element, &resolved, style, font_context))
            }

            ElementKind::Placeholder { tag, style } => {
                let resolved = match values.get(tag) {
                    Some(v) => v.clone(),
                    None => {
                        debug!(
                            "placeholder '{tag}' has no value for element '{}'; rendering empty",
                            element.id
                        );
                        String::new()
                    }
                };
                if resolved.is_empty() {
                    return Err(None);
                }
                Ok(self.layout_text(element, &resolved, style, font_context))
            }

            ElementKind::Image { src } => {
                let image = self.load_embeddable(&element.id, src).map_err(Some)?;
                Ok(vec![self.image_element(element, image)])
            }

            ElementKind::ImagePlaceholder { tag } => {
                let src = match values.get(tag) {
                    Some(v) if image_loader::is_embeddable(v) => v,
                    Some(_) | None => {
                        debug!(
                            "image placeholder '{tag}' has no usable value for element '{}'; skipping",
                            element.id
                        );
                        return Err(None);
                    }
                };
                let image = self.load_embeddable(&element.id, src).map_err(Some)?;
                Ok(vec![self.image_element(element, image)])
            }

            ElementKind::Qrcode => match qr_image {
                Some(src) if image_loader::is_embeddable(src) => {
                    let image = self.load_embeddable(&element.id, src).map_err(Some)?;
                    Ok(vec![self.image_element(element, image)])
                }
                // No QR supplied: skip silently, non-fatal.
                _ => Err(None),
            },
        }
    }

    fn layout_text(
        &self,
        element: &Element,
        content: &str,
        style: &TextStyle,
        font_context: &FontContext,
    ) -> Vec<LayoutElement> {
        let italic = matches!(
            style.font_style,
            crate::model::FontStyle::Italic | crate::model::FontStyle::Oblique
        );

        let lines = self.text.break_into_lines(
            font_context,
            content,
            element.frame.width,
            style.font_size,
            &style.font_family,
            style.font_weight,
            style.font_style,
        );
        let ascent = font_context.ascent(
            &style.font_family,
            style.font_weight,
            italic,
            style.font_size,
        );
        let placed = self
            .text
            .place_lines(&lines, &element.frame, style.align, style.font_size, ascent);

        let color = Rgb::from_hex(&style.color);
        let mut out = Vec::new();

        // Decoration strokes go under the text in the same color.
        if style.decoration != TextDecoration::None {
            for line in &placed {
                if line.width <= 0.0 {
                    continue;
                }
                let thickness = (style.font_size * 0.06).max(0.5);
                let offset = match style.decoration {
                    TextDecoration::Underline => style.font_size * 0.12,
                    TextDecoration::LineThrough => -style.font_size * 0.28,
                    TextDecoration::None => unreachable!(),
                };
                out.push(LayoutElement {
                    x: line.x,
                    y: line.y + offset,
                    width: line.width,
                    height: thickness,
                    draw: DrawCommand::Rect { color },
                });
            }
        }

        out.push(LayoutElement {
            x: element.frame.x,
            y: element.frame.y,
            width: element.frame.width,
            height: element.frame.height,
            draw: DrawCommand::Text {
                lines: placed,
                color,
                font_family: style.font_family.clone(),
                font_size: style.font_size,
                font_weight: style.font_weight,
                italic,
            },
        });
        out
    }

    fn image_element(&self, element: &Element, image: LoadedImage) -> LayoutElement {
        LayoutElement {
            x: element.frame.x,
            y: element.frame.y,
            width: element.frame.width,
            height: element.frame.height,
            draw: DrawCommand::Image { image },
        }
    }

    fn load_embeddable(&self, element_id: &str, src: &str) -> Result<LoadedImage, RenderWarning> {
        image_loader::load_image(src).map_err(|e| RenderWarning::new(element_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Background, CanvasSize, Frame, TextAlign};

    fn template_with(elements: Vec<Element>) -> Template {
        Template {
            id: "tpl-1".into(),
            name: "test".into(),
            canvas: CanvasSize {
                width: 1200.0,
                height: 850.0,
            },
            background: Background::default(),
            elements,
            placeholders: vec![],
            fonts: vec![],
        }
    }

    fn text_element(id: &str, content: &str) -> Element {
        Element::text(
            id,
            content,
            Frame {
                x: 100.0,
                y: 200.0,
                width: 300.0,
                height: 50.0,
            },
            TextStyle::default(),
        )
    }

    fn png_data_url() -> String {
        use base64::Engine;
        let mut img = image::RgbaImage::new(1, 1);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(encoder, img.as_raw(), 1, 1, image::ColorType::Rgba8)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&buf)
        )
    }

    fn layout(
        template: &Template,
        values: &RecipientData,
        qr: Option<&str>,
    ) -> (LayoutPage, Vec<RenderWarning>) {
        let fc = FontContext::new();
        CertificateLayout::new().layout(template, values, qr, &fc)
    }

    #[test]
    fn test_background_fill_is_first() {
        let t = template_with(vec![]);
        let (page, warnings) = layout(&t, &RecipientData::new(), None);
        assert!(warnings.is_empty());
        assert_eq!(page.width, 1200.0);
        assert_eq!(page.height, 850.0);
        assert!(matches!(
            page.elements[0].draw,
            DrawCommand::Rect { color } if color == Rgb { r: 1.0, g: 1.0, b: 1.0 }
        ));
    }

    #[test]
    fn test_text_element_substitutes_and_places() {
        let t = template_with(vec![text_element("t1", "Aluno: {{student_name}}")]);
        let mut values = RecipientData::new();
        values.insert("student_name".into(), "Maria Souza".into());
        let (page, warnings) = layout(&t, &values, None);
        assert!(warnings.is_empty());
        let text = page
            .elements
            .iter()
            .find_map(|e| match &e.draw {
                DrawCommand::Text { lines, .. } => Some(lines),
                _ => None,
            })
            .expect("text element present");
        assert_eq!(text[0].text, "Aluno: Maria Souza");
        assert_eq!(text[0].x, 100.0);
    }

    #[test]
    fn test_unreachable_image_degrades_not_fails() {
        let mut t = template_with(vec![text_element("t1", "hello")]);
        t.elements.push(Element {
            id: "img1".into(),
            kind: ElementKind::Image {
                src: "https://unreachable.example/x.png".into(),
            },
            frame: Frame {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
            z: 1,
        });
        let (page, warnings) = layout(&t, &RecipientData::new(), None);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].element_id, "img1");
        // Text still rendered
        assert!(page
            .elements
            .iter()
            .any(|e| matches!(e.draw, DrawCommand::Text { .. })));
    }

    #[test]
    fn test_qr_without_image_skips_silently() {
        let t = template_with(vec![Element::qrcode(
            "qr",
            Frame {
                x: 1000.0,
                y: 700.0,
                width: 120.0,
                height: 120.0,
            },
        )]);
        let (page, warnings) = layout(&t, &RecipientData::new(), None);
        assert!(warnings.is_empty());
        // Only the background fill
        assert_eq!(page.elements.len(), 1);
    }

    #[test]
    fn test_qr_with_image_draws_in_box() {
        let t = template_with(vec![Element::qrcode(
            "qr",
            Frame {
                x: 1000.0,
                y: 700.0,
                width: 120.0,
                height: 120.0,
            },
        )]);
        let url = png_data_url();
        let (page, warnings) = layout(&t, &RecipientData::new(), Some(&url));
        assert!(warnings.is_empty());
        let qr = page
            .elements
            .iter()
            .find(|e| matches!(e.draw, DrawCommand::Image { .. }))
            .expect("QR image drawn");
        assert_eq!(qr.x, 1000.0);
        assert_eq!(qr.width, 120.0);
    }

    #[test]
    fn test_z_order_respected() {
        let mut low = text_element("low", "under");
        low.z = 1;
        let mut high = text_element("high", "over");
        high.z = 10;
        let t = template_with(vec![high.clone(), low.clone()]);
        let (page, _) = layout(&t, &RecipientData::new(), None);
        let order: Vec<String> = page
            .elements
            .iter()
            .filter_map(|e| match &e.draw {
                DrawCommand::Text { lines, .. } => Some(lines[0].text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["under".to_string(), "over".to_string()]);
    }

    #[test]
    fn test_image_placeholder_resolves_from_values() {
        let t = template_with(vec![Element {
            id: "photo".into(),
            kind: ElementKind::ImagePlaceholder {
                tag: "student_photo".into(),
            },
            frame: Frame {
                x: 40.0,
                y: 40.0,
                width: 80.0,
                height: 100.0,
            },
            z: 0,
        }]);

        // Without a value: silent skip
        let (page, warnings) = layout(&t, &RecipientData::new(), None);
        assert!(warnings.is_empty());
        assert_eq!(page.elements.len(), 1);

        // With a data URL value: drawn
        let mut values = RecipientData::new();
        values.insert("student_photo".into(), png_data_url());
        let (page, warnings) = layout(&t, &values, None);
        assert!(warnings.is_empty());
        assert!(page
            .elements
            .iter()
            .any(|e| matches!(e.draw, DrawCommand::Image { .. })));
    }

    #[test]
    fn test_underline_adds_rect() {
        let mut style = TextStyle::default();
        style.decoration = TextDecoration::Underline;
        let t = template_with(vec![Element::text(
            "u",
            "underlined",
            Frame {
                x: 10.0,
                y: 10.0,
                width: 400.0,
                height: 30.0,
            },
            style,
        )]);
        let (page, _) = layout(&t, &RecipientData::new(), None);
        // background + underline rect + text
        let rects = page
            .elements
            .iter()
            .filter(|e| matches!(e.draw, DrawCommand::Rect { .. }))
            .count();
        assert_eq!(rects, 2);
    }

    #[test]
    fn test_placeholder_alignment_center() {
        let mut style = TextStyle::default();
        style.align = TextAlign::Center;
        let t = template_with(vec![Element {
            id: "p".into(),
            kind: ElementKind::Placeholder {
                tag: "name".into(),
                style,
            },
            frame: Frame {
                x: 0.0,
                y: 0.0,
                width: 200.0,
                height: 30.0,
            },
            z: 0,
        }]);
        let mut values = RecipientData::new();
        values.insert("name".into(), "Ana".into());
        let (page, _) = layout(&t, &values, None);
        let line = page
            .elements
            .iter()
            .find_map(|e| match &e.draw {
                DrawCommand::Text { lines, .. } => Some(&lines[0]),
                _ => None,
            })
            .unwrap();
        // Centered: x is inset by half the leftover width
        assert!((line.x - (200.0 - line.width) / 2.0).abs() < 1e-9);
    }
}
