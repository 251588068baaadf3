//! # certo
//!
//! A certificate PDF rendering engine with layered caching.
//!
//! Certificates are authored visually: a fixed canvas, a background, and
//! absolutely positioned text/image/QR elements with `{{token}}`
//! placeholders. certo resolves recipient data into those placeholders,
//! wraps and positions text with real font metrics, and serializes a
//! single-page PDF whose page size equals the template canvas.
//!
//! ## Architecture
//!
//! ```text
//! Template + RecipientData (JSON/API)
//!       |
//!   [model]       - template, elements, validation at the boundary
//!       |
//!   [substitute]  - {{token}} resolution, system fields
//!       |
//!   [layout]      - wrap text, position elements, fault isolation
//!       |
//!   [pdf]         - serialize to PDF bytes
//!
//!   [cache]       - image / QR / rendered-PDF memoization
//!   [issue]       - orchestrator wired to store/email collaborators
//! ```
//!
//! Rendering is a pure function of its inputs: remote images are resolved
//! to data URLs beforehand (by the image cache), dates arrive as strings,
//! and the writer emits no timestamps. The same call twice returns
//! byte-identical PDFs, which is what makes the rendered-PDF cache safe.

pub mod cache;
pub mod error;
pub mod font;
pub mod image_loader;
pub mod issue;
pub mod layout;
pub mod model;
pub mod pdf;
pub mod substitute;
pub mod text;

pub use error::CertoError;
pub use layout::RenderWarning;
pub use substitute::IssueContext;

use font::FontContext;
use layout::CertificateLayout;
use model::{RecipientData, Template};
use pdf::PdfWriter;

/// The result of rendering one certificate: the PDF plus every non-fatal
/// degradation that occurred along the way.
#[derive(Debug)]
pub struct RenderOutcome {
    pub pdf: Vec<u8>,
    pub warnings: Vec<RenderWarning>,
}

/// Render a certificate to PDF bytes.
///
/// This is the primary entry point. `qr_image` is the pre-generated QR
/// data URL for templates that carry a QR element (see
/// [`cache::QrCache`]); pass `None` to skip the QR silently. All remote
/// image sources must be resolved to embeddable form beforehand; the
/// renderer itself performs no network I/O.
pub fn render_certificate(
    template: &Template,
    recipient: &RecipientData,
    qr_image: Option<&str>,
    ctx: &IssueContext,
) -> Result<RenderOutcome, CertoError> {
    template.validate()?;

    let values = substitute::resolved_values(recipient, ctx);
    let font_context = FontContext::for_template_fonts(&template.fonts);

    let (page, warnings) = CertificateLayout::new().layout(template, &values, qr_image, &font_context);
    let pdf = PdfWriter::new().write(&page, Some(&ctx.certificate_number), &font_context)?;

    Ok(RenderOutcome { pdf, warnings })
}

/// Render a certificate described as JSON to PDF bytes.
pub fn render_certificate_json(
    template_json: &str,
    recipient_json: &str,
    qr_image: Option<&str>,
    ctx: &IssueContext,
) -> Result<RenderOutcome, CertoError> {
    let template: Template = serde_json::from_str(template_json)?;
    let recipient: RecipientData = serde_json::from_str(recipient_json)?;
    render_certificate(&template, &recipient, qr_image, ctx)
}
