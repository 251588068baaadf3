//! Structured error types for the certo rendering engine.
//!
//! Only failures that abort an operation live here. Per-element render
//! degradation is not an error; it flows through `RenderOutcome::warnings`.

use thiserror::Error;

/// The unified error type returned by certo's fallible public API.
#[derive(Debug, Error)]
pub enum CertoError {
    /// JSON input failed to parse as a template or recipient-data document.
    #[error("failed to parse document: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    /// A template failed boundary validation (malformed canvas, duplicate
    /// element ids, more than one QR element).
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// A font could not be loaded, parsed, or embedded.
    #[error("font error: {0}")]
    Font(String),

    /// PDF generation failed in a way that cannot be degraded per-element.
    #[error("render error: {0}")]
    Render(String),
}
