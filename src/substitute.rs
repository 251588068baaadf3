//! # Placeholder Substitution
//!
//! Replaces `{{key}}` tokens in template text with recipient-supplied and
//! system-generated values. Pure string transforms, no I/O.
//!
//! Replacement is literal (replacement text is never re-scanned for tokens)
//! and global (every occurrence of a known token is replaced). Tokens whose
//! key is not in the value mapping pass through untouched, so a template can
//! carry decorative `{{...}}` text without erroring.

use crate::model::RecipientData;

/// System-generated fields merged into the recipient data before rendering.
///
/// Carried as plain strings so that rendering stays deterministic: the
/// orchestrator formats the date once and the renderer never consults a
/// clock.
#[derive(Debug, Clone)]
pub struct IssueContext {
    /// Unique certificate number, e.g. `CERT-123`.
    pub certificate_number: String,
    /// Formatted issuance date, e.g. `06/08/2026`.
    pub issue_date: String,
    /// Public verification URL for this certificate.
    pub verification_url: String,
}

/// Keys under which an email value is mirrored.
///
/// Downstream consumers never agreed on a single canonical key, so the
/// same value is exposed under every name they look for. Kept verbatim
/// for compatibility; see DESIGN.md.
const EMAIL_ALIASES: [&str; 3] = ["email", "recipient_email", "default_email"];

/// Replace every `{{key}}` token whose key exists in `values`.
///
/// Single left-to-right pass over the input; replacement text is emitted
/// verbatim and never re-scanned, so a value containing `{{...}}` cannot
/// trigger a second substitution.
pub fn substitute(text: &str, values: &RecipientData) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                if let Some(value) = values.get(key) {
                    out.push_str(&rest[..start]);
                    out.push_str(value);
                    rest = &after[end + 2..];
                } else {
                    // Unknown token passes through. Emit up to and including
                    // the opener, then keep scanning right after it so a
                    // later `{{` is still found.
                    out.push_str(&rest[..start + 2]);
                    rest = after;
                }
            }
            // Unterminated opener: nothing left to substitute.
            None => break,
        }
    }

    out.push_str(rest);
    out
}

/// Build the resolved value mapping for one issuance: recipient data merged
/// with the system fields `issue_date`, `certificate_id` and
/// `certificate_link`, with email aliasing applied.
pub fn resolved_values(recipient: &RecipientData, ctx: &IssueContext) -> RecipientData {
    let mut values = recipient.clone();

    values.insert("issue_date".to_string(), ctx.issue_date.clone());
    values.insert(
        "certificate_id".to_string(),
        ctx.certificate_number.clone(),
    );
    values.insert(
        "certificate_link".to_string(),
        ctx.verification_url.clone(),
    );

    // Mirror an email value across every alias key. First alias present in
    // the recipient data wins, matching the submission form's precedence.
    let email = EMAIL_ALIASES
        .iter()
        .find_map(|k| recipient.get(*k).cloned());
    if let Some(email) = email {
        for alias in EMAIL_ALIASES {
            values.entry(alias.to_string()).or_insert_with(|| email.clone());
        }
    }

    values
}
