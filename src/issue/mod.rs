//! # Certificate Issuance Orchestrator
//!
//! Ties the rendering core to its collaborators: template store, object
//! store, certificate record store, and email provider. Each collaborator
//! is a trait so tests run against in-memory fakes and deployments plug
//! in their hosted services.
//!
//! One issuance request runs the pipeline:
//!
//! ```text
//! validate -> load template -> resolve images (fan-out, all-settle)
//!   -> PDF cache check -> [miss: render + QR, cache result]
//!   -> upload PDF -> insert-or-update record -> notify (fire-and-forget)
//! ```
//!
//! The notification step can never fail the request; its errors are
//! logged and surfaced through monitoring only. A PDF upload failure
//! aborts before the record is written, so no record ever points at a
//! missing file.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::cache::{ImageCache, PdfCache, QrCache, QrOptions};
use crate::error::CertoError;
use crate::image_loader;
use crate::layout::RenderWarning;
use crate::model::{
    ElementKind, IssuedCertificate, PlaceholderKind, RecipientData, Template,
};
use crate::substitute::IssueContext;

/// Loads templates by id. Backed by the hosted database in production.
pub trait TemplateStore: Send + Sync {
    fn load_template(&self, id: &str) -> Result<Option<Template>, String>;
}

/// Stores rendered PDFs. Backed by the hosted blob store in production.
pub trait ObjectStore: Send + Sync {
    /// Upload bytes and return the public URL.
    fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String, String>;
}

/// Persists certificate records.
pub trait CertificateStore: Send + Sync {
    fn find_by_number(&self, number: &str) -> Result<Option<IssuedCertificate>, String>;
    /// Insert a new record or replace the one with the same number.
    fn upsert(&self, record: &IssuedCertificate) -> Result<(), String>;
}

/// Sends notification email. Backed by the hosted provider in production.
pub trait EmailProvider: Send + Sync {
    /// Returns the provider's message id on success.
    fn send(&self, message: &EmailMessage) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One issuance request from the public form or the dashboard.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub template_id: String,
    pub recipient: RecipientData,
    /// Present on re-issue: the certificate number being updated.
    pub certificate_number: Option<String>,
    /// Re-issue identity proof, matched against the stored snapshot.
    pub cpf: Option<String>,
    pub birth_date: Option<String>,
    /// Where to send the notification email. Falls back to the
    /// recipient's email field when absent.
    pub notify_email: Option<String>,
}

/// The successful outcome of an issuance.
#[derive(Debug)]
pub struct IssueOutcome {
    pub certificate: IssuedCertificate,
    pub pdf: Vec<u8>,
    pub warnings: Vec<RenderWarning>,
    /// The PDF came from the rendered-PDF cache.
    pub from_cache: bool,
    /// This request updated an existing certificate in place.
    pub reissued: bool,
}

/// Fatal issuance errors. Everything recoverable degraded into
/// [`RenderWarning`]s instead.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template store error: {0}")]
    Store(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Render(#[from] CertoError),
}

impl IssueError {
    /// The message shown to end users. Validation problems are surfaced
    /// verbatim so people can fix their own input; storage and render
    /// internals are not.
    pub fn user_message(&self) -> String {
        match self {
            IssueError::Validation(msg) => msg.clone(),
            IssueError::TemplateNotFound(_) => {
                "This certificate template is not available.".to_string()
            }
            IssueError::Store(_) | IssueError::Upload(_) | IssueError::Render(_) => {
                "Certificate generation failed. Please try again later.".to_string()
            }
        }
    }
}

/// Email retry policy: `attempts` tries with delays of
/// `base_delay * 2^n` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Base of the public verification URL; the certificate number is
    /// appended.
    pub verification_base_url: String,
    /// Object-store path prefix for rendered PDFs.
    pub pdf_path_prefix: String,
    pub email_retry: RetryPolicy,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            verification_base_url: "https://localhost/verify".to_string(),
            pdf_path_prefix: "certificates".to_string(),
            email_retry: RetryPolicy::default(),
        }
    }
}

/// The issuance orchestrator. Long-lived; owns the caches.
pub struct Issuer {
    templates: Arc<dyn TemplateStore>,
    objects: Arc<dyn ObjectStore>,
    certificates: Arc<dyn CertificateStore>,
    email: Arc<dyn EmailProvider>,
    image_cache: Arc<ImageCache>,
    pdf_cache: Arc<PdfCache>,
    qr_cache: Arc<QrCache>,
    config: IssuerConfig,
}

impl Issuer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        objects: Arc<dyn ObjectStore>,
        certificates: Arc<dyn CertificateStore>,
        email: Arc<dyn EmailProvider>,
        image_cache: Arc<ImageCache>,
        pdf_cache: Arc<PdfCache>,
        qr_cache: Arc<QrCache>,
        config: IssuerConfig,
    ) -> Self {
        Self {
            templates,
            objects,
            certificates,
            email,
            image_cache,
            pdf_cache,
            qr_cache,
            config,
        }
    }

    /// Run one issuance request end to end.
    pub fn issue(&self, request: &IssueRequest) -> Result<IssueOutcome, IssueError> {
        if request.template_id.is_empty() {
            return Err(IssueError::Validation("template id is required".into()));
        }

        let template = self
            .templates
            .load_template(&request.template_id)
            .map_err(IssueError::Store)?
            .ok_or_else(|| IssueError::TemplateNotFound(request.template_id.clone()))?;
        template
            .validate()
            .map_err(|e| IssueError::Store(e.to_string()))?;

        self.check_required_fields(&template, &request.recipient)?;

        // Re-issue is recognized by an existing number plus matching
        // identity proof; anything else falls through to fresh issuance.
        let (certificate_number, reissued) = self.resolve_certificate_number(request)?;
        if reissued {
            info!("re-issuing certificate {certificate_number}");
            self.pdf_cache
                .force_invalidate(&request.template_id, &request.recipient);
        }

        let ctx = IssueContext {
            certificate_number: certificate_number.clone(),
            issue_date: chrono::Local::now().format("%d/%m/%Y").to_string(),
            verification_url: format!(
                "{}/{certificate_number}",
                self.config.verification_base_url.trim_end_matches('/')
            ),
        };

        // Resolve every remote image up front so the renderer stays pure.
        let (template, recipient) = self.resolve_images(template, request.recipient.clone());

        let cached = self.pdf_cache.get(&request.template_id, &request.recipient);
        let from_cache = cached.is_some();
        let (pdf, warnings) = match cached {
            Some(pdf) => (pdf, Vec::new()),
            None => {
                let qr = self.qr_for_template(&template, &ctx);
                let outcome =
                    crate::render_certificate(&template, &recipient, qr.as_deref(), &ctx)?;
                self.pdf_cache
                    .set(&request.template_id, &request.recipient, outcome.pdf.clone());
                (outcome.pdf, outcome.warnings)
            }
        };

        // Upload before touching the record: a failed upload must never
        // leave a record pointing at a missing file.
        let path = format!(
            "{}/{certificate_number}.pdf",
            self.config.pdf_path_prefix.trim_end_matches('/')
        );
        let pdf_url = self
            .objects
            .upload(&path, &pdf, "application/pdf")
            .map_err(IssueError::Upload)?;

        let record = IssuedCertificate {
            certificate_number: certificate_number.clone(),
            template_id: request.template_id.clone(),
            recipient_data: request.recipient.clone(),
            // The snapshot keeps the submitted URL, not the resolved data URL.
            photo_url: self.photo_reference(&template, &request.recipient),
            pdf_url,
            issued_at: chrono::Utc::now().to_rfc3339(),
        };
        self.certificates
            .upsert(&record)
            .map_err(IssueError::Store)?;

        self.notify(request, &record, &pdf);

        info!(
            "issued certificate {certificate_number} (cache {}, {} warnings)",
            if from_cache { "hit" } else { "miss" },
            warnings.len()
        );

        Ok(IssueOutcome {
            certificate: record,
            pdf,
            warnings,
            from_cache,
            reissued,
        })
    }

    /// Text placeholders that elements actually reference must be present
    /// in the recipient data; the submission form enforces them, and a
    /// request bypassing the form gets a correctable validation error.
    fn check_required_fields(
        &self,
        template: &Template,
        recipient: &RecipientData,
    ) -> Result<(), IssueError> {
        let referenced: HashSet<&str> = template
            .elements
            .iter()
            .filter_map(|e| match &e.kind {
                ElementKind::Placeholder { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect();

        let missing: Vec<&str> = template
            .placeholders
            .iter()
            .filter(|p| p.kind == PlaceholderKind::Text)
            .filter(|p| referenced.contains(p.id.as_str()))
            .filter(|p| !recipient.contains_key(&p.id))
            .map(|p| p.id.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(IssueError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Decide the certificate number. `(number, true)` means an update of
    /// an existing certificate.
    fn resolve_certificate_number(
        &self,
        request: &IssueRequest,
    ) -> Result<(String, bool), IssueError> {
        if let Some(number) = &request.certificate_number {
            let existing = self
                .certificates
                .find_by_number(number)
                .map_err(IssueError::Store)?;
            if let Some(existing) = existing {
                if self.identity_matches(request, &existing) {
                    return Ok((number.clone(), true));
                }
                debug!(
                    "certificate {number} exists but identity proof mismatched; issuing fresh"
                );
            }
        }
        Ok((generate_certificate_number(request), false))
    }

    fn identity_matches(&self, request: &IssueRequest, existing: &IssuedCertificate) -> bool {
        let stored_cpf = existing.recipient_data.get("cpf");
        let stored_birth = existing.recipient_data.get("birth_date");
        match (&request.cpf, &request.birth_date) {
            (Some(cpf), Some(birth)) => {
                stored_cpf.map(String::as_str) == Some(cpf.as_str())
                    && stored_birth.map(String::as_str) == Some(birth.as_str())
            }
            _ => false,
        }
    }

    /// Fan out image resolution across the template's remote sources and
    /// the recipient's image values. All-settle: one failed fetch leaves
    /// its sentinel and the rest proceed.
    fn resolve_images(
        &self,
        mut template: Template,
        mut recipient: RecipientData,
    ) -> (Template, RecipientData) {
        let mut urls: HashSet<String> = HashSet::new();

        if let Some(src) = &template.background.image {
            if image_loader::is_remote(src) {
                urls.insert(src.clone());
            }
        }
        for element in &template.elements {
            if let ElementKind::Image { src } = &element.kind {
                if image_loader::is_remote(src) {
                    urls.insert(src.clone());
                }
            }
        }
        for value in recipient.values() {
            if image_loader::is_remote(value) {
                urls.insert(value.clone());
            }
        }

        if urls.is_empty() {
            return (template, recipient);
        }

        let resolved: BTreeMap<String, String> = urls
            .into_par_iter()
            .map(|url| {
                let data_url = self.image_cache.data_url(&url);
                (url, data_url)
            })
            .collect();

        let lookup = |src: &str| resolved.get(src).cloned();

        if let Some(src) = template.background.image.clone() {
            if let Some(data_url) = lookup(&src) {
                template.background.image =
                    if data_url.is_empty() { None } else { Some(data_url) };
            }
        }
        for element in &mut template.elements {
            if let ElementKind::Image { src } = &mut element.kind {
                if let Some(data_url) = lookup(src) {
                    *src = data_url;
                }
            }
        }
        for value in recipient.values_mut() {
            if let Some(data_url) = lookup(value) {
                *value = data_url;
            }
        }

        (template, recipient)
    }

    /// Generate the QR data URL if the template carries a QR element.
    fn qr_for_template(&self, template: &Template, ctx: &IssueContext) -> Option<String> {
        let has_qr = template
            .elements
            .iter()
            .any(|e| matches!(e.kind, ElementKind::Qrcode));
        if !has_qr {
            return None;
        }
        let data_url = self
            .qr_cache
            .data_url(&ctx.verification_url, &QrOptions::default());
        if data_url.is_empty() {
            None
        } else {
            Some(data_url)
        }
    }

    /// The stored photo reference: the resolved value of the first image
    /// placeholder, if any.
    fn photo_reference(&self, template: &Template, recipient: &RecipientData) -> Option<String> {
        template.elements.iter().find_map(|e| match &e.kind {
            ElementKind::ImagePlaceholder { tag } => {
                recipient.get(tag).filter(|v| !v.is_empty()).cloned()
            }
            _ => None,
        })
    }

    /// Fire-and-forget notification. Failure is logged and never fails
    /// the request.
    fn notify(&self, request: &IssueRequest, record: &IssuedCertificate, pdf: &[u8]) {
        let to = request
            .notify_email
            .clone()
            .or_else(|| record.recipient_data.get("email").cloned())
            .or_else(|| record.recipient_data.get("default_email").cloned());
        let to = match to {
            Some(to) if !to.is_empty() => to,
            _ => {
                debug!("no notification address for {}", record.certificate_number);
                return;
            }
        };

        let message = EmailMessage {
            to,
            subject: format!("Your certificate {}", record.certificate_number),
            html: format!(
                "<p>Your certificate is ready. Download: <a href=\"{0}\">{0}</a></p>",
                record.pdf_url
            ),
            attachments: vec![EmailAttachment {
                filename: format!("{}.pdf", record.certificate_number),
                content_type: "application/pdf".to_string(),
                bytes: pdf.to_vec(),
            }],
        };

        let provider = Arc::clone(&self.email);
        let policy = self.config.email_retry.clone();
        let number = record.certificate_number.clone();
        std::thread::spawn(move || {
            if let Err(e) = send_with_retry(provider.as_ref(), &message, &policy) {
                error!("notification for {number} failed after retries: {e}");
            }
        });
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.image_cache
    }

    pub fn pdf_cache(&self) -> &PdfCache {
        &self.pdf_cache
    }

    pub fn qr_cache(&self) -> &QrCache {
        &self.qr_cache
    }
}

/// Send with exponential backoff. Synchronous; the orchestrator runs it
/// on a spawned thread.
pub fn send_with_retry(
    provider: &dyn EmailProvider,
    message: &EmailMessage,
    policy: &RetryPolicy,
) -> Result<String, String> {
    let mut last_err = String::new();
    for attempt in 0..policy.attempts.max(1) {
        if attempt > 0 {
            let delay = policy.base_delay * 2u32.pow(attempt - 1);
            std::thread::sleep(delay);
        }
        match provider.send(message) {
            Ok(message_id) => {
                debug!("notification to {} sent ({message_id})", message.to);
                return Ok(message_id);
            }
            Err(e) => {
                warn!(
                    "notification attempt {}/{} failed: {e}",
                    attempt + 1,
                    policy.attempts
                );
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Generate a fresh certificate number: time component plus a short hash
/// of the request so two issuances in the same millisecond stay distinct.
fn generate_certificate_number(request: &IssueRequest) -> String {
    use std::hash::{Hash, Hasher};

    let now = chrono::Utc::now();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    request.template_id.hash(&mut hasher);
    for (k, v) in &request.recipient {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    now.timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);

    format!(
        "CERT-{}-{:04X}",
        now.format("%Y%m%d%H%M%S"),
        (hasher.finish() & 0xFFFF) as u16
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FetchedImage, ImageFetcher};
    use crate::model::{Background, CanvasSize, Element, Frame, Placeholder, TextStyle};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FakeTemplates {
        template: Template,
    }

    impl TemplateStore for FakeTemplates {
        fn load_template(&self, id: &str) -> Result<Option<Template>, String> {
            if id == self.template.id {
                Ok(Some(self.template.clone()))
            } else {
                Ok(None)
            }
        }
    }

    #[derive(Default)]
    struct FakeObjects {
        uploads: Mutex<Vec<String>>,
        fail: bool,
    }

    impl ObjectStore for FakeObjects {
        fn upload(&self, path: &str, _bytes: &[u8], _ct: &str) -> Result<String, String> {
            if self.fail {
                return Err("quota exceeded".to_string());
            }
            self.uploads.lock().unwrap().push(path.to_string());
            Ok(format!("https://storage.example/{path}"))
        }
    }

    #[derive(Default)]
    struct FakeCertificates {
        records: Mutex<Vec<IssuedCertificate>>,
    }

    impl CertificateStore for FakeCertificates {
        fn find_by_number(&self, number: &str) -> Result<Option<IssuedCertificate>, String> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.certificate_number == number)
                .cloned())
        }

        fn upsert(&self, record: &IssuedCertificate) -> Result<(), String> {
            let mut records = self.records.lock().unwrap();
            records.retain(|r| r.certificate_number != record.certificate_number);
            records.push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEmail {
        sent: Mutex<Vec<EmailMessage>>,
        failures_before_success: AtomicU32,
    }

    impl EmailProvider for FakeEmail {
        fn send(&self, message: &EmailMessage) -> Result<String, String> {
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err("smtp timeout".to_string());
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok("msg-1".to_string())
        }
    }

    struct NoFetch;
    impl ImageFetcher for NoFetch {
        fn fetch(&self, url: &str) -> Result<FetchedImage, String> {
            Err(format!("unreachable: {url}"))
        }
    }

    fn test_template() -> Template {
        Template {
            id: "tpl-1".into(),
            name: "Course Certificate".into(),
            canvas: CanvasSize {
                width: 1200.0,
                height: 850.0,
            },
            background: Background::default(),
            elements: vec![
                Element::text(
                    "title",
                    "Aluno: {{student_name}}",
                    Frame {
                        x: 100.0,
                        y: 200.0,
                        width: 300.0,
                        height: 50.0,
                    },
                    TextStyle::default(),
                ),
                Element {
                    id: "p1".into(),
                    kind: ElementKind::Placeholder {
                        tag: "student_name".into(),
                        style: TextStyle::default(),
                    },
                    frame: Frame {
                        x: 100.0,
                        y: 300.0,
                        width: 400.0,
                        height: 40.0,
                    },
                    z: 1,
                },
                Element::qrcode(
                    "qr",
                    Frame {
                        x: 1000.0,
                        y: 700.0,
                        width: 120.0,
                        height: 120.0,
                    },
                ),
            ],
            placeholders: vec![Placeholder {
                id: "student_name".into(),
                label: "Nome do aluno".into(),
                kind: PlaceholderKind::Text,
            }],
            fonts: vec![],
        }
    }

    struct Fixture {
        issuer: Issuer,
        objects: Arc<FakeObjects>,
        certificates: Arc<FakeCertificates>,
        email: Arc<FakeEmail>,
    }

    fn fixture_with(template: Template, objects: FakeObjects, email: FakeEmail) -> Fixture {
        let objects = Arc::new(objects);
        let certificates = Arc::new(FakeCertificates::default());
        let email = Arc::new(email);
        let issuer = Issuer::new(
            Arc::new(FakeTemplates { template }),
            Arc::clone(&objects) as Arc<dyn ObjectStore>,
            Arc::clone(&certificates) as Arc<dyn CertificateStore>,
            Arc::clone(&email) as Arc<dyn EmailProvider>,
            Arc::new(ImageCache::new(Box::new(NoFetch))),
            Arc::new(PdfCache::new()),
            Arc::new(QrCache::new()),
            IssuerConfig {
                verification_base_url: "https://certs.example/verify".into(),
                pdf_path_prefix: "certificates".into(),
                email_retry: RetryPolicy {
                    attempts: 3,
                    base_delay: Duration::from_millis(1),
                },
            },
        );
        Fixture {
            issuer,
            objects,
            certificates,
            email,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_template(), FakeObjects::default(), FakeEmail::default())
    }

    fn request() -> IssueRequest {
        let mut recipient = RecipientData::new();
        recipient.insert("student_name".into(), "Maria Souza".into());
        IssueRequest {
            template_id: "tpl-1".into(),
            recipient,
            ..Default::default()
        }
    }

    #[test]
    fn test_issue_happy_path() {
        let f = fixture();
        let outcome = f.issuer.issue(&request()).unwrap();
        assert!(outcome.pdf.starts_with(b"%PDF-1.7"));
        assert!(!outcome.from_cache);
        assert!(!outcome.reissued);
        assert!(outcome.certificate.certificate_number.starts_with("CERT-"));
        assert!(outcome
            .certificate
            .pdf_url
            .starts_with("https://storage.example/certificates/"));
        assert_eq!(f.certificates.records.lock().unwrap().len(), 1);
        assert_eq!(f.objects.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_second_issue_hits_pdf_cache() {
        let f = fixture();
        let first = f.issuer.issue(&request()).unwrap();
        let second = f.issuer.issue(&request()).unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.pdf, second.pdf, "cache hit must be byte-identical");
    }

    #[test]
    fn test_unknown_template_is_fatal() {
        let f = fixture();
        let mut req = request();
        req.template_id = "nope".into();
        let err = f.issuer.issue(&req).unwrap_err();
        assert!(matches!(err, IssueError::TemplateNotFound(_)));
        assert_eq!(
            err.user_message(),
            "This certificate template is not available."
        );
    }

    #[test]
    fn test_missing_required_field_is_fatal_and_verbatim() {
        let f = fixture();
        let mut req = request();
        req.recipient.clear();
        let err = f.issuer.issue(&req).unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));
        assert!(err.user_message().contains("student_name"));
    }

    #[test]
    fn test_upload_failure_leaves_no_record() {
        let f = fixture_with(
            test_template(),
            FakeObjects {
                fail: true,
                ..Default::default()
            },
            FakeEmail::default(),
        );
        let err = f.issuer.issue(&request()).unwrap_err();
        assert!(matches!(err, IssueError::Upload(_)));
        assert!(f.certificates.records.lock().unwrap().is_empty());
    }

    #[test]
    fn test_email_failure_does_not_fail_issue() {
        let email = FakeEmail::default();
        email.failures_before_success.store(100, Ordering::SeqCst);
        let f = fixture_with(test_template(), FakeObjects::default(), email);
        let mut req = request();
        req.notify_email = Some("ana@example.com".into());
        let outcome = f.issuer.issue(&req);
        assert!(outcome.is_ok(), "email failure must never fail issuance");
    }

    #[test]
    fn test_notification_sent_with_attachment() {
        let f = fixture();
        let mut req = request();
        req.notify_email = Some("ana@example.com".into());
        f.issuer.issue(&req).unwrap();
        // Fire-and-forget: give the notifier thread a moment.
        for _ in 0..100 {
            if !f.email.sent.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let sent = f.email.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.com");
        assert_eq!(sent[0].attachments.len(), 1);
        assert!(sent[0].attachments[0].filename.ends_with(".pdf"));
    }

    #[test]
    fn test_send_with_retry_eventually_succeeds() {
        let email = FakeEmail::default();
        email.failures_before_success.store(2, Ordering::SeqCst);
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let message = EmailMessage {
            to: "a@b".into(),
            subject: "s".into(),
            html: "h".into(),
            attachments: vec![],
        };
        assert!(send_with_retry(&email, &message, &policy).is_ok());
    }

    #[test]
    fn test_send_with_retry_gives_up() {
        let email = FakeEmail::default();
        email.failures_before_success.store(10, Ordering::SeqCst);
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let message = EmailMessage {
            to: "a@b".into(),
            subject: "s".into(),
            html: "h".into(),
            attachments: vec![],
        };
        assert!(send_with_retry(&email, &message, &policy).is_err());
    }

    #[test]
    fn test_reissue_updates_in_place() {
        let f = fixture();
        let mut req = request();
        req.recipient.insert("cpf".into(), "123.456.789-00".into());
        req.recipient.insert("birth_date".into(), "1990-01-01".into());
        let first = f.issuer.issue(&req).unwrap();

        // Re-issue with matching identity proof updates the same number.
        let mut update = req.clone();
        update.certificate_number = Some(first.certificate.certificate_number.clone());
        update.cpf = Some("123.456.789-00".into());
        update.birth_date = Some("1990-01-01".into());
        update
            .recipient
            .insert("student_name".into(), "Maria S. Souza".into());
        let second = f.issuer.issue(&update).unwrap();

        assert!(second.reissued);
        assert_eq!(
            second.certificate.certificate_number,
            first.certificate.certificate_number
        );
        assert_eq!(f.certificates.records.lock().unwrap().len(), 1);
        assert!(!second.from_cache, "re-issue must not serve a stale PDF");
    }

    #[test]
    fn test_reissue_identity_mismatch_issues_fresh() {
        let f = fixture();
        let mut req = request();
        req.recipient.insert("cpf".into(), "123".into());
        req.recipient.insert("birth_date".into(), "1990-01-01".into());
        let first = f.issuer.issue(&req).unwrap();

        let mut update = req.clone();
        update.certificate_number = Some(first.certificate.certificate_number.clone());
        update.cpf = Some("999".into());
        update.birth_date = Some("1990-01-01".into());
        let second = f.issuer.issue(&update).unwrap();

        assert!(!second.reissued);
        assert_ne!(
            second.certificate.certificate_number,
            first.certificate.certificate_number
        );
        assert_eq!(f.certificates.records.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_unreachable_images_degrade_with_warnings() {
        let mut template = test_template();
        template.background.image = Some("https://unreachable.example/bg.png".into());
        let f = fixture_with(template, FakeObjects::default(), FakeEmail::default());
        let outcome = f.issuer.issue(&request()).unwrap();
        assert!(outcome.pdf.starts_with(b"%PDF-1.7"));
        // The sentinel empties the background source before layout, so
        // the degradation is visible in the logs but not fatal.
        assert!(!outcome.reissued);
    }
}
