//! # certo CLI
//!
//! Render a certificate template + recipient data to a PDF without the
//! hosted collaborators. Development and operations tool.
//!
//! Usage:
//!   certo template.json data.json -o certificate.pdf
//!   certo template.json data.json --number CERT-123 --verify-url https://certs.example/v
//!   certo --example > template.json

use std::env;
use std::fs;
use std::process;

use certo::cache::{QrCache, QrOptions};
use certo::model::{ElementKind, Template};
use certo::IssueContext;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--example") {
        print!("{}", example_template_json());
        return;
    }

    if args.len() < 3 {
        eprintln!("usage: certo <template.json> <data.json> [-o out.pdf] [--number N] [--verify-url URL]");
        process::exit(2);
    }

    let template_json = fs::read_to_string(&args[1]).unwrap_or_else(|e| {
        eprintln!("failed to read template '{}': {e}", args[1]);
        process::exit(1);
    });
    let data_json = fs::read_to_string(&args[2]).unwrap_or_else(|e| {
        eprintln!("failed to read recipient data '{}': {e}", args[2]);
        process::exit(1);
    });

    let output_path = flag_value(&args, "-o").unwrap_or_else(|| "certificate.pdf".to_string());
    let number = flag_value(&args, "--number").unwrap_or_else(|| "CERT-PREVIEW".to_string());
    let verify_base =
        flag_value(&args, "--verify-url").unwrap_or_else(|| "https://localhost/verify".to_string());

    let ctx = IssueContext {
        certificate_number: number.clone(),
        issue_date: chrono::Local::now().format("%d/%m/%Y").to_string(),
        verification_url: format!("{}/{number}", verify_base.trim_end_matches('/')),
    };

    // Generate the QR locally when the template asks for one.
    let qr_image = match serde_json::from_str::<Template>(&template_json) {
        Ok(template)
            if template
                .elements
                .iter()
                .any(|e| matches!(e.kind, ElementKind::Qrcode)) =>
        {
            let qr = QrCache::new().data_url(&ctx.verification_url, &QrOptions::default());
            if qr.is_empty() {
                None
            } else {
                Some(qr)
            }
        }
        _ => None,
    };

    match certo::render_certificate_json(&template_json, &data_json, qr_image.as_deref(), &ctx) {
        Ok(outcome) => {
            if let Err(e) = fs::write(&output_path, &outcome.pdf) {
                eprintln!("failed to write PDF: {e}");
                process::exit(1);
            }
            for warning in &outcome.warnings {
                eprintln!("! {}: {}", warning.element_id, warning.reason);
            }
            eprintln!("written {} bytes to {}", outcome.pdf.len(), output_path);
        }
        Err(e) => {
            eprintln!("render failed: {e}");
            process::exit(1);
        }
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

fn example_template_json() -> &'static str {
    r##"{
  "id": "course-completion",
  "name": "Course Completion Certificate",
  "canvas": { "width": 1200, "height": 850 },
  "background": { "color": "#fdfbf7" },
  "elements": [
    {
      "id": "heading",
      "type": "text",
      "content": "CERTIFICADO",
      "fontFamily": "Times",
      "fontSize": 56,
      "fontWeight": 700,
      "color": "#2b2b2b",
      "align": "center",
      "x": 100, "y": 120, "width": 1000, "height": 70
    },
    {
      "id": "student",
      "type": "placeholder",
      "tag": "student_name",
      "fontFamily": "Times",
      "fontSize": 36,
      "align": "center",
      "color": "#111111",
      "x": 150, "y": 330, "width": 900, "height": 50
    },
    {
      "id": "body",
      "type": "text",
      "content": "concluiu o curso {{course_name}} em {{issue_date}}.\nCertificado {{certificate_id}}.",
      "fontFamily": "Helvetica",
      "fontSize": 20,
      "align": "center",
      "color": "#444444",
      "x": 200, "y": 430, "width": 800, "height": 120
    },
    {
      "id": "qr",
      "type": "qrcode",
      "x": 1020, "y": 650, "width": 140, "height": 140,
      "z": 2
    }
  ],
  "placeholders": [
    { "id": "student_name", "label": "Nome do aluno", "kind": "text" },
    { "id": "course_name", "label": "Curso", "kind": "text" }
  ]
}
"##
}
