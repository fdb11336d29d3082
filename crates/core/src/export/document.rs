//! # Document Export
//!
//! Wraps a stage's rendered output in a styled standalone page. The same
//! page serves as a Word-compatible `.doc` download, a web view, or a print
//! view that opens the print dialog on load.

use std::fmt;
use std::str::FromStr;

use super::markdown::render_markdown;
use crate::stages::DiscoveryStage;

const DOCUMENT_STYLES: &str = r#"<style>
  @import url('https://fonts.googleapis.com/css2?family=Plus+Jakarta+Sans:wght@400;600;700;800&display=swap');
  body { font-family: 'Plus Jakarta Sans', sans-serif; background: #ffffff; color: #334155; padding: 40px; line-height: 1.6; }
  .container { max-width: 800px; margin: 0 auto; background: #ffffff; padding: 20px; }
  h1 { color: #4f46e5; border-bottom: 2px solid #e2e8f0; padding-bottom: 12px; font-size: 24px; font-weight: 800; text-transform: uppercase; margin-bottom: 24px; }
  h2 { color: #4f46e5; margin-top: 32px; font-size: 20px; font-weight: 700; margin-bottom: 16px; }
  h3 { color: #1e293b; margin-top: 24px; font-size: 16px; font-weight: 700; }
  p, li { color: #334155; font-size: 14px; margin-bottom: 12px; }
  table { width: 100%; border-collapse: collapse; margin: 24px 0; border: 1px solid #e2e8f0; font-size: 14px; }
  th, td { border: 1px solid #e2e8f0; padding: 12px; text-align: left; }
  th { background: #f8fafc; color: #4f46e5; font-size: 11px; text-transform: uppercase; letter-spacing: 0.1em; font-weight: 800; }
  code { background: #f1f5f9; padding: 2px 6px; border-radius: 4px; font-family: monospace; font-size: 12px; color: #4f46e5; }
  ul, ol { padding-left: 20px; margin-bottom: 20px; }
  @media print { body { padding: 0; } .container { width: 100%; max-width: none; } button { display: none; } }
</style>"#;

const PRINT_SCRIPT: &str =
    "<script>window.onload = () => { setTimeout(() => { window.print(); window.close(); }, 500); };</script>";

/// Output flavor of an exported document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Word-compatible HTML download
    Doc,
    #[default]
    Web,
    /// Opens the print dialog so the browser can save a PDF
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Web => "web",
            Self::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Doc => "application/msword",
            Self::Web | Self::Pdf => "text/html; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doc" | "md" | "word" => Ok(Self::Doc),
            "web" | "html" => Ok(Self::Web),
            "pdf" => Ok(Self::Pdf),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// A rendered export ready to be served or written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDocument {
    pub format: ExportFormat,
    pub file_name: String,
    pub mime_type: &'static str,
    pub body: String,
}

/// Render `output` for `stage`. Returns `None` when there is nothing to export.
pub fn export_document(
    stage: DiscoveryStage,
    output: &str,
    format: ExportFormat,
) -> Option<ExportedDocument> {
    if output.trim().is_empty() {
        return None;
    }

    let content = render_markdown(output);
    let (head_extra, tail) = match format {
        ExportFormat::Doc => ("", ""),
        ExportFormat::Web => ("<title>Discovery Report</title>", ""),
        ExportFormat::Pdf => ("<title>Discovery Report</title>", PRINT_SCRIPT),
    };

    let body = format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'>{}{}</head><body><div class=\"container\">{}</div>{}</body></html>",
        head_extra, DOCUMENT_STYLES, content, tail
    );

    let extension = match format {
        ExportFormat::Doc => "doc",
        ExportFormat::Web | ExportFormat::Pdf => "html",
    };

    Some(ExportedDocument {
        format,
        file_name: format!("Discovery_Report_{}.{}", stage, extension),
        mime_type: format.mime_type(),
        body,
    })
}
