//! Attached context: uploaded files and reference URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::project::FileContext;

/// Media that is shipped to the model as base64 rather than text
pub fn is_binary_media(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
        || mime_type.starts_with("video/")
        || mime_type == "application/pdf"
}

impl FileContext {
    /// Build a context file from raw bytes, base64-encoding binary media
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        let content = if is_binary_media(&mime_type) {
            STANDARD.encode(bytes)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };

        Self {
            name: name.into(),
            content,
            mime_type,
            size: bytes.len() as u64,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// `data:` URI for inlining image content into a multimodal message
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.content)
    }
}

/// Trim a user-entered URL and default its scheme to https.
/// Returns `None` for blank input.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http") {
        Some(url.to_string())
    } else {
        Some(format!("https://{}", url))
    }
}
