//! Tool response content blocks.
//!
//! Servlets answer every call with `{"content": [...]}` where each
//! block is either text or a base64 image. The tag set is closed:
//! a block with an unknown `type` fails decoding instead of being
//! silently dropped.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// One block of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// A decoded tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
}

impl ToolResponse {
    /// Decode the raw JSON a servlet returned.
    pub fn decode(raw: &str) -> Result<Self, SandboxError> {
        serde_json::from_str(raw).map_err(|e| SandboxError::InvalidResponseJson(e.to_string()))
    }

    /// Response with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Flatten the response into one string for the model.
    ///
    /// Text blocks pass through; image blocks are decoded and written to
    /// a temp file that outlives the call, and the path is reported in
    /// their place.
    pub fn flatten(&self) -> String {
        let mut parts = Vec::with_capacity(self.content.len());
        for block in &self.content {
            match block {
                ContentBlock::Text { text } => parts.push(text.clone()),
                ContentBlock::Image { data, mime_type } => {
                    parts.push(persist_image(data, mime_type));
                }
            }
        }
        parts.join("\n")
    }
}

/// Write a base64 image to a kept temp file, returning a message for
/// the model. Failures degrade to a description instead of erroring the
/// whole tool call.
fn persist_image(data: &str, mime_type: &str) -> String {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => bytes,
        Err(e) => return format!("<invalid image data: {}>", e),
    };

    let suffix = match mime_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpeg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => ".bin",
    };

    let file = tempfile::Builder::new()
        .prefix("toolgate-image-")
        .suffix(suffix)
        .tempfile();
    match file {
        Ok(file) => match file.keep() {
            Ok((_, path)) => {
                if let Err(e) = std::fs::write(&path, &bytes) {
                    return format!("<failed to write image: {}>", e);
                }
                tracing::debug!(path = %path.display(), mime = mime_type, "Saved image content");
                format!("Image saved to {}", path.display())
            }
            Err(e) => format!("<failed to keep image file: {}>", e),
        },
        Err(e) => format!("<failed to create image file: {}>", e),
    }
}
