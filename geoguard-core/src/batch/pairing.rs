use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use parking_lot::Mutex;

use crate::error::ValidationError;

/// Upper bound on a decoded image. Browser captures are downscaled JPEGs well
/// below this.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

/// Decoded photo bytes with their MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl ImagePayload {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    /// Decodes a `data:<mime>;base64,<payload>` URL or bare base64 text.
    pub fn from_data_url(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingField("image"));
        }

        let (content_type, encoded) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',').ok_or_else(|| {
                    ValidationError::InvalidField {
                        field: "image",
                        reason: "data URL has no payload".into(),
                    }
                })?;
                let mime = header.strip_suffix(";base64").ok_or_else(|| {
                    ValidationError::InvalidField {
                        field: "image",
                        reason: "only base64 data URLs are supported".into(),
                    }
                })?;
                if !mime.starts_with("image/") {
                    return Err(ValidationError::InvalidField {
                        field: "image",
                        reason: format!("unsupported media type '{mime}'"),
                    });
                }
                (mime.to_string(), payload)
            }
            None => (DEFAULT_IMAGE_TYPE.to_string(), raw),
        };

        let data = BASE64_STANDARD.decode(encoded.trim()).map_err(|err| {
            ValidationError::InvalidField {
                field: "image",
                reason: format!("invalid base64: {err}"),
            }
        })?;

        if data.is_empty() {
            return Err(ValidationError::MissingField("image"));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::InvalidField {
                field: "image",
                reason: format!(
                    "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
                    data.len()
                ),
            });
        }

        Ok(Self { content_type, data })
    }

    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// Holds at most one pending capture per operator until the next accepted
/// scan for that operator consumes it.
#[derive(Debug, Default)]
pub struct ImagePairing {
    pending: Mutex<HashMap<String, ImagePayload>>,
}

impl ImagePairing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `image` as the pending capture. Returns `true` when an
    /// unconsumed capture was overwritten.
    pub fn capture(&self, operator_id: &str, image: ImagePayload) -> bool {
        self.pending
            .lock()
            .insert(operator_id.to_string(), image)
            .is_some()
    }

    pub fn consume_for_next_scan(
        &self,
        operator_id: &str,
    ) -> Option<ImagePayload> {
        self.pending.lock().remove(operator_id)
    }

    pub fn has_pending(&self, operator_id: &str) -> bool {
        self.pending.lock().contains_key(operator_id)
    }

    pub fn discard(&self, operator_id: &str) -> bool {
        self.pending.lock().remove(operator_id).is_some()
    }
}
