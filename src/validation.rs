//! Upload inspection performed before any external call is made.

use bytes::Bytes;
use thiserror::Error;

const OCTET_STREAM: &str = "application/octet-stream";

/// Raw upload as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    /// File contents.
    pub bytes: Bytes,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    /// File name declared by the client, if any.
    pub filename: Option<String>,
}

impl UploadPayload {
    /// Bundle raw upload parts.
    pub fn new(
        bytes: impl Into<Bytes>,
        content_type: Option<String>,
        filename: Option<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            filename,
        }
    }
}

/// Upload that passed every validation rule; only constructed by [`UploadValidator`].
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    bytes: Bytes,
    content_type: String,
    filename: Option<String>,
}

impl ValidatedUpload {
    /// File contents.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Normalized media type (lower-case, parameters stripped).
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// File name declared by the client, if any.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Whether the upload is a PDF document rather than a single image.
    pub fn is_pdf(&self) -> bool {
        self.content_type == "application/pdf"
    }
}

/// Reasons an upload is refused before reaching the external services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// The upload contained no bytes.
    #[error("upload is empty")]
    EmptyPayload,
    /// The upload exceeds the configured size cap.
    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected upload (a lower bound when the body was cut off).
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// The media type is not accepted or does not match the file contents.
    #[error("unsupported media type {content_type}")]
    UnsupportedMediaType {
        /// Declared (or detected) media type.
        content_type: String,
    },
}

/// Size and media-type gate for uploads.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_bytes: usize,
    allowed_types: Vec<String>,
}

impl UploadValidator {
    /// Build a validator with the given size cap and allow-list.
    pub fn new(max_bytes: usize, allowed_types: Vec<String>) -> Self {
        let allowed_types = allowed_types
            .into_iter()
            .map(|value| value.trim().to_ascii_lowercase())
            .collect();
        Self {
            max_bytes,
            allowed_types,
        }
    }

    /// Configured size cap in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Check size, media type, and byte signature.
    pub fn validate(&self, payload: UploadPayload) -> Result<ValidatedUpload, RejectionReason> {
        let UploadPayload {
            bytes,
            content_type,
            filename,
        } = payload;

        if bytes.is_empty() {
            return Err(RejectionReason::EmptyPayload);
        }
        if bytes.len() > self.max_bytes {
            return Err(RejectionReason::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let sniffed = sniff_media_type(&bytes);
        let declared = content_type.as_deref().map(normalize_media_type);
        let content_type = match declared {
            Some(declared) if declared != OCTET_STREAM && !declared.is_empty() => {
                if let Some(detected) = sniffed
                    && detected != declared
                    && !is_alias(&declared, detected)
                {
                    tracing::debug!(%declared, detected, "Declared type contradicts signature");
                    return Err(RejectionReason::UnsupportedMediaType {
                        content_type: declared,
                    });
                }
                canonical(&declared).to_string()
            }
            _ => match sniffed {
                Some(detected) => detected.to_string(),
                None => {
                    return Err(RejectionReason::UnsupportedMediaType {
                        content_type: declared.unwrap_or_else(|| OCTET_STREAM.to_string()),
                    });
                }
            },
        };

        if !self.allowed_types.iter().any(|allowed| *allowed == content_type) {
            return Err(RejectionReason::UnsupportedMediaType { content_type });
        }

        // Allow-listed types with a known signature must carry it.
        if sniffed.is_none() && has_known_signature(&content_type) {
            return Err(RejectionReason::UnsupportedMediaType { content_type });
        }

        Ok(ValidatedUpload {
            bytes,
            content_type,
            filename,
        })
    }
}

fn normalize_media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn canonical(media_type: &str) -> &str {
    match media_type {
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        "image/x-png" => "image/png",
        other => other,
    }
}

fn is_alias(declared: &str, detected: &str) -> bool {
    canonical(declared) == detected
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (b"%PDF-", "application/pdf"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (&[b'I', b'I', 0x2A, 0x00], "image/tiff"),
    (&[b'M', b'M', 0x00, 0x2A], "image/tiff"),
    (b"BM", "image/bmp"),
];

/// Detect the media type from the leading bytes, if it is one we recognize.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, media_type)| *media_type)
}

fn has_known_signature(media_type: &str) -> bool {
    media_type == "image/webp" || SIGNATURES.iter().any(|(_, known)| *known == media_type)
}
