//! Reconstruction request and uploaded image types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Accepted image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    /// Parse a declared MIME type; parameters such as `; charset=` are ignored
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/png" => Some(ImageKind::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    /// Parse a filename extension (png, jpg, jpeg, webp)
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = std::path::Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();

        match extension.as_str() {
            "png" => Some(ImageKind::Png),
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    /// Sniff the encoding from the file signature
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match infer::get(bytes)?.mime_type() {
            "image/png" => Some(ImageKind::Png),
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Webp => "image/webp",
        }
    }

    /// File extension including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => ".png",
            ImageKind::Jpeg => ".jpg",
            ImageKind::Webp => ".webp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Png => write!(f, "png"),
            ImageKind::Jpeg => write!(f, "jpeg"),
            ImageKind::Webp => write!(f, "webp"),
        }
    }
}

/// One uploaded image
#[derive(Clone)]
pub struct ImageAsset {
    /// Position within the request (0-based)
    pub index: usize,
    /// Filename declared by the client
    pub filename: String,
    /// MIME type declared by the client, if any
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageAsset {
    pub fn new(
        index: usize,
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            index,
            filename: filename.into(),
            content_type,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

// Image bytes are large; keep them out of logs and panic messages
impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("index", &self.index)
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A request to turn uploaded photographs into a mesh
///
/// Immutable after creation; owned by the orchestrator for its lifetime.
#[derive(Clone)]
pub struct ReconstructionRequest {
    request_id: Uuid,
    images: Vec<ImageAsset>,
    credential: Option<String>,
    include_files: bool,
}

impl ReconstructionRequest {
    pub fn new(images: Vec<ImageAsset>, credential: Option<String>, include_files: bool) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            images,
            credential,
            include_files,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn images(&self) -> &[ImageAsset] {
        &self.images
    }

    /// Background-removal credential, None skips removal entirely
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn include_files(&self) -> bool {
        self.include_files
    }
}

impl fmt::Debug for ReconstructionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconstructionRequest")
            .field("request_id", &self.request_id)
            .field("images", &self.images)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("include_files", &self.include_files)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parsing() {
        assert_eq!(ImageKind::from_content_type("image/png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_content_type("IMAGE/JPEG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_content_type("image/jpg"), Some(ImageKind::Jpeg));
        assert_eq!(
            ImageKind::from_content_type("image/webp; q=0.9"),
            Some(ImageKind::Webp)
        );
        assert_eq!(ImageKind::from_content_type("image/gif"), None);
        assert_eq!(ImageKind::from_content_type("text/plain"), None);
    }

    #[test]
    fn test_filename_parsing() {
        assert_eq!(ImageKind::from_filename("shoe.JPG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_filename("shoe.jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_filename("a.b.webp"), Some(ImageKind::Webp));
        assert_eq!(ImageKind::from_filename("noext"), None);
        assert_eq!(ImageKind::from_filename("model.obj"), None);
    }

    #[test]
    fn test_sniff_png_signature() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(ImageKind::sniff(&png), Some(ImageKind::Png));
        assert_eq!(ImageKind::sniff(b"plain text"), None);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = ReconstructionRequest::new(Vec::new(), None, false);
        let b = ReconstructionRequest::new(Vec::new(), None, false);
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let request = ReconstructionRequest::new(Vec::new(), Some("secret-key".to_string()), true);
        let debug = format!("{:?}", request);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }
}
