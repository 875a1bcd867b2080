//! Upload validation
//!
//! Pure checks on the decoded upload list. Runs before any filesystem or
//! network work; a failure here ends the request.

use crate::models::{ImageAsset, ImageKind};
use photomesh_common::config::DEFAULT_MAX_IMAGES;
use thiserror::Error;

/// Validation errors (all map to the Input category)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No images provided")]
    NoImages,

    #[error("Too many images: {count} provided, at most {max} accepted")]
    TooManyImages { count: usize, max: usize },

    #[error("Image {index} ({filename}) has unsupported type '{content_type}'; accepted: png, jpg, jpeg, webp")]
    UnsupportedType {
        index: usize,
        filename: String,
        content_type: String,
    },

    #[error("Image {index} ({filename}) is empty")]
    EmptyImage { index: usize, filename: String },
}

/// Summary of a validated upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub image_count: usize,
    /// Declared kind per image, index-aligned with the input
    pub kinds: Vec<ImageKind>,
    pub total_bytes: usize,
}

/// Checks image count and declared types
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_images: usize,
}

impl ImageValidator {
    pub fn new(max_images: usize) -> Self {
        Self { max_images }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Validate the upload list
    ///
    /// A declared type that is missing or `application/octet-stream` is
    /// resolved from the filename extension instead.
    pub fn validate(&self, images: &[ImageAsset]) -> Result<ValidationReport, ValidationError> {
        if images.is_empty() {
            return Err(ValidationError::NoImages);
        }
        if images.len() > self.max_images {
            return Err(ValidationError::TooManyImages {
                count: images.len(),
                max: self.max_images,
            });
        }

        let mut kinds = Vec::with_capacity(images.len());
        for image in images {
            let kind = declared_kind(image).ok_or_else(|| ValidationError::UnsupportedType {
                index: image.index,
                filename: image.filename.clone(),
                content_type: image
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            })?;

            if image.bytes.is_empty() {
                return Err(ValidationError::EmptyImage {
                    index: image.index,
                    filename: image.filename.clone(),
                });
            }

            kinds.push(kind);
        }

        Ok(ValidationReport {
            image_count: images.len(),
            kinds,
            total_bytes: images.iter().map(ImageAsset::size).sum(),
        })
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGES)
    }
}

fn declared_kind(image: &ImageAsset) -> Option<ImageKind> {
    match image.content_type.as_deref() {
        None | Some("") | Some("application/octet-stream") => {
            ImageKind::from_filename(&image.filename)
        }
        Some(content_type) => ImageKind::from_content_type(content_type),
    }
}
