//! Image loading.
//!
//! Annotation documents only need pixel dimensions and, for model
//! backends, the decoded pixels. The [`ImageProvider`] trait keeps the
//! session testable without touching the filesystem; the default
//! [`FileImageProvider`] decodes through the `image` crate.

use std::path::Path;

use image::GenericImageView;

use crate::error::EngineError;

/// A decoded image ready for display or inference.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixels in RGBA order, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

/// Source of images for a session.
pub trait ImageProvider {
    /// Read only the dimensions of an image, without decoding pixels
    /// where the format allows it.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), EngineError>;

    /// Decode an image to RGBA pixels.
    fn load(&self, path: &Path) -> Result<ImageData, EngineError>;
}

/// Loads images from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageProvider;

impl ImageProvider for FileImageProvider {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), EngineError> {
        image::image_dimensions(path).map_err(|e| {
            log::warn!("Failed to read dimensions of {:?}: {}", path, e);
            EngineError::UnreadableImage {
                path: path.to_path_buf(),
            }
        })
    }

    fn load(&self, path: &Path) -> Result<ImageData, EngineError> {
        let img = image::open(path).map_err(|e| {
            log::warn!("Failed to decode {:?}: {}", path, e);
            EngineError::UnreadableImage {
                path: path.to_path_buf(),
            }
        })?;
        let (width, height) = img.dimensions();
        Ok(ImageData {
            width,
            height,
            rgba: img.into_rgba8().into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_file_reports_path() {
        let path = PathBuf::from("/definitely/not/here.png");
        let err = FileImageProvider.load(&path).unwrap_err();
        assert_eq!(err, EngineError::UnreadableImage { path });
    }

    #[test]
    fn dimensions_of_missing_file_fail() {
        let provider = FileImageProvider;
        assert!(provider.dimensions(Path::new("/nope.jpg")).is_err());
    }
}
