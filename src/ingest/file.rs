use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

use crate::error::AppError;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file as handed over by a picker or a drop target: a name, a declared MIME
/// type and the raw bytes. Nothing is decoded.
#[derive(Debug, Clone)]
pub struct ImageFile {
    name: String,
    mime: String,
    data: Arc<[u8]>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Reads a file from disk, guessing the MIME type from its extension the
    /// way a browser file input would.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|source| AppError::ReadImage {
            path: path.display().to_string(),
            source,
        })?;
        let mime = ImageFormat::from_path(path)
            .map(|format| format.to_mime_type())
            .unwrap_or(FALLBACK_MIME);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lower-cased extension of the file name, if there is one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn is_image_typed(&self) -> bool {
        self.mime
            .get(..6)
            .map(|prefix| prefix.eq_ignore_ascii_case("image/"))
            .unwrap_or(false)
    }
}

/// Files carried by a single drag-and-drop event.
#[derive(Debug, Clone, Default)]
pub struct DropPayload {
    files: Vec<ImageFile>,
}

impl DropPayload {
    pub fn new(files: Vec<ImageFile>) -> Self {
        Self { files }
    }

    pub fn single(file: ImageFile) -> Self {
        Self { files: vec![file] }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Only the first file of a drop is ever considered.
    pub fn into_first(self) -> Option<ImageFile> {
        self.files.into_iter().next()
    }
}
