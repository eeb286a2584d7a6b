use image::ImageFormat;
use thiserror::Error;

use crate::config::IngestSettings;
use crate::ingest::file::ImageFile;

/// Why a selection or drop left the subject untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("'{mime}' is not an image type")]
    NotImage { mime: String },
    #[error("'{mime}' is not a supported image format")]
    UnsupportedFormat { mime: String },
    #[error("extension {extension:?} is not allowed")]
    ExtensionNotAllowed { extension: Option<String> },
    #[error("file is empty")]
    EmptyFile,
    #[error("drop contained no files")]
    EmptyPayload,
}

/// Validation applied to every incoming file.
///
/// The lenient policy only checks the `image/` MIME prefix. The strict policy
/// additionally requires a known format, a whitelisted extension and a
/// non-empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IngestPolicy {
    #[default]
    Lenient,
    Strict { allowed_extensions: Vec<String> },
}

impl IngestPolicy {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        if settings.strict {
            Self::Strict {
                allowed_extensions: settings
                    .allowed_extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                    .collect(),
            }
        } else {
            Self::Lenient
        }
    }

    pub fn validate(&self, file: &ImageFile) -> Result<(), RejectReason> {
        if !file.is_image_typed() {
            return Err(RejectReason::NotImage {
                mime: file.mime().to_string(),
            });
        }

        let Self::Strict { allowed_extensions } = self else {
            return Ok(());
        };

        if ImageFormat::from_mime_type(file.mime()).is_none() {
            return Err(RejectReason::UnsupportedFormat {
                mime: file.mime().to_string(),
            });
        }
        let extension = file.extension();
        let allowed = extension
            .as_ref()
            .map(|ext| allowed_extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false);
        if !allowed {
            return Err(RejectReason::ExtensionNotAllowed { extension });
        }
        if file.is_empty() {
            return Err(RejectReason::EmptyFile);
        }
        Ok(())
    }
}
