use std::path::Path;

use crate::error::UploadError;

pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Png,
    Jpeg,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "png" => Some(FileKind::Png),
            "jpg" | "jpeg" => Some(FileKind::Jpeg),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Png => "image/png",
            FileKind::Jpeg => "image/jpeg",
        }
    }
}

/// Rejects anything that is not a PDF/PNG/JPEG under the size ceiling.
pub fn check_upload(path: &Path, size: u64) -> Result<FileKind, UploadError> {
    let kind = FileKind::from_path(path).ok_or(UploadError::UnsupportedFileType)?;
    if size > MAX_UPLOAD_BYTES {
        return Err(UploadError::FileTooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(kind)
}

pub fn is_supported(path: &Path) -> bool {
    FileKind::from_path(path).is_some()
}
