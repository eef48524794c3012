//! Static file-type registry backing the upload handshake: MIME type →
//! allowed extensions, size ceiling, subtype and previewability, grouped
//! into localized categories.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::ApiError;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Archive,
}

impl FileCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            FileCategory::Image => "이미지",
            FileCategory::Video => "동영상",
            FileCategory::Audio => "오디오",
            FileCategory::Document => "문서",
            FileCategory::Archive => "압축파일",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTypeSpec {
    pub category: FileCategory,
    pub subtype: &'static str,
    pub extensions: &'static [&'static str],
    #[serde(rename = "maxSize")]
    pub max_size: u64,
    pub previewable: bool,
}

static REGISTRY: Lazy<HashMap<&'static str, FileTypeSpec>> = Lazy::new(|| {
    use FileCategory::*;
    let mut registry = HashMap::new();
    let mut add = |mime: &'static str,
                   category: FileCategory,
                   subtype: &'static str,
                   extensions: &'static [&'static str],
                   max_size: u64,
                   previewable: bool| {
        registry.insert(
            mime,
            FileTypeSpec { category, subtype, extensions, max_size, previewable },
        );
    };

    add("image/jpeg", Image, "jpeg", &["jpg", "jpeg"], 10 * MB, true);
    add("image/png", Image, "png", &["png"], 10 * MB, true);
    add("image/gif", Image, "gif", &["gif"], 10 * MB, true);
    add("image/webp", Image, "webp", &["webp"], 10 * MB, true);

    add("video/mp4", Video, "mp4", &["mp4"], 50 * MB, true);
    add("video/webm", Video, "webm", &["webm"], 50 * MB, true);
    add("video/quicktime", Video, "mov", &["mov"], 50 * MB, false);

    add("audio/mpeg", Audio, "mp3", &["mp3"], 20 * MB, true);
    add("audio/wav", Audio, "wav", &["wav"], 20 * MB, true);
    add("audio/ogg", Audio, "ogg", &["ogg"], 20 * MB, true);

    add("application/pdf", Document, "pdf", &["pdf"], 20 * MB, true);
    add("text/plain", Document, "txt", &["txt"], 5 * MB, true);
    add(
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Document,
        "docx",
        &["docx"],
        20 * MB,
        false,
    );
    add(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Document,
        "xlsx",
        &["xlsx"],
        20 * MB,
        false,
    );

    add("application/zip", Archive, "zip", &["zip"], 100 * MB, false);
    add("application/x-7z-compressed", Archive, "7z", &["7z"], 100 * MB, false);

    registry
});

pub fn lookup(mimetype: &str) -> Option<&'static FileTypeSpec> {
    REGISTRY.get(mimetype)
}

/// Rejects unsupported types, extension/MIME mismatches and oversize files
/// before the presigned-URL request is made.
pub fn validate_upload(
    filename: &str,
    mimetype: &str,
    size: u64,
) -> Result<&'static FileTypeSpec, ApiError> {
    let spec = lookup(mimetype).ok_or_else(|| {
        ApiError::Validation(format!("지원하지 않는 파일 형식입니다: {mimetype}"))
    })?;
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if spec.extensions.contains(&ext.as_str()) => {},
        _ => {
            return Err(ApiError::Validation(format!(
                "파일 확장자가 형식과 일치하지 않습니다: {filename}"
            )));
        },
    }
    if size == 0 || size > spec.max_size {
        return Err(ApiError::Validation(format!(
            "{} 파일은 최대 {}MB까지 업로드할 수 있습니다.",
            spec.category.display_name(),
            spec.max_size / MB
        )));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_validate() {
        let spec = validate_upload("cat.png", "image/png", MB).expect("valid");
        assert_eq!(spec.category, FileCategory::Image);
        assert_eq!(spec.subtype, "png");
        assert!(spec.previewable);
    }

    #[test]
    fn unsupported_mime_is_rejected() {
        assert!(validate_upload("a.exe", "application/x-msdownload", 1).is_err());
    }

    #[test]
    fn extension_must_match_mime() {
        assert!(validate_upload("movie.mp4", "image/png", MB).is_err());
        assert!(validate_upload("noextension", "image/png", MB).is_err());
    }

    #[test]
    fn oversize_and_empty_files_are_rejected() {
        assert!(validate_upload("cat.png", "image/png", 11 * MB).is_err());
        assert!(validate_upload("cat.png", "image/png", 0).is_err());
    }

    #[test]
    fn jpeg_accepts_both_extensions() {
        assert!(validate_upload("a.jpg", "image/jpeg", MB).is_ok());
        assert!(validate_upload("a.jpeg", "image/jpeg", MB).is_ok());
    }

    #[test]
    fn categories_carry_localized_names() {
        assert_eq!(FileCategory::Archive.display_name(), "압축파일");
    }
}
