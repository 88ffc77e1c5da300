//! Artifact naming
//!
//! Given upload name `F`, the sanitized name is `processed_` + `F` with every
//! space replaced by `_`. The WAV object key is `audio/<sanitized>` and the
//! PNG object key is `spectrograms/<sanitized without extension>.png`.

use serde::Serialize;
use wavdrop_common::events::ArtifactKind;

/// Prefix applied to every sanitized name
pub const PROCESSED_PREFIX: &str = "processed_";

/// Sanitize an upload name
///
/// Only spaces are transformed. A name that already carries the prefix is
/// not prefixed again, so sanitizing twice equals sanitizing once.
pub fn sanitize_file_name(name: &str) -> String {
    let body = name.replace(' ', "_");
    if body.starts_with(PROCESSED_PREFIX) {
        body
    } else {
        format!("{}{}", PROCESSED_PREFIX, body)
    }
}

/// Split `name` into (base, extension) at the last dot
///
/// Leading dots belong to the base: `".hidden"` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let Some(dot) = name.rfind('.') else {
        return (name, "");
    };
    if name[..dot].chars().all(|c| c == '.') {
        return (name, "");
    }
    name.split_at(dot)
}

/// Reject names that could escape a scratch directory or form an empty key
pub fn validate_upload_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("file name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("invalid file name: {}", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(format!("file name must not contain path separators: {}", name));
    }
    Ok(())
}

/// Every name derived from one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactNames {
    /// Name as uploaded
    pub original: String,
    /// `processed_<name with spaces replaced>`
    pub sanitized: String,
    /// `audio/<sanitized>`
    pub wav_key: String,
    /// `<sanitized base>.png`
    pub png_name: String,
    /// `spectrograms/<png_name>`
    pub png_key: String,
}

impl ArtifactNames {
    pub fn for_upload(original: &str) -> Self {
        let sanitized = sanitize_file_name(original);
        let (base, _) = split_extension(&sanitized);
        let png_name = format!("{}.png", base);

        Self {
            original: original.to_string(),
            wav_key: object_key(ArtifactKind::Audio, &sanitized),
            png_key: object_key(ArtifactKind::Spectrogram, &png_name),
            png_name,
            sanitized,
        }
    }
}

/// `<prefix>/<name>` for the given artifact kind
pub fn object_key(kind: ArtifactKind, name: &str) -> String {
    format!("{}/{}", kind.prefix(), name)
}
