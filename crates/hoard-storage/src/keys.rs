//! Shared key generation for storage backends.
//!
//! Originals live under `files/{owner_id}/{yyyy}/{mm}/{file_id}.{ext}` and
//! thumbnails under `thumbnails/{owner_id}/{yyyy}/{mm}/{file_id}.png`.

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::{StorageError, StorageResult};

const FALLBACK_EXTENSION: &str = "bin";

/// Reject keys that could escape a backend root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment == ".." || segment.is_empty())
    {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid characters: {:?}",
            key
        )));
    }
    Ok(())
}

/// Extension taken from the file name, falling back to the MIME subtype.
pub fn extension_for(file_name: &str, content_type: &str) -> String {
    let from_name = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext;
    }

    let subtype = content_type
        .split(';')
        .next()
        .and_then(|ct| ct.trim().split_once('/'))
        .map(|(_, sub)| sub.to_ascii_lowercase());
    match subtype.as_deref() {
        Some("jpeg") => "jpg".to_string(),
        Some("plain") => "txt".to_string(),
        Some(sub) if !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()) => {
            sub.to_string()
        }
        _ => FALLBACK_EXTENSION.to_string(),
    }
}

pub fn original_key(owner_id: Uuid, file_id: Uuid, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "files/{}/{:04}/{:02}/{}.{}",
        owner_id,
        at.year(),
        at.month(),
        file_id,
        extension
    )
}

pub fn thumbnail_key(owner_id: Uuid, file_id: Uuid, at: DateTime<Utc>) -> String {
    format!(
        "thumbnails/{}/{:04}/{:02}/{}.png",
        owner_id,
        at.year(),
        at.month(),
        file_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_layout() {
        let owner = Uuid::nil();
        let file = Uuid::from_u128(7);
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

        let key = original_key(owner, file, "png", at);
        assert_eq!(
            key,
            format!("files/{}/2024/03/{}.png", owner, file)
        );
        assert!(validate_key(&key).is_ok());
        assert!(thumbnail_key(owner, file, at).starts_with("thumbnails/"));
    }

    #[test]
    fn traversal_keys_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("files/../../x").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("files/a..b/c").is_ok());
    }

    #[test]
    fn extension_resolution() {
        assert_eq!(extension_for("Photo.JPG", "image/jpeg"), "jpg");
        assert_eq!(extension_for("archive", "image/jpeg"), "jpg");
        assert_eq!(extension_for("notes", "text/plain; charset=utf-8"), "txt");
        assert_eq!(extension_for("weird.", "application/x-foo+bar"), "bin");
    }
}
