//! Filename validation
//!
//! Uploaded names end up as path components inside a client's partition, so
//! they must never be able to escape it.

use crate::error::AdmissionError;

/// Longest single path component most filesystems accept.
pub const MAX_PATH_COMPONENT_BYTES: usize = 255;

/// Inputs are stored as `{job_id}_{filename}`: a hyphenated UUID plus `_`.
const STORED_NAME_PREFIX_BYTES: usize = 37;

/// Longest client filename that still fits in the stored input name.
pub const MAX_FILENAME_LENGTH: usize = MAX_PATH_COMPONENT_BYTES - STORED_NAME_PREFIX_BYTES;

/// Check that `filename` is safe to use as a single path component.
pub fn validate_filename(filename: &str) -> Result<(), AdmissionError> {
    if filename.trim().is_empty() {
        return Err(AdmissionError::InvalidFilename(
            "filename is empty".to_string(),
        ));
    }

    if filename.contains('/') || filename.contains('\\') {
        return Err(AdmissionError::InvalidFilename(format!(
            "'{}' contains a path separator",
            filename
        )));
    }

    if filename.contains("..") {
        return Err(AdmissionError::InvalidFilename(format!(
            "'{}' contains '..'",
            filename
        )));
    }

    if filename.chars().any(|c| c.is_control()) {
        return Err(AdmissionError::InvalidFilename(format!(
            "'{}' contains control characters",
            filename.escape_default()
        )));
    }

    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(AdmissionError::InvalidFilename(format!(
            "filename is {} bytes, the limit is {}",
            filename.len(),
            MAX_FILENAME_LENGTH
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validate_accepts_plain_names() {
        assert!(validate_filename("report.csv").is_ok());
        assert!(validate_filename("data-2024_01.xlsx").is_ok());
    }

    #[test]
    fn test_validate_rejects_unsafe_names() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("   ").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("dir/file.csv").is_err());
        assert!(validate_filename("dir\\file.csv").is_err());
        assert!(validate_filename("a..b").is_err());
        assert!(validate_filename("bad\nname").is_err());
    }

    #[test]
    fn test_length_limit_leaves_room_for_job_prefix() {
        let stored = format!("{}_", Uuid::new_v4());
        assert_eq!(stored.len(), STORED_NAME_PREFIX_BYTES);
        assert_eq!(MAX_FILENAME_LENGTH, 218);

        let longest = format!("{}.csv", "a".repeat(214));
        assert_eq!(longest.len(), 218);
        assert!(validate_filename(&longest).is_ok());
        assert_eq!((stored + &longest).len(), MAX_PATH_COMPONENT_BYTES);

        let too_long = format!("{}.csv", "a".repeat(215));
        assert!(matches!(
            validate_filename(&too_long),
            Err(AdmissionError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_length_limit_counts_bytes() {
        // 110 two-byte characters: 220 bytes.
        let name = "é".repeat(110);
        assert!(validate_filename(&name).is_err());
    }
}
