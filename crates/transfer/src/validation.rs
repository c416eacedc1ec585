use std::path::{Component, Path};

use crate::TransferError;

/// Checks that a peer-supplied file name is a single plain path component.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - `.` and `..`
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
/// - Anything containing a path separator (`/` or `\`) or a control character
///
/// Returns the name with surrounding whitespace trimmed.
pub fn sanitize_file_name(name: &str) -> Result<String, TransferError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if trimmed.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if trimmed.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(format!(
            "control characters not allowed: {name:?}"
        )));
    }

    if trimmed.len() >= 2 && trimmed.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(trimmed.to_string()),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
