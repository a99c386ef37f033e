use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a relative path does not escape its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates a destination sub-path.
///
/// Empty is allowed (no sub-directory). Any occurrence of `..` is
/// rejected outright, even inside a longer segment such as `a..b`.
pub fn validate_prefix(prefix: &str) -> Result<(), TransferError> {
    if prefix.is_empty() {
        return Ok(());
    }
    if prefix.contains("..") {
        return Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {prefix}"
        )));
    }
    validate_upload_path(prefix)
}

/// Validates a bare file name: exactly one normal path component.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    validate_upload_path(name)?;

    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "file name must not contain separators: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidPath(format!("invalid file name: {name}"))),
    }
}
