use crate::TransferError;

/// Validates a `/`-separated relative path before it is mapped remotely.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (`/x`) and drive prefixes (`C:`)
/// - Parent directory traversal (`..`)
/// - Backslashes, which would be read as part of a file name remotely
pub fn validate_relative_path(path: &str) -> Result<(), TransferError> {
    if path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }
    if path.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "backslash not allowed: {path}"
        )));
    }

    for (i, segment) in path.split('/').enumerate() {
        match segment {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty segment in: {path}"
                )));
            }
            ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {path}"
                )));
            }
            s if i == 0 && s.len() == 2 && s.ends_with(':') => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {path}"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Normalizes a remote folder: trims slashes, drops empty and `.` segments.
pub fn normalize_folder(folder: &str) -> String {
    folder
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps a relative path under the optional target folder.
pub fn join_remote_path(folder: Option<&str>, relative: &str) -> Result<String, TransferError> {
    validate_relative_path(relative)?;
    let relative = relative
        .split('/')
        .filter(|s| *s != ".")
        .collect::<Vec<_>>()
        .join("/");

    match folder.map(normalize_folder) {
        Some(f) if !f.is_empty() => Ok(format!("{f}/{relative}")),
        _ => Ok(relative),
    }
}
