use crate::error::LifecycleError;

/// Extract the archive file name from a local artifact path
///
/// Accepts both `/` and `\` separators so Windows-style paths coming from a
/// remote caller parse the same way. The final component must be
/// `<name>.<extension>` with a non-empty name, and at least one separator
/// must be present.
pub fn parse_archive_name(path: &str, extension: &str) -> Result<String, LifecycleError> {
    let (_, file_name) = path
        .rsplit_once(['/', '\\'])
        .ok_or_else(|| LifecycleError::parse_error(path))?;

    let stem = file_name
        .strip_suffix(extension)
        .and_then(|rest| rest.strip_suffix('.'))
        .ok_or_else(|| LifecycleError::parse_error(path))?;

    if stem.is_empty() {
        return Err(LifecycleError::parse_error(path));
    }

    Ok(file_name.to_string())
}
