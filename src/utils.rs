use chrono::{DateTime, Utc};
use std::time::SystemTime;

pub fn unix(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Appends '/' unless the path already ends with one
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

/// Removes the trailing '/' of everything except the root
pub fn without_trailing_slash(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Splits an absolute path into its parent directory (with trailing slash) and filename.
///
/// Returns `None` for the root and for relative paths.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    if !path.starts_with('/') {
        return None;
    }

    let trimmed = without_trailing_slash(path);
    if trimmed == "/" {
        return None;
    }

    let idx = trimmed.rfind('/')?;
    Some((&trimmed[..=idx], &trimmed[idx + 1..]))
}

pub fn join(directory: &str, filename: &str) -> String {
    let mut path = with_trailing_slash(directory);
    path.push_str(filename);
    path
}
