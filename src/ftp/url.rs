use std::fmt::Write;

use crate::error::{Error, Result};

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Percent-encodes one path segment. Control characters that can never be
/// sent over an FTP control connection are rejected.
pub fn escape_segment(segment: &str) -> Result<String> {
    if segment.bytes().any(|b| matches!(b, b'\0' | b'\r' | b'\n')) {
        return Err(Error::InvalidArgument(format!(
            "path segment {segment:?} contains a forbidden character"
        )));
    }

    let mut escaped = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if is_unreserved(b) {
            escaped.push(char::from(b));
        } else {
            let _ = write!(escaped, "%{b:02X}");
        }
    }
    Ok(escaped)
}

/// Builds `ftp://<junction>/<escaped path>`. A single segment that cannot be
/// escaped fails the whole URL.
pub fn build_full_url(junction: &str, path: &str) -> Result<String> {
    let mut url = format!("ftp://{junction}");
    let mut segments = 0;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        url.push('/');
        url.push_str(&escape_segment(segment)?);
        segments += 1;
    }
    if segments == 0 || path.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}
