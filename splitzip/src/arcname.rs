//! Member-name sanitization: the first line of defense against zip slip.

use crate::result::*;

/// Hard cap from the two-byte file name length field.
pub const MAX_ARCNAME_BYTES: usize = 65_535;

/// Normalizes a raw member name to a safe, canonical archive path.
///
/// Backslashes become forward slashes; drive letters, leading slashes,
/// empty segments, and `.` segments are dropped. A trailing slash
/// (directory marker) survives. Anything that still points outside the
/// archive root — a `..` segment, an embedded NUL, an empty result — is
/// rejected, as are names too long for the Zip name-length field.
pub fn sanitize_arcname(raw: &str) -> ZipResult<String> {
    let unsafe_path = || SplitZipError::UnsafePath(raw.to_string());

    if raw.contains('\0') {
        return Err(unsafe_path());
    }

    let mut name = raw.replace('\\', "/");

    // Drop a drive-letter prefix like "C:". The colon can only sit at
    // byte 1 if the first character is a single ASCII byte.
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        name.drain(..2);
    }

    let is_directory = name.ends_with('/');

    let mut segments = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(unsafe_path()),
            _ => segments.push(segment),
        }
    }

    let mut clean = segments.join("/");
    if clean.is_empty() {
        return Err(unsafe_path());
    }
    if is_directory {
        clean.push('/');
    }
    if clean.len() > MAX_ARCNAME_BYTES {
        return Err(unsafe_path());
    }
    Ok(clean)
}
