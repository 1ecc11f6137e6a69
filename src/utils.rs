//! Utility functions for naming files and querying the filesystem

use std::path::Path;

/// Characters that are invalid in folder names on at least one platform
const INVALID_FOLDER_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Fallback used when sanitizing leaves nothing
const UNNAMED: &str = "unnamed";

/// Upper bound on a folder name in UTF-8 bytes (filesystems cap names at 255)
pub const MAX_FOLDER_NAME_BYTES: usize = 200;

/// Upper bound on a filename slug in UTF-8 bytes, leaving room for the date,
/// a disambiguating suffix and the extension within 255 bytes
pub const MAX_SLUG_BYTES: usize = 200;

/// Longest URL suffix accepted as a file extension
const MAX_EXTENSION_LEN: usize = 8;

/// Extension used when neither the URL nor the MIME type resolves one
pub const DEFAULT_EXTENSION: &str = "mp3";

/// MIME types recognised when the URL carries no extension
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("audio/mpeg", "mp3"),
    ("audio/mp3", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/m4a", "m4a"),
    ("audio/x-m4a", "m4a"),
    ("audio/aac", "aac"),
    ("audio/ogg", "ogg"),
    ("audio/wav", "wav"),
    ("audio/webm", "webm"),
];

/// Sanitize a subscription title into a folder name
///
/// Invalid characters become hyphens, leading/trailing dots and spaces are
/// trimmed, and runs of hyphens and whitespace collapse to a single hyphen.
/// Case is preserved. The result is cut to [`MAX_FOLDER_NAME_BYTES`] on a
/// character boundary.
///
/// # Examples
///
/// ```
/// use podcast_dl::utils::sanitize_folder_name;
///
/// assert_eq!(sanitize_folder_name("Tech: Talk / Weekly"), "Tech-Talk-Weekly");
/// assert_eq!(sanitize_folder_name("..."), "unnamed");
/// ```
pub fn sanitize_folder_name(title: &str) -> String {
    let replaced: String = title
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            if INVALID_FOLDER_CHARS.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');

    let mut result = String::with_capacity(trimmed.len());
    let mut in_separator_run = false;
    for c in trimmed.chars() {
        if c == '-' || c.is_whitespace() {
            if !in_separator_run {
                result.push('-');
                in_separator_run = true;
            }
        } else {
            result.push(c);
            in_separator_run = false;
        }
    }

    if result.len() > MAX_FOLDER_NAME_BYTES {
        result = truncate_to_bytes(&result, MAX_FOLDER_NAME_BYTES)
            .trim_end_matches(|c| c == '-' || c == '.')
            .to_string();
    }

    if result.is_empty() {
        UNNAMED.to_string()
    } else {
        result
    }
}

/// Slugify a title for use in a filename, truncated to `max_len` characters
/// and at most [`MAX_SLUG_BYTES`] UTF-8 bytes
///
/// Lowercases, keeps alphanumerics, and joins everything else into single
/// hyphens with none at either end.
///
/// # Examples
///
/// ```
/// use podcast_dl::utils::slugify;
///
/// assert_eq!(slugify("Episode 42: The Answer!", 150), "episode-42-the-answer");
/// assert_eq!(slugify("???", 150), "unnamed");
/// ```
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    let by_chars: String = slug.chars().take(max_len).collect();
    let truncated = truncate_to_bytes(&by_chars, MAX_SLUG_BYTES).trim_end_matches('-');

    if truncated.is_empty() {
        UNNAMED.to_string()
    } else {
        truncated.to_string()
    }
}

/// Longest prefix of `s` no longer than `max_bytes`, ending on a char boundary
fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Resolve the file extension for a media URL
///
/// The URL path suffix wins; otherwise the MIME type is looked up; otherwise
/// [`DEFAULT_EXTENSION`]. A URL suffix is lowercased and only used when it is
/// short and alphanumeric.
pub fn extension_for(media_url: &str, mime_type: Option<&str>) -> String {
    if let Ok(parsed) = url::Url::parse(media_url)
        && let Some(ext) = Path::new(parsed.path()).extension().and_then(|e| e.to_str())
        && !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return ext.to_lowercase();
    }

    if let Some(mime) = mime_type {
        let mime = mime.trim().to_lowercase();
        return MIME_EXTENSIONS
            .iter()
            .find(|(known, _)| *known == mime)
            .map(|(_, ext)| (*ext).to_string())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    }

    DEFAULT_EXTENSION.to_string()
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Unix: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized
        // and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail counts blocks available to unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every output pointer refers to
        // a live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut total_bytes: u64 = 0;
            let mut total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut total_bytes as *mut u64 as *mut _,
                &mut total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Format a byte count for log messages (e.g., "45.2 MB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}
