//! Path normalization for cache keys.
//!
//! The same file can be spelled many ways (`C:\src\a.js`, `c:/src//a.js`).
//! Cache keys are always computed from the sanitized form so a file is never
//! recorded twice.

use std::path::Path;

/// Whether the host file system is case-insensitive by default.
const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// Normalizes a path into its stable cache-key spelling.
///
/// Backslashes become forward slashes, repeated separators collapse, a
/// trailing separator is dropped, and a Windows drive letter is lower-cased.
/// On case-insensitive platforms the whole path is lower-cased.
pub fn sanitize_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = false;
    for c in raw.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if prev_sep {
                continue;
            }
            prev_sep = true;
        } else {
            prev_sep = false;
        }
        out.push(c);
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }

    let bytes = out.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        let drive = out[..1].to_ascii_lowercase();
        out.replace_range(..1, &drive);
    }

    if CASE_INSENSITIVE {
        out = out.to_lowercase();
    }
    out
}

/// Removes a leading `root` from `key`, comparing ASCII case-insensitively.
///
/// The match must end on a path boundary, so `/app` strips `/app/main.js`
/// but leaves `/application/main.js` alone. Returns `key` unchanged when
/// `root` is empty or not a prefix.
pub fn strip_root<'a>(key: &'a str, root: &str) -> &'a str {
    if root.is_empty() {
        return key;
    }
    let Some(head) = key.get(..root.len()) else {
        return key;
    };
    if !head.eq_ignore_ascii_case(root) {
        return key;
    }
    let rest = &key[root.len()..];
    if rest.is_empty() || rest.starts_with('/') || root.ends_with('/') {
        rest
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn converts_backslashes() {
        let p = PathBuf::from(r"src\lib\a.js");
        assert_eq!(sanitize_path(&p), "src/lib/a.js");
    }

    #[test]
    fn collapses_repeated_separators() {
        let p = PathBuf::from("/proj//src///a.js");
        assert_eq!(sanitize_path(&p), "/proj/src/a.js");
    }

    #[test]
    fn drops_trailing_separator() {
        assert_eq!(sanitize_path(Path::new("/proj/")), "/proj");
        assert_eq!(sanitize_path(Path::new("/")), "/");
    }

    #[test]
    fn lowercases_drive_letter() {
        let p = PathBuf::from(r"C:\Proj\a.js");
        let s = sanitize_path(&p);
        assert!(s.starts_with("c:/"));
    }

    #[test]
    fn strip_root_removes_prefix() {
        assert_eq!(strip_root("/proj/src/a.js", "/proj"), "/src/a.js");
        assert_eq!(strip_root("/PROJ/src/a.js", "/proj"), "/src/a.js");
    }

    #[test]
    fn strip_root_respects_boundaries() {
        assert_eq!(strip_root("/project2/a.js", "/proj"), "/project2/a.js");
        assert_eq!(strip_root("/other/a.js", "/proj"), "/other/a.js");
    }

    #[test]
    fn strip_root_empty_root_is_noop() {
        assert_eq!(strip_root("/a.js", ""), "/a.js");
    }
}
