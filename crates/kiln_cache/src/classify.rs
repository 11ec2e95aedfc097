//! Content classification heuristics.
//!
//! Decides whether a buffer is text or binary and, for text, whether it looks
//! minified or carries an inline source map. Also recognizes vendored paths.
//! All functions are pure and deterministic.

use std::sync::LazyLock;

use regex::Regex;

/// Buffers at or below this length are classified by exact round-trip.
const ROUND_TRIP_LIMIT: usize = 128;

/// Larger buffers are classified by inspecting only this many leading bytes.
const SNIFF_WINDOW: usize = 4096;

/// Only this many leading characters are considered by [`is_minified`].
const MINIFY_WINDOW: usize = 1024;

/// Average line length above which text is treated as minified.
const MINIFY_LINE_LENGTH: f64 = 80.0;

/// Marker that starts an inline source-map comment.
const SOURCE_MAP_MARKER: &str = "//# sourceMap";

static VENDOR_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(node_modules|bower_components)[\\/]").expect("vendor dir pattern")
});

static RUNTIME_ARCHIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(atom|electron)\.asar").expect("runtime archive pattern"));

/// A text encoding a source file may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8.
    Utf8,
    /// UTF-16, little endian.
    Utf16Le,
}

impl Encoding {
    /// Candidate encodings, in the order they are tried.
    pub const CANDIDATES: [Encoding; 2] = [Encoding::Utf8, Encoding::Utf16Le];

    /// Decodes `bytes`, replacing invalid sequences with U+FFFD.
    ///
    /// A trailing odd byte is ignored for UTF-16.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Utf16Le => {
                let units = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
        }
    }

    /// Encodes `text` back into bytes.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }
}

/// Determines which encoding `bytes` are stored in, or `None` for binary.
///
/// Empty buffers are binary. Small buffers are read as UTF-8 once and must
/// re-encode to the exact same bytes in a candidate encoding, so anything
/// that is not valid UTF-8 is binary. Larger ones are sniffed over their
/// first 4 KiB with [`looks_binary`].
pub fn detect_encoding(bytes: &[u8]) -> Option<Encoding> {
    if bytes.is_empty() {
        return None;
    }

    if bytes.len() <= ROUND_TRIP_LIMIT {
        let text = Encoding::Utf8.decode(bytes);
        return Encoding::CANDIDATES
            .into_iter()
            .find(|enc| enc.encode(&text) == bytes);
    }

    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    Encoding::CANDIDATES
        .into_iter()
        .find(|enc| !looks_binary(&enc.decode(window)))
}

/// Returns `true` if decoded text is likely the product of a wrong encoding.
///
/// Lengths are measured in UTF-16 code units. Counts control characters (below 8, between 14 and 32 exclusive, or
/// U+FFFD) and plain spaces against a threshold of 2, 4 or 8 depending on
/// length. Too many controls or too few spaces is binary-like; no controls
/// at all is text; a sparse sprinkling (under 2%) is still binary-like.
pub fn looks_binary(text: &str) -> bool {
    let len = text.encode_utf16().count();
    let threshold = if len > 512 {
        8
    } else if len > 64 {
        4
    } else {
        2
    };

    let mut controls = 0usize;
    let mut spaces = 0usize;
    for c in text.chars() {
        let cp = c as u32;
        if cp < 8 || c == char::REPLACEMENT_CHARACTER {
            controls += 1;
        }
        if cp > 14 && cp < 32 {
            controls += 1;
        }
        if cp == 32 {
            spaces += 1;
        }
        if controls > threshold {
            return true;
        }
    }

    if spaces < threshold {
        return true;
    }
    if controls == 0 {
        return false;
    }
    (controls as f64 / len as f64) < 0.02
}

/// Returns `true` if the text looks minified.
///
/// Looks at the first 1024 UTF-16 code units: with no newline at all
/// anything longer than 80 is minified, otherwise the average line length
/// must exceed 80.
pub fn is_minified(text: &str) -> bool {
    let mut length = 0usize;
    let mut newlines = 0usize;
    for unit in text.encode_utf16().take(MINIFY_WINDOW) {
        length += 1;
        if unit == u16::from(b'\n') {
            newlines += 1;
        }
    }

    if newlines == 0 {
        return length as f64 > MINIFY_LINE_LENGTH;
    }
    length as f64 / newlines as f64 > MINIFY_LINE_LENGTH
}

/// Returns `true` for paths inside a third-party dependency tree or a
/// packaged runtime archive.
pub fn is_vendored(path: &str) -> bool {
    VENDOR_DIR.is_match(path) || RUNTIME_ARCHIVE.is_match(path)
}

/// Returns `true` if the last line of the text is a source-map comment.
pub fn has_inline_source_map(text: &str) -> bool {
    let trimmed = text.trim();
    match trimmed.rfind(SOURCE_MAP_MARKER) {
        Some(marker) => trimmed.rfind('\n').map_or(true, |nl| marker > nl),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(len: usize) -> String {
        "lorem ipsum dolor sit amet ".chars().cycle().take(len).collect()
    }

    #[test]
    fn empty_buffer_is_binary() {
        assert_eq!(detect_encoding(b""), None);
    }

    #[test]
    fn small_ascii_is_utf8() {
        assert_eq!(detect_encoding(b"const x = 1;"), Some(Encoding::Utf8));
    }

    #[test]
    fn small_odd_invalid_utf8_is_binary() {
        assert_eq!(detect_encoding(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn small_even_invalid_utf8_is_binary() {
        assert_eq!(detect_encoding(&[0xff, 0x00, 0x41, 0x00]), None);
    }

    #[test]
    fn png_signature_is_binary() {
        let png = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
        assert_eq!(detect_encoding(&png), None);
    }

    #[test]
    fn short_even_blob_is_binary() {
        let blob = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x80, 0xff, 0x01, 0x02, 0x03];
        assert_eq!(detect_encoding(&blob), None);
    }

    #[test]
    fn small_multibyte_utf8_is_utf8() {
        assert_eq!(detect_encoding("héllo wörld".as_bytes()), Some(Encoding::Utf8));
    }

    #[test]
    fn large_prose_is_utf8() {
        let text = prose(2000);
        assert_eq!(detect_encoding(text.as_bytes()), Some(Encoding::Utf8));
    }

    #[test]
    fn large_utf16_prose_is_utf16() {
        let bytes = Encoding::Utf16Le.encode(&prose(2000));
        assert_eq!(detect_encoding(&bytes), Some(Encoding::Utf16Le));
    }

    #[test]
    fn large_noise_is_binary() {
        let bytes: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
        assert_eq!(detect_encoding(&bytes), None);
    }

    #[test]
    fn utf16_round_trip() {
        let bytes = Encoding::Utf16Le.encode("héllo");
        assert_eq!(Encoding::Utf16Le.decode(&bytes), "héllo");
    }

    #[test]
    fn looks_binary_plain_text() {
        assert!(!looks_binary(&prose(300)));
    }

    #[test]
    fn looks_binary_without_spaces() {
        assert!(looks_binary(&"a".repeat(300)));
    }

    #[test]
    fn looks_binary_many_controls() {
        let mut text = prose(100);
        text.push_str("\u{1}\u{2}\u{3}\u{4}\u{5}");
        assert!(looks_binary(&text));
    }

    #[test]
    fn looks_binary_sparse_controls_under_ratio() {
        // 3 controls in 1000 chars: under the threshold of 8 but below 2%.
        let mut text = prose(997);
        text.push_str("\u{1}\u{1}\u{1}");
        assert!(looks_binary(&text));
    }

    #[test]
    fn looks_binary_controls_at_ratio_are_text() {
        // 2 controls in 100 chars is exactly 2%.
        let mut text = prose(98);
        text.push_str("\u{1}\u{1}");
        assert!(!looks_binary(&text));
    }

    #[test]
    fn looks_binary_counts_replacement_char() {
        let text = format!("{}\u{FFFD}\u{FFFD}\u{FFFD}", prose(40));
        assert!(looks_binary(&text));
    }

    #[test]
    fn minified_single_line_boundary() {
        assert!(is_minified(&"a".repeat(81)));
        assert!(!is_minified(&"a".repeat(80)));
    }

    #[test]
    fn minified_average_exactly_80_is_not_minified() {
        let line = format!("{}\n", "a".repeat(79));
        assert!(!is_minified(&line.repeat(2)));
    }

    #[test]
    fn minified_long_lines() {
        let line = format!("{}\n", "a".repeat(200));
        assert!(is_minified(&line.repeat(3)));
    }

    #[test]
    fn astral_chars_count_as_two_units() {
        // 41 emoji are 82 UTF-16 units but only 41 chars.
        assert!(is_minified(&"\u{1F600}".repeat(41)));
        assert!(!is_minified(&"\u{1F600}".repeat(40)));
    }

    #[test]
    fn looks_binary_threshold_uses_utf16_length() {
        // 32 emoji and three spaces are 67 units, so the threshold is 4 and
        // three spaces are too few. Counted in chars the threshold would be 2.
        let text = format!("{}   ", "\u{1F600}".repeat(32));
        assert_eq!(text.encode_utf16().count(), 67);
        assert!(looks_binary(&text));
    }

    #[test]
    fn minified_only_looks_at_window() {
        // The short lines after the first 1024 characters are ignored.
        let text = format!("{}{}", "a".repeat(1100), "b\n".repeat(500));
        assert!(is_minified(&text));
    }

    #[test]
    fn vendored_paths() {
        assert!(is_vendored("/app/node_modules/react/index.js"));
        assert!(is_vendored(r"C:\app\Node_Modules\react\index.js"));
        assert!(is_vendored("/app/bower_components/jquery/jquery.js"));
        assert!(is_vendored("/opt/app/resources/electron.asar/renderer/init.js"));
        assert!(!is_vendored("/app/src/node_modules_helper.js"));
        assert!(!is_vendored("/app/src/main.js"));
    }

    #[test]
    fn inline_source_map_on_last_line() {
        let code = "var a = 1;\n//# sourceMappingURL=data:application/json;base64,abc\n\n";
        assert!(has_inline_source_map(code));
    }

    #[test]
    fn inline_source_map_not_last_line() {
        let code = "//# sourceMappingURL=a.js.map\nvar a = 1;\n";
        assert!(!has_inline_source_map(code));
    }

    #[test]
    fn no_source_map() {
        assert!(!has_inline_source_map("var a = 1;"));
        assert!(!has_inline_source_map(""));
    }
}
