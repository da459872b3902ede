//! Content-type names and text decoding.
//!
//! Content types are compared as normalized media types: parameters after
//! `;` are dropped, whitespace trimmed and ASCII letters lowercased. Anything
//! that is not one of the constants below is passed through verbatim.

use http::header::CONTENT_TYPE;
use http::HeaderMap;

/// Sentinel meaning "infer the content type from the body".
pub const AUTOMATIC: &str = "automatic";

/// `application/json`.
pub const JSON: &str = "application/json";

/// `application/x-www-form-urlencoded`.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Normalizes a content-type value to its bare media type.
///
/// ```
/// assert_eq!(
///     courier::content::media_type(" Application/JSON; charset=UTF-8"),
///     "application/json"
/// );
/// ```
pub fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extracts the `charset` parameter of a content-type value.
pub fn charset(value: &str) -> Option<&str> {
    value.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Guesses a content type from the body: JSON when the first non-whitespace
/// byte opens an object or array.
pub fn sniff(body: &[u8]) -> Option<&'static str> {
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => Some(JSON),
        _ => None,
    }
}

pub(crate) fn declared(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE)?.to_str().ok()
}

/// Text encodings understood when building a response's raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is the code point of the same value.
    Latin1,
    /// US-ASCII: bytes above 0x7F become U+FFFD.
    Ascii,
}

impl TextEncoding {
    /// Maps a `charset` label to an encoding.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" | "l1" => Some(Self::Latin1),
            "us-ascii" | "ascii" => Some(Self::Ascii),
            _ => None,
        }
    }

    /// Decodes `bytes`, never failing.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_param() {
        assert_eq!(charset("text/plain; charset=\"ISO-8859-1\""), Some("ISO-8859-1"));
        assert_eq!(charset("text/plain;format=flowed; Charset=utf-8"), Some("utf-8"));
        assert_eq!(charset("application/json"), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"  \n{\"id\":1}"), Some(JSON));
        assert_eq!(sniff(b"[1,2]"), Some(JSON));
        assert_eq!(sniff(b"id=1"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn test_decoding() {
        assert_eq!(TextEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(TextEncoding::Ascii.decode(&[0x6f, 0x6b, 0xff]), "ok\u{fffd}");
        assert_eq!(TextEncoding::Utf8.decode("żółw".as_bytes()), "żółw");
        assert_eq!(TextEncoding::from_label(" UTF8 "), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_label("shift_jis"), None);
    }
}
