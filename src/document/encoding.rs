/*!
 * Character decoding for chapter and package bytes.
 *
 * Nearly every book is UTF-8, but older ones were saved as BOM-marked
 * UTF-16 or in a Central European code page. Decoding tries UTF-8, then
 * UTF-16 when a byte order mark says so, then windows-1250, and finally
 * windows-1252, which accepts any byte sequence.
 *
 * Output is always written as UTF-8; `declare_utf8` rewrites the XML
 * declaration of a chapter that was read in another encoding.
 */

use encoding_rs::{Encoding, UTF_8, WINDOWS_1250, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::Regex;

static DECLARED_ENCODING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\s*<\?xml[^>]*?\bencoding\s*=\s*)(["'])[^"']*(["'])"#).expect("declaration pattern is valid")
});

/// Text decoded from markup bytes together with the encoding that worked
#[derive(Debug, Clone)]
pub struct DecodedMarkup {
    pub text: String,
    pub encoding: &'static Encoding,
}

impl DecodedMarkup {
    pub fn is_utf8(&self) -> bool {
        self.encoding == UTF_8
    }
}

/// Decode markup bytes, dropping any byte order mark
pub fn decode_markup(bytes: &[u8]) -> DecodedMarkup {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..]) {
            return DecodedMarkup { text: text.into_owned(), encoding };
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedMarkup { text: text.to_string(), encoding: UTF_8 };
    }

    // windows-1250 leaves a few bytes unassigned; they decode to C1 controls
    if let Some(text) = WINDOWS_1250.decode_without_bom_handling_and_without_replacement(bytes) {
        if !text.chars().any(|c| ('\u{80}'..='\u{9f}').contains(&c)) {
            return DecodedMarkup { text: text.into_owned(), encoding: WINDOWS_1250 };
        }
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    DecodedMarkup { text: text.into_owned(), encoding: WINDOWS_1252 }
}

/// Point the XML declaration's encoding at UTF-8
pub fn declare_utf8(markup: &str) -> String {
    DECLARED_ENCODING_RE.replace(markup, "${1}${2}utf-8${3}").into_owned()
}
