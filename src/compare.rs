//! Output comparison helpers.
//!
//! Pure functions used by the evaluator, plus the base64 helpers behind the
//! `*64` directives and fix-it suggestions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// How captured stdout is compared against the declared expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparison {
    /// Byte-for-byte equality. Used for literal `EXPECT=` values.
    Exact,
    /// Equality after trimming surrounding whitespace on both sides.
    #[default]
    Trimmed,
    /// Output passes when it is empty or parses as a JSON document.
    /// Any declared expectation is ignored.
    JsonValid,
}

impl Comparison {
    /// Compare `actual` against `expected` under this mode.
    pub fn matches(self, expected: &str, actual: &str) -> bool {
        match self {
            Comparison::Exact => exact(expected, actual),
            Comparison::Trimmed => trimmed(expected, actual),
            Comparison::JsonValid => json_error(actual).is_none(),
        }
    }
}

pub fn exact(expected: &str, actual: &str) -> bool {
    expected == actual
}

pub fn trimmed(expected: &str, actual: &str) -> bool {
    expected.trim() == actual.trim()
}

/// Returns the parse error when `output` is neither empty nor valid JSON.
pub fn json_error(output: &str) -> Option<serde_json::Error> {
    if output.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(output).err()
}

/// Strip carriage returns on platforms that emit CRLF line endings.
pub fn normalize_newlines(text: &str) -> String {
    if cfg!(windows) {
        text.replace('\r', "")
    } else {
        text.to_string()
    }
}

pub fn encode_base64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decode a base64 value into text. Invalid UTF-8 is replaced lossily.
pub fn decode_base64(value: &str) -> Result<String, base64::DecodeError> {
    let bytes = STANDARD.decode(value.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
