//! Outbound payload helpers and received-data rendering.
//!
//! The core moves raw bytes only; these helpers turn user input into bytes
//! and bytes back into something printable.

use thiserror::Error;

/// Invalid hex payload input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Hex payload is empty")]
    Empty,

    #[error("Invalid hex byte '{token}' at position {position}")]
    InvalidByte { token: String, position: usize },
}

/// Encode `text` as one newline-terminated line.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Parse whitespace-separated hex bytes such as `"01 02 03 FF"`.
///
/// Each token is one or two hex digits with an optional `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, PayloadError> {
    let bytes = input
        .split_whitespace()
        .enumerate()
        .map(|(position, token)| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            if digits.is_empty()
                || digits.len() > 2
                || !digits.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(invalid(token, position));
            }
            u8::from_str_radix(digits, 16).map_err(|_| invalid(token, position))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if bytes.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(bytes)
}

fn invalid(token: &str, position: usize) -> PayloadError {
    PayloadError::InvalidByte {
        token: token.to_string(),
        position,
    }
}

/// Format bytes as upper-case, space-separated hex.
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lossily decode received bytes for display.
///
/// Invalid UTF-8 becomes U+FFFD; carriage returns are dropped so CRLF
/// output prints as plain lines.
pub fn render_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\r', "")
}
