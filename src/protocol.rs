//! Wire protocol between terminal clients and the server.
//!
//! Every WebSocket text frame carries one flat JSON object tagged by `type`:
//!
//! | direction        | type     | fields                 |
//! |------------------|----------|------------------------|
//! | client -> server | `input`  | `data: string`         |
//! | client -> server | `resize` | `cols: int, rows: int` |
//! | server -> client | `output` | `data: string`         |
//! | server -> client | `exit`   | `code: int`            |
//!
//! Decoding is permissive: unknown fields are ignored and anything that is
//! not one of the four shapes decodes to `None`.

use serde::{Deserialize, Serialize};

/// Exit code reported when a session fails before its shell is running.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Raw bytes for the shell (client -> server).
    Input { data: String },
    /// New terminal dimensions (client -> server).
    Resize { cols: u16, rows: u16 },
    /// Raw bytes read from the shell (server -> client).
    Output { data: String },
    /// Shell exit status; last message before close (server -> client).
    Exit { code: i32 },
}

impl Message {
    /// Build an `output` message.
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }

    /// Build an `exit` message.
    pub fn exit(code: i32) -> Self {
        Self::Exit { code }
    }

    /// Wire discriminant of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Output { .. } => "output",
            Self::Exit { .. } => "exit",
        }
    }
}

/// Decode a text frame.
///
/// Returns `None` for invalid JSON, a missing or unknown `type`, or fields
/// of the wrong shape. A `resize` with a zero dimension is treated as
/// malformed.
pub fn decode(text: &str) -> Option<Message> {
    match serde_json::from_str::<Message>(text).ok()? {
        Message::Resize { cols, rows } if cols == 0 || rows == 0 => None,
        msg => Some(msg),
    }
}

/// Encode a message as a single JSON text frame.
pub fn encode(message: &Message) -> String {
    // Serialization of these plain variants cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}

/// Streaming UTF-8 decoder for PTY output.
///
/// Terminal output is a raw byte stream, and a single read may end in the
/// middle of a multi-byte character. The incomplete tail is held back and
/// prepended to the next chunk so characters are never split. Bytes that
/// can never form valid UTF-8 are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back, lossily.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Whether an incomplete sequence is being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_input() {
        let msg = decode(r#"{"type":"input","data":"echo hi\n"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Input {
                data: "echo hi\n".into()
            }
        );
    }

    #[test]
    fn test_decode_resize() {
        let msg = decode(r#"{"type":"resize","cols":100,"rows":40}"#).unwrap();
        assert_eq!(msg, Message::Resize { cols: 100, rows: 40 });
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = decode(r#"{"type":"resize","cols":120,"rows":30,"pixelWidth":0}"#).unwrap();
        assert_eq!(msg, Message::Resize { cols: 120, rows: 30 });
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("not json").is_none());
        assert!(decode("").is_none());
        assert!(decode(r#"{"data":"no type"}"#).is_none());
        assert!(decode(r#"{"type":"bogus"}"#).is_none());
        assert!(decode(r#"{"type":"resize","cols":"wide","rows":40}"#).is_none());
        assert!(decode(r#"{"type":"resize","cols":-1,"rows":40}"#).is_none());
        assert!(decode(r#"{"type":"resize","cols":70000,"rows":40}"#).is_none());
        assert!(decode("42").is_none());
    }

    #[test]
    fn test_decode_rejects_zero_size() {
        assert!(decode(r#"{"type":"resize","cols":0,"rows":40}"#).is_none());
        assert!(decode(r#"{"type":"resize","cols":80,"rows":0}"#).is_none());
    }

    #[test]
    fn test_encode_shapes() {
        assert_eq!(
            encode(&Message::output("hi\r\n")),
            r#"{"type":"output","data":"hi\r\n"}"#
        );
        assert_eq!(encode(&Message::exit(3)), r#"{"type":"exit","code":3}"#);
        assert_eq!(
            encode(&Message::exit(SPAWN_FAILURE_EXIT_CODE)),
            r#"{"type":"exit","code":-1}"#
        );
    }

    #[test]
    fn test_control_bytes_survive_json() {
        let raw = "\u{1b}[31mred\u{1b}[0m\u{7}";
        let frame = encode(&Message::output(raw));
        assert_eq!(decode(&frame), Some(Message::output(raw)));
    }

    #[test]
    fn test_kind() {
        assert_eq!(Message::exit(0).kind(), "exit");
        assert_eq!(Message::Resize { cols: 1, rows: 1 }.kind(), "resize");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "héllo → 世界";
        let bytes = text.as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        // Feed one byte at a time; no character may be split.
        for b in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(b)));
        }
        assert!(!decoder.has_pending());
        assert_eq!(out, text);
    }

    #[test]
    fn test_utf8_holds_incomplete_tail() {
        let mut decoder = Utf8Decoder::new();
        // "世" is E4 B8 96
        assert_eq!(decoder.decode(b"ab\xE4\xB8"), "ab");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(b"\x96c"), "世c");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_utf8_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xC3\x28"), "\u{FFFD}(");
    }

    #[test]
    fn test_utf8_finish_flushes_tail() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"x\xE4"), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }
}
