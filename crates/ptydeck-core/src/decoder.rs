//! Streaming UTF-8 decoding of PTY output.
//!
//! PTY reads are not aligned to character boundaries, so a multi-byte
//! character can arrive split across two reads. [`ByteStreamDecoder`] keeps
//! the incomplete tail of one chunk and completes it with the next. Bytes
//! that can never form a character are replaced with U+FFFD, one
//! replacement per maximal invalid subsequence.

/// Longest possible incomplete UTF-8 tail (a 4-byte sequence minus one).
const MAX_PENDING: usize = 3;

/// Stateful UTF-8 decoder. Use one instance per byte stream.
#[derive(Debug, Default)]
pub struct ByteStreamDecoder {
    pending: Vec<u8>,
}

impl ByteStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back an incomplete trailing sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.pending.is_empty() {
            return self.decode_bytes(chunk);
        }

        let mut combined = std::mem::take(&mut self.pending);
        combined.extend_from_slice(chunk);
        self.decode_bytes(&combined)
    }

    /// End of stream: a dangling incomplete sequence becomes one U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Number of bytes held back waiting for the next chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn decode_bytes(&mut self, mut bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len());

        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    out.push_str(valid);
                    return out;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    // `valid` is well-formed by construction, lossy never substitutes here.
                    out.push_str(&String::from_utf8_lossy(valid));

                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[invalid_len..];
                        }
                        None => {
                            debug_assert!(rest.len() <= MAX_PENDING);
                            self.pending.extend_from_slice(rest);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = ByteStreamDecoder::new();
        assert_eq!(decoder.decode(b"hello\r\n"), "hello\r\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_three_byte_char_split_after_first_byte() {
        let euro = "€".as_bytes();
        assert_eq!(euro.len(), 3);

        let mut decoder = ByteStreamDecoder::new();
        assert_eq!(decoder.decode(&euro[..1]), "");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(&euro[1..]), "€");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_four_byte_char_split_byte_by_byte() {
        let crab = "🦀".as_bytes();
        let mut decoder = ByteStreamDecoder::new();
        let mut out = String::new();
        for byte in crab {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        assert_eq!(out, "🦀");
    }

    #[test]
    fn test_split_inside_longer_text() {
        let text = "prompt 你好 > ".as_bytes();
        let mut decoder = ByteStreamDecoder::new();
        let mut out = decoder.decode(&text[..9]);
        out.push_str(&decoder.decode(&text[9..]));
        assert_eq!(out, "prompt 你好 > ");
    }

    #[test]
    fn test_invalid_byte_replaced_once() {
        let mut decoder = ByteStreamDecoder::new();
        let out = decoder.decode(b"a\xFFb");
        assert_eq!(out, format!("a{}b", REPLACEMENT));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_truncated_sequence_followed_by_ascii_is_invalid() {
        let mut decoder = ByteStreamDecoder::new();
        assert_eq!(decoder.decode(&[0xE2, 0x82]), "");
        assert_eq!(decoder.decode(b"x"), format!("{}x", REPLACEMENT));
    }

    #[test]
    fn test_lone_continuation_bytes() {
        let mut decoder = ByteStreamDecoder::new();
        let out = decoder.decode(&[0x82, 0xAC]);
        assert_eq!(out, format!("{}{}", REPLACEMENT, REPLACEMENT));
    }

    #[test]
    fn test_finish_flushes_incomplete_tail() {
        let mut decoder = ByteStreamDecoder::new();
        assert_eq!(decoder.decode(&[0xF0, 0x9F, 0xA6]), "");
        assert_eq!(decoder.finish(), REPLACEMENT.to_string());
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoders_do_not_share_state() {
        let euro = "€".as_bytes();
        let mut first = ByteStreamDecoder::new();
        let mut second = ByteStreamDecoder::new();

        assert_eq!(first.decode(&euro[..1]), "");
        // The tail lands on the other stream and must not complete the first.
        assert_eq!(
            second.decode(&euro[1..]),
            format!("{}{}", REPLACEMENT, REPLACEMENT)
        );
        assert_eq!(first.decode(&euro[1..]), "€");
    }
}
