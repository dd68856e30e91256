//! Pure incremental decode layer for the line-oriented wire format.
//!
//! The transport hands us arbitrary byte chunks; frames may be split at any
//! byte boundary, including inside a multi-byte UTF-8 sequence. `Utf8Decoder`
//! carries the incomplete tail across chunks, `LineFramer` buffers decoded
//! text until full lines are available and yields the payload of every
//! `data: `-prefixed line. Neither type touches the network, so both are
//! testable with plain byte slices.

const DATA_PREFIX: &str = "data: ";

/// Incremental UTF-8 decoder. Incomplete trailing sequences are held back
/// until the next chunk; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);

        let mut out = String::new();
        let mut bytes = std::mem::take(&mut self.carry);
        let mut offset = 0;

        loop {
            match std::str::from_utf8(&bytes[offset..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(
                        std::str::from_utf8(&bytes[offset..offset + valid_up_to])
                            .unwrap_or_default(),
                    );
                    offset += valid_up_to;

                    match e.error_len() {
                        // Incomplete sequence at the end of the chunk: defer.
                        None => {
                            bytes.drain(..offset);
                            self.carry = bytes;
                            return out;
                        }
                        Some(len) => {
                            out.push('\u{FFFD}');
                            offset += len;
                        }
                    }
                }
            }
        }

        out
    }
}

/// Buffers decoded text and yields one message per complete `data: ` line.
/// Blank lines and lines with any other prefix are ignored.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of decoded text, returning every message whose line was
    /// completed by it. A trailing fragment stays buffered for the next call.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);

        let mut messages = Vec::new();
        while let Some(newline) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
                messages.push(payload.to_string());
            }
        }
        messages
    }

    /// Flush a final unterminated line at end of body, if it is a data line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        rest.trim_end_matches('\r')
            .strip_prefix(DATA_PREFIX)
            .map(str::to_string)
    }
}
