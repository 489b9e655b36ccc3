// Incremental decoding of process output: UTF-8 plus line-ending normalization.

/// Decodes a byte stream chunk by chunk, carrying incomplete multi-byte
/// sequences over to the next chunk. Invalid bytes become U+FFFD.
///
/// Line endings are normalized as well. A `\r` that ends a chunk is held
/// back, so a CRLF split across two reads still collapses to one `\n`.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    pending: Vec<u8>,
    trailing_cr: bool,
}

impl OutputDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut text = String::new();
        if std::mem::take(&mut self.trailing_cr) {
            text.push('\r');
        }
        text.push_str(&self.decode(bytes));
        if text.ends_with('\r') {
            text.pop();
            self.trailing_cr = true;
        }
        normalize_line_endings(&text)
    }

    /// Flush whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> String {
        let mut text = String::new();
        if std::mem::take(&mut self.trailing_cr) {
            text.push('\r');
        }
        text.push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.pending)));
        normalize_line_endings(&text)
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let buffered = std::mem::take(&mut self.pending);

        let mut decoded = String::with_capacity(buffered.len());
        let mut rest = buffered.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(invalid) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        decoded
    }
}

/// Carriage returns become line feeds; CRLF collapses to a single LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
