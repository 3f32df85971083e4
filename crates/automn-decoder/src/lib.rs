// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-stream byte-to-UTF-8 decoder (C2).
//!
//! Most child processes write UTF-8. PowerShell on Windows, however, may
//! write UTF-16 to its native streams depending on host configuration, so a
//! PowerShell-eligible decoder additionally classifies the stream as UTF-16
//! (via BOM or a statistical heuristic) the first time it sees enough bytes
//! to decide, and stays in that mode for the rest of the stream's life —
//! the classification never resets on a later false negative.
//!
//! `write` never panics and never loses bytes: concatenating every `write`
//! return value with the final `flush` return value reproduces the full
//! decoded text (best-effort; truly invalid bytes become the Unicode
//! replacement character).

const CLASSIFY_MIN_BYTES: usize = 16;
const ZERO_HIGH_BYTE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// A single stream's decoder state. Not thread-safe; one instance per
/// stdout/stderr stream.
pub struct StreamDecoder {
    classification: Option<Classification>,
    /// Raw bytes accumulated before a classification decision has been made.
    classify_buffer: Vec<u8>,
    /// Bytes held over from the previous chunk: an incomplete UTF-8
    /// sequence, or a single odd trailing byte of a UTF-16 pair.
    pending: Vec<u8>,
}

impl StreamDecoder {
    /// `classify_eligible` should be `true` only for the PowerShell
    /// language; every other language is always treated as UTF-8.
    pub fn new(classify_eligible: bool) -> Self {
        Self {
            classification: if classify_eligible {
                None
            } else {
                Some(Classification::Utf8)
            },
            classify_buffer: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Feed a raw byte chunk, returning whatever text could be confidently
    /// decoded from it (plus any previously held bytes it completes).
    pub fn write(&mut self, chunk: &[u8]) -> String {
        if self.classification.is_none() {
            self.classify_buffer.extend_from_slice(chunk);
            match detect_classification(&self.classify_buffer) {
                Some(classification) => {
                    self.classification = Some(classification);
                    let mut buffered = std::mem::take(&mut self.classify_buffer);
                    strip_leading_bom(&mut buffered, classification);
                    return self.decode(&buffered);
                }
                None => return String::new(),
            }
        }
        self.decode(chunk)
    }

    /// Flush any held-over bytes at end of stream. Incomplete sequences are
    /// decoded lossily since no further continuation bytes are coming.
    pub fn flush(&mut self) -> String {
        if self.classification.is_none() {
            // Never reached the classification threshold; decide now with
            // whatever bytes remain (e.g. a very short stream).
            let classification = detect_classification(&self.classify_buffer).unwrap_or(Classification::Utf8);
            self.classification = Some(classification);
            let mut buffered = std::mem::take(&mut self.classify_buffer);
            strip_leading_bom(&mut buffered, classification);
            let mut out = self.decode(&buffered);
            out.push_str(&self.flush_pending());
            return out;
        }
        self.flush_pending()
    }

    fn flush_pending(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        match self.classification {
            Some(Classification::Utf16Le) | Some(Classification::Utf16Be) => {
                decode_utf16_best_effort(&pending, self.classification.unwrap())
            }
            _ => String::from_utf8_lossy(&pending).into_owned(),
        }
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        match self.classification.expect("classification resolved before decode") {
            Classification::Utf8 => self.decode_utf8(chunk),
            variant @ (Classification::Utf16Le | Classification::Utf16Be) => {
                self.decode_utf16(chunk, variant)
            }
        }
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);
        match std::str::from_utf8(&buf) {
            Ok(s) => s.to_string(),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safe: `valid_up_to` is guaranteed to land on a char boundary.
                let decoded = unsafe { std::str::from_utf8_unchecked(&buf[..valid_up_to]) }.to_string();
                match e.error_len() {
                    // Truncated sequence at the very end of the chunk: hold
                    // it for the next chunk.
                    None => {
                        self.pending = buf[valid_up_to..].to_vec();
                        decoded
                    }
                    // A genuinely invalid byte mid-buffer: best-effort
                    // replace and keep going, same as `from_utf8_lossy`.
                    Some(_) => decoded + &String::from_utf8_lossy(&buf[valid_up_to..]),
                }
            }
        }
    }

    fn decode_utf16(&mut self, chunk: &[u8], variant: Classification) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);
        if buf.len() % 2 != 0 {
            self.pending = vec![*buf.last().unwrap()];
            buf.pop();
        }
        decode_utf16_best_effort(&buf, variant)
    }
}

fn decode_utf16_best_effort(bytes: &[u8], variant: Classification) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| match variant {
            Classification::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
            Classification::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
            Classification::Utf8 => unreachable!(),
        })
        .collect();
    String::from_utf16_lossy(&units)
        .chars()
        .filter(|&c| c != '\0')
        .collect()
}

/// Drop a 2-byte UTF-16 BOM matching `classification` from the front of
/// `buf`, if present. The BOM marks byte order, not content, so it must
/// never show up as a decoded U+FEFF character.
fn strip_leading_bom(buf: &mut Vec<u8>, classification: Classification) {
    let bom: &[u8] = match classification {
        Classification::Utf16Le => &[0xFF, 0xFE],
        Classification::Utf16Be => &[0xFE, 0xFF],
        Classification::Utf8 => return,
    };
    if buf.starts_with(bom) {
        buf.drain(0..2);
    }
}

/// Decide whether `buf` looks like UTF-16 via BOM or the zero-high-byte
/// heuristic. Returns `None` if there aren't yet enough bytes to decide and
/// no BOM is present.
fn detect_classification(buf: &[u8]) -> Option<Classification> {
    if buf.len() >= 2 {
        if buf[0] == 0xFF && buf[1] == 0xFE {
            return Some(Classification::Utf16Le);
        }
        if buf[0] == 0xFE && buf[1] == 0xFF {
            return Some(Classification::Utf16Be);
        }
    }
    if buf.len() < CLASSIFY_MIN_BYTES {
        return None;
    }
    let sample = &buf[..buf.len() - (buf.len() % 2)];
    if sample.len() < CLASSIFY_MIN_BYTES {
        return Some(Classification::Utf8);
    }
    let odd_zero = zero_fraction(sample, 1);
    let even_zero = zero_fraction(sample, 0);
    if odd_zero >= ZERO_HIGH_BYTE_THRESHOLD {
        Some(Classification::Utf16Le)
    } else if even_zero >= ZERO_HIGH_BYTE_THRESHOLD {
        Some(Classification::Utf16Be)
    } else {
        Some(Classification::Utf8)
    }
}

fn zero_fraction(sample: &[u8], offset: usize) -> f64 {
    let mut total = 0usize;
    let mut zero = 0usize;
    let mut i = offset;
    while i < sample.len() {
        total += 1;
        if sample[i] == 0 {
            zero += 1;
        }
        i += 2;
    }
    if total == 0 {
        0.0
    } else {
        zero as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decoder_never_classifies_as_utf16() {
        let mut decoder = StreamDecoder::new(false);
        // Bytes that would trip the UTF-16 heuristic if classification were
        // enabled; must still decode as UTF-8 lossily since classification
        // is off.
        let bytes = [0u8, b'h', 0, b'i'];
        let out = decoder.write(&bytes);
        assert!(!out.is_empty());
    }

    #[test]
    fn utf8_split_multibyte_sequence_across_chunks() {
        let mut decoder = StreamDecoder::new(false);
        let full = "héllo".as_bytes().to_vec();
        let (first, second) = full.split_at(2); // splits inside the 2-byte 'é'
        let mut out = decoder.write(first);
        out.push_str(&decoder.write(second));
        out.push_str(&decoder.flush());
        assert_eq!(out, "héllo");
    }

    #[test]
    fn bom_classifies_utf16le_immediately() {
        let mut decoder = StreamDecoder::new(true);
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("hi\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let mut out = decoder.write(&bytes);
        out.push_str(&decoder.flush());
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn bom_split_across_two_chunks() {
        let mut decoder = StreamDecoder::new(true);
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("hello\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let (first, second) = bytes.split_at(1);
        let mut out = decoder.write(first);
        out.push_str(&decoder.write(second));
        out.push_str(&decoder.flush());
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn heuristic_classifies_utf16le_without_bom() {
        let mut decoder = StreamDecoder::new(true);
        let bytes: Vec<u8> = "a long enough ascii line\n"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let mut out = decoder.write(&bytes);
        out.push_str(&decoder.flush());
        assert_eq!(out, "a long enough ascii line\n");
    }

    #[test]
    fn odd_trailing_byte_carries_to_next_chunk() {
        let mut decoder = StreamDecoder::new(true);
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend("ok\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let split = bytes.len() - 1;
        let (first, second) = bytes.split_at(split);
        let mut out = decoder.write(first);
        out.push_str(&decoder.write(second));
        out.push_str(&decoder.flush());
        assert_eq!(out, "ok\n");
    }

    #[test]
    fn short_ascii_stream_without_enough_bytes_to_classify_defaults_to_utf8() {
        let mut decoder = StreamDecoder::new(true);
        let mut out = decoder.write(b"hi");
        out.push_str(&decoder.flush());
        assert_eq!(out, "hi");
    }
}
