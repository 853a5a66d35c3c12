//! Byte-level conversion between a file encoding and UTF-8.
//!
//! [`Transcoder`] is a small streaming interface: feed it bytes, it fills an
//! output buffer and says how far it got and why it stopped. [`Codecs`]
//! opens one for a (target, source) pair. The default [`EncodingRsCodecs`]
//! delegates to `encoding_rs`, filling in the UTF-16 encoders and the
//! UTF-32 codecs it does not ship.

use encoding_rs::{DecoderResult, Encoding, EncoderResult};
use tracing::debug;

use super::{is_canonical, Endian, UnicodeForm};
use crate::error::{Result, SyncError};

/// Why a conversion call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input was consumed.
    Ok,
    /// The input ends in the middle of a character; feed the rest later.
    NeedMoreInput,
    /// The output buffer is full; call again with the remaining input.
    OutputFull,
    /// The input at `read` cannot be converted. Nothing of it was consumed
    /// unless [`Conversion::carried`] is set; the caller decides how far to
    /// skip.
    IllegalSequence,
}

/// Outcome of one [`Transcoder::convert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub read: usize,
    pub written: usize,
    pub status: Status,
    /// Set on an illegal sequence that began in an earlier call. Its bytes
    /// are already consumed and there is nothing left to skip.
    pub carried: bool,
}

impl Conversion {
    fn new(read: usize, written: usize, status: Status) -> Self {
        Self {
            read,
            written,
            status,
            carried: false,
        }
    }

    fn carried_illegal(read: usize, written: usize) -> Self {
        Self {
            carried: true,
            ..Self::new(read, written, Status::IllegalSequence)
        }
    }
}

/// A streaming converter from one byte encoding to another.
pub trait Transcoder {
    /// Convert as much of `input` into `output` as possible. `last` marks
    /// the end of the stream, so incomplete input is illegal rather than
    /// pending.
    fn convert(&mut self, input: &[u8], output: &mut [u8], last: bool) -> Conversion;
}

/// Opens transcoders by encoding name.
pub trait Codecs {
    fn open(&self, target: &str, source: &str) -> Result<Box<dyn Transcoder>>;
}

/// Default codecs backed by `encoding_rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingRsCodecs;

impl Codecs for EncodingRsCodecs {
    fn open(&self, target: &str, source: &str) -> Result<Box<dyn Transcoder>> {
        let unsupported = || SyncError::UnsupportedEncoding(format!("{source} -> {target}"));
        let transcoder: Box<dyn Transcoder> = if is_canonical(target) {
            match UnicodeForm::parse(source).map(UnicodeForm::or_little_endian) {
                Some(f) if f.width == 4 => Box::new(Utf32Decoder::new(f.endian)),
                Some(f) if f.width == 2 => {
                    let encoding = match f.endian {
                        Some(Endian::Big) => encoding_rs::UTF_16BE,
                        _ => encoding_rs::UTF_16LE,
                    };
                    Box::new(RsDecoder::new(encoding))
                }
                _ => {
                    let encoding = Encoding::for_label(source.trim().as_bytes()).ok_or_else(unsupported)?;
                    Box::new(RsDecoder::new(encoding))
                }
            }
        } else if is_canonical(source) {
            match UnicodeForm::parse(target).map(UnicodeForm::or_little_endian) {
                Some(f) if f.width == 4 => Box::new(WideEncoder::new(4, f.endian)),
                Some(f) if f.width == 2 => Box::new(WideEncoder::new(2, f.endian)),
                _ => {
                    let encoding = Encoding::for_label(target.trim().as_bytes()).ok_or_else(unsupported)?;
                    if encoding.output_encoding() != encoding {
                        return Err(unsupported());
                    }
                    Box::new(RsEncoder::new(encoding))
                }
            }
        } else {
            return Err(unsupported());
        };
        debug!("opened transcoder {source} -> {target}");
        Ok(transcoder)
    }
}

/// Decoder from any `encoding_rs` encoding to UTF-8.
struct RsDecoder(encoding_rs::Decoder);

impl RsDecoder {
    fn new(encoding: &'static Encoding) -> Self {
        // Byte order marks are dealt with before any decoding happens.
        Self(encoding.new_decoder_without_bom_handling())
    }
}

impl Transcoder for RsDecoder {
    fn convert(&mut self, input: &[u8], output: &mut [u8], last: bool) -> Conversion {
        let (result, read, written) = self.0.decode_to_utf8_without_replacement(input, output, last);
        match result {
            DecoderResult::InputEmpty => Conversion::new(read, written, Status::Ok),
            DecoderResult::OutputFull => Conversion::new(read, written, Status::OutputFull),
            DecoderResult::Malformed(bad, extra) => {
                let (bad, extra) = (usize::from(bad), usize::from(extra));
                if bad + extra > read {
                    // The sequence started in an earlier buffer and is gone
                    // already; resume right after it.
                    return Conversion::carried_illegal(read.saturating_sub(extra), written);
                }
                // Point back at the start of the malformed bytes so the
                // caller can resume one byte in.
                Conversion::new(read - bad - extra, written, Status::IllegalSequence)
            }
        }
    }
}

/// Encoder from UTF-8 to any `encoding_rs` output encoding.
struct RsEncoder(encoding_rs::Encoder);

impl RsEncoder {
    fn new(encoding: &'static Encoding) -> Self {
        Self(encoding.new_encoder())
    }
}

impl Transcoder for RsEncoder {
    fn convert(&mut self, input: &[u8], output: &mut [u8], last: bool) -> Conversion {
        let (valid, invalid) = split_utf8(input);
        let (result, read, written) =
            self.0
                .encode_from_utf8_without_replacement(valid, output, last && invalid.is_none());
        match result {
            EncoderResult::OutputFull => Conversion::new(read, written, Status::OutputFull),
            EncoderResult::Unmappable(c) => {
                Conversion::new(read - c.len_utf8(), written, Status::IllegalSequence)
            }
            EncoderResult::InputEmpty => match invalid {
                None => Conversion::new(read, written, Status::Ok),
                Some(status) => Conversion::new(read, written, status),
            },
        }
    }
}

/// Split `input` into its longest valid UTF-8 prefix and, if the rest is
/// not empty, the status that rest deserves.
fn split_utf8(input: &[u8]) -> (&str, Option<Status>) {
    match std::str::from_utf8(input) {
        Ok(text) => (text, None),
        Err(err) => {
            let valid = std::str::from_utf8(&input[..err.valid_up_to()]).unwrap_or_default();
            let status = match err.error_len() {
                Some(_) => Status::IllegalSequence,
                None => Status::NeedMoreInput,
            };
            (valid, Some(status))
        }
    }
}

/// UTF-32 to UTF-8.
struct Utf32Decoder {
    endian: Endian,
}

impl Utf32Decoder {
    fn new(endian: Option<Endian>) -> Self {
        Self {
            endian: endian.unwrap_or(Endian::Little),
        }
    }
}

impl Transcoder for Utf32Decoder {
    fn convert(&mut self, input: &[u8], output: &mut [u8], last: bool) -> Conversion {
        let mut read = 0;
        let mut written = 0;
        while let Some(unit) = input.get(read..read + 4) {
            let bytes = [unit[0], unit[1], unit[2], unit[3]];
            let scalar = match self.endian {
                Endian::Little => u32::from_le_bytes(bytes),
                Endian::Big => u32::from_be_bytes(bytes),
            };
            let Some(c) = char::from_u32(scalar) else {
                return Conversion::new(read, written, Status::IllegalSequence);
            };
            if written + c.len_utf8() > output.len() {
                return Conversion::new(read, written, Status::OutputFull);
            }
            written += c.encode_utf8(&mut output[written..]).len();
            read += 4;
        }
        let status = match (read == input.len(), last) {
            (true, _) => Status::Ok,
            (false, true) => Status::IllegalSequence,
            (false, false) => Status::NeedMoreInput,
        };
        Conversion::new(read, written, status)
    }
}

/// UTF-8 to UTF-16 or UTF-32.
struct WideEncoder {
    width: usize,
    endian: Endian,
}

impl WideEncoder {
    fn new(width: usize, endian: Option<Endian>) -> Self {
        Self {
            width,
            endian: endian.unwrap_or(Endian::Little),
        }
    }

    fn put(&self, unit: u32, out: &mut [u8]) {
        match (self.width, self.endian) {
            (2, Endian::Little) => out.copy_from_slice(&(unit as u16).to_le_bytes()),
            (2, Endian::Big) => out.copy_from_slice(&(unit as u16).to_be_bytes()),
            (_, Endian::Little) => out.copy_from_slice(&unit.to_le_bytes()),
            (_, Endian::Big) => out.copy_from_slice(&unit.to_be_bytes()),
        }
    }
}

impl Transcoder for WideEncoder {
    fn convert(&mut self, input: &[u8], output: &mut [u8], last: bool) -> Conversion {
        let (valid, invalid) = split_utf8(input);
        let mut read = 0;
        let mut written = 0;
        for c in valid.chars() {
            let mut units = [0u16; 2];
            let units: Vec<u32> = if self.width == 2 {
                c.encode_utf16(&mut units).iter().map(|&u| u32::from(u)).collect()
            } else {
                vec![u32::from(c)]
            };
            let need = units.len() * self.width;
            if written + need > output.len() {
                return Conversion::new(read, written, Status::OutputFull);
            }
            for unit in units {
                self.put(unit, &mut output[written..written + self.width]);
                written += self.width;
            }
            read += c.len_utf8();
        }
        let status = match invalid {
            None => Status::Ok,
            Some(Status::NeedMoreInput) if last => Status::IllegalSequence,
            Some(status) => status,
        };
        Conversion::new(read, written, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(transcoder: &mut dyn Transcoder, input: &[u8]) -> (Vec<u8>, Conversion) {
        let mut out = [0u8; 64];
        let conv = transcoder.convert(input, &mut out, true);
        (out[..conv.written].to_vec(), conv)
    }

    #[test]
    fn decodes_legacy_code_pages() {
        let mut dec = EncodingRsCodecs.open("UTF-8", "windows-1252").unwrap();
        let (out, conv) = run(dec.as_mut(), b"caf\xE9\n");
        assert_eq!(out, "café\n".as_bytes());
        assert_eq!(conv.status, Status::Ok);
    }

    #[test]
    fn decodes_utf16_and_utf32() {
        let mut dec = EncodingRsCodecs.open("utf8", "UTF-16BE").unwrap();
        assert_eq!(run(dec.as_mut(), b"\x00A\x00\n").0, b"A\n");
        let mut dec = EncodingRsCodecs.open("UTF-8", "UTF-32").unwrap();
        assert_eq!(run(dec.as_mut(), b"A\x00\x00\x00\xE9\x00\x00\x00").0, "Aé".as_bytes());
    }

    /// A partial UTF-32 unit waits for more input unless the stream ended.
    #[test]
    fn utf32_holds_partial_units() {
        let mut dec = Utf32Decoder::new(Some(Endian::Little));
        let mut out = [0u8; 16];
        let conv = dec.convert(b"A\x00\x00\x00B\x00", &mut out, false);
        assert_eq!((conv.read, conv.written, conv.status), (4, 1, Status::NeedMoreInput));
        let conv = dec.convert(b"B\x00", &mut out, true);
        assert_eq!(conv.status, Status::IllegalSequence);
    }

    /// Malformed input is reported at its first byte, not past it.
    #[test]
    fn points_at_malformed_bytes() {
        let mut dec = EncodingRsCodecs.open("UTF-8", "UTF-16LE").unwrap();
        let (out, conv) = run(dec.as_mut(), b"A\x00\x00\xDCB\x00");
        assert_eq!(out, b"A");
        assert_eq!((conv.read, conv.status), (2, Status::IllegalSequence));
        let mut dec = Utf32Decoder::new(None);
        let (_, conv) = run(&mut dec, b"A\x00\x00\x00\x00\x00\x11\x00");
        assert_eq!((conv.read, conv.status), (4, Status::IllegalSequence));
    }

    /// A lead byte at the end of one buffer and a bad trail at the start of
    /// the next is reported as already consumed.
    #[test]
    fn flags_sequences_from_earlier_calls() {
        let mut dec = EncodingRsCodecs.open("UTF-8", "Shift_JIS").unwrap();
        let mut out = [0u8; 16];
        let conv = dec.convert(b"A\x81", &mut out, false);
        assert_eq!((conv.read, conv.written, conv.status), (2, 1, Status::Ok));
        let conv = dec.convert(b" B\n", &mut out, false);
        assert_eq!((conv.read, conv.status, conv.carried), (0, Status::IllegalSequence, true));

        let mut dec = EncodingRsCodecs.open("UTF-8", "Shift_JIS").unwrap();
        let conv = dec.convert(b"A\x81 B\n", &mut out, false);
        assert_eq!((conv.read, conv.status, conv.carried), (1, Status::IllegalSequence, false));
    }

    #[test]
    fn encodes_wide_forms() {
        let mut enc = EncodingRsCodecs.open("UTF-16", "UTF-8").unwrap();
        assert_eq!(run(enc.as_mut(), "A😀".as_bytes()).0, b"A\x00\x3D\xD8\x00\xDE");
        let mut enc = EncodingRsCodecs.open("UTF-32BE", "UTF-8").unwrap();
        assert_eq!(run(enc.as_mut(), b"A").0, b"\x00\x00\x00A");
    }

    /// Characters the target lacks stop the encoder right in front of them.
    #[test]
    fn reports_unmappable_characters() {
        let mut enc = EncodingRsCodecs.open("windows-1252", "UTF-8").unwrap();
        let (out, conv) = run(enc.as_mut(), "a€b中c".as_bytes());
        assert_eq!(out, b"a\x80b");
        assert_eq!((conv.read, conv.status), (5, Status::IllegalSequence));
    }

    #[test]
    fn encoders_flag_broken_utf8() {
        let mut enc = WideEncoder::new(2, None);
        let mut out = [0u8; 16];
        let conv = enc.convert(b"a\xE4\xB8", &mut out, false);
        assert_eq!((conv.read, conv.status), (1, Status::NeedMoreInput));
        let conv = enc.convert(b"a\xFFb", &mut out, false);
        assert_eq!((conv.read, conv.status), (1, Status::IllegalSequence));
    }

    #[test]
    fn stops_when_output_is_full() {
        let mut dec = EncodingRsCodecs.open("UTF-8", "UTF-32LE").unwrap();
        let mut out = [0u8; 2];
        // "é中" in UTF-32LE
        let conv = dec.convert(b"\xE9\x00\x00\x00\x2D\x4E\x00\x00", &mut out, true);
        assert_eq!((conv.read, conv.written, conv.status), (4, 2, Status::OutputFull));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(matches!(
            EncodingRsCodecs.open("UTF-8", "klingon"),
            Err(SyncError::UnsupportedEncoding(_))
        ));
        assert!(EncodingRsCodecs.open("GBK", "latin1").is_err());
    }
}
