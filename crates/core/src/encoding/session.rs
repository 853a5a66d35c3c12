//! A transcoding session over one input and one output stream.
//!
//! The session hands out UTF-8 lines however the input was encoded and
//! takes UTF-8 back for writing, re-encoding it for the target. When the
//! input already is UTF-8 (or unknown, in which case bytes are passed
//! through untouched) no decoder is involved at all, and likewise for the
//! output.

use std::io::{BufRead, BufReader, Chain, Cursor, ErrorKind, Read, Write};
use std::mem;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::transcoder::{Codecs, Status, Transcoder};
use super::{is_canonical, sniff, Bom, Endian, UnicodeForm, CANONICAL};
use crate::error::Result;

/// Leading bytes inspected for binary content.
pub const BINARY_WINDOW: usize = 1024;
/// This many zero bytes in a row mark the stream as binary.
const BINARY_ZERO_RUN: usize = 5;
/// Raw bytes read per decoding round.
const RAW_CHUNK: usize = 1024;
const SCRATCH: usize = 1024;
/// Writes are coalesced up to this size before going through the encoder.
const CACHE_LIMIT: usize = 512;
const REPLACEMENT: &[u8] = "\u{FFFD}".as_bytes();

/// Result of [`TranscodeSession::read_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    /// One line in UTF-8, terminator included if there was one.
    Line(Vec<u8>),
    EndOfStream,
    /// The input is not text; stop processing it.
    BinaryDetected,
}

/// Aggregate conversion problems seen during a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Illegal input sequences replaced by U+FFFD.
    pub decode_errors: usize,
    /// Characters the target encoding could not represent, dropped.
    pub encode_errors: usize,
}

impl SessionStats {
    /// True when any sequence failed to decode or encode.
    pub fn had_errors(&self) -> bool {
        self.decode_errors > 0 || self.encode_errors > 0
    }
}

/// Watches the start of a stream for runs of zero bytes.
#[derive(Debug, Default)]
struct BinaryGuard {
    inspected: usize,
    zero_run: usize,
    tripped_at: Option<usize>,
}

impl BinaryGuard {
    /// Inspect more bytes; only the first [`BINARY_WINDOW`] of the stream
    /// count. Returns true once binary content has been seen.
    fn inspect(&mut self, bytes: &[u8]) -> bool {
        for &b in bytes {
            if self.tripped_at.is_some() || self.inspected >= BINARY_WINDOW {
                break;
            }
            self.inspected += 1;
            if b != 0 {
                self.zero_run = 0;
                continue;
            }
            self.zero_run += 1;
            if self.zero_run >= BINARY_ZERO_RUN {
                self.tripped_at = Some(self.inspected - BINARY_ZERO_RUN);
            }
        }
        self.tripped_at.is_some()
    }
}

type Replay<R> = BufReader<Chain<Cursor<Vec<u8>>, R>>;

/// Line reader and writer for one subtitle stream.
pub struct TranscodeSession<R: Read, W: Write> {
    reader: Replay<R>,
    writer: W,
    source: String,
    target: String,
    decoder: Option<Box<dyn Transcoder>>,
    encoder: Option<Box<dyn Transcoder>>,
    /// Set only when the target encoding was asked for by name.
    bom: Option<&'static Bom>,
    /// Raw bytes read but not decoded yet.
    carry: Vec<u8>,
    /// Decoded UTF-8 not yet handed out as a line.
    decoded: Vec<u8>,
    /// Output waiting to be encoded.
    cache: Vec<u8>,
    /// Tail of an incomplete UTF-8 sequence from the previous write.
    unencoded: Vec<u8>,
    guard: BinaryGuard,
    eof: bool,
    stats: SessionStats,
}

impl<R: Read, W: Write> TranscodeSession<R, W> {
    /// Open a session. `decode` and `encode` are optional encoding names;
    /// without `decode` the input is sniffed for a byte order mark, and
    /// without `encode` the output keeps the input's encoding.
    pub fn open(
        mut reader: R,
        writer: W,
        decode: Option<&str>,
        encode: Option<&str>,
        codecs: &dyn Codecs,
    ) -> Result<Self> {
        trace!("TranscodeSession::open(decode={decode:?}, encode={encode:?})");
        let mut prefix = Vec::with_capacity(BINARY_WINDOW);
        reader
            .by_ref()
            .take(BINARY_WINDOW as u64)
            .read_to_end(&mut prefix)?;
        let mut guard = BinaryGuard::default();
        if guard.inspect(&prefix) {
            debug!("binary content near byte {:?}", guard.tripped_at);
        }

        let decode = decode.map(str::trim).filter(|s| !s.is_empty());
        let encode = encode.map(str::trim).filter(|s| !s.is_empty());
        let (source, skip) = resolve_source(decode, &prefix);
        let (target, bom) = match encode {
            Some(name) => {
                let name = with_default_order(name);
                let bom = Bom::for_name(&name);
                (name, bom)
            }
            None => (source.clone(), None),
        };

        let decoder = if is_canonical(&source) {
            None
        } else {
            Some(codecs.open(CANONICAL, &source)?)
        };
        let encoder = if is_canonical(&target) {
            None
        } else {
            Some(codecs.open(&target, CANONICAL)?)
        };
        debug!("reading {source} (skipping {skip} BOM bytes), writing {target}");

        let replay = Cursor::new(prefix[skip..].to_vec());
        Ok(Self {
            reader: BufReader::new(replay.chain(reader)),
            writer,
            source,
            target,
            decoder,
            encoder,
            bom,
            carry: Vec::with_capacity(RAW_CHUNK),
            decoded: Vec::new(),
            cache: Vec::with_capacity(CACHE_LIMIT),
            unencoded: Vec::new(),
            guard,
            eof: false,
            stats: SessionStats::default(),
        })
    }

    /// Resolved name of the input encoding.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolved name of the output encoding.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// True once a run of zero bytes has been seen.
    pub fn is_binary(&self) -> bool {
        self.guard.tripped_at.is_some()
    }

    /// Offset of the zero run that marked the stream as binary.
    pub fn binary_offset(&self) -> Option<usize> {
        self.guard.tripped_at
    }

    /// True when input is already UTF-8 and is passed through.
    pub fn decodes_identity(&self) -> bool {
        self.decoder.is_none()
    }

    /// True when output is written without encoding.
    pub fn encodes_identity(&self) -> bool {
        self.encoder.is_none()
    }

    /// Error counts so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// The sink output goes to.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Read the next line.
    pub fn read_line(&mut self) -> Result<ReadLine> {
        if self.is_binary() {
            return Ok(ReadLine::BinaryDetected);
        }
        if self.decoder.is_none() {
            let mut line = Vec::new();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(ReadLine::EndOfStream);
            }
            return Ok(ReadLine::Line(line));
        }
        loop {
            if let Some(pos) = self.decoded.iter().position(|&b| b == b'\n') {
                let rest = self.decoded.split_off(pos + 1);
                return Ok(ReadLine::Line(mem::replace(&mut self.decoded, rest)));
            }
            if self.eof {
                if self.decoded.is_empty() {
                    return Ok(ReadLine::EndOfStream);
                }
                return Ok(ReadLine::Line(mem::take(&mut self.decoded)));
            }
            self.pump()?;
        }
    }

    /// Read one chunk of raw input and decode what can be decoded.
    fn pump(&mut self) -> Result<()> {
        let mut chunk = [0u8; RAW_CHUNK];
        let n = loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.carry.extend_from_slice(&chunk[..n]);
        }
        self.decode_carry();
        Ok(())
    }

    fn decode_carry(&mut self) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let mut scratch = [0u8; SCRATCH];
        let mut start = 0;
        loop {
            let conv = decoder.convert(&self.carry[start..], &mut scratch, self.eof);
            self.decoded.extend_from_slice(&scratch[..conv.written]);
            start += conv.read;
            match conv.status {
                Status::OutputFull => {}
                Status::IllegalSequence => {
                    self.decoded.extend_from_slice(REPLACEMENT);
                    self.stats.decode_errors += 1;
                    if conv.carried {
                        continue;
                    }
                    if start >= self.carry.len() {
                        break;
                    }
                    // Resume one byte further on.
                    start += 1;
                }
                Status::Ok | Status::NeedMoreInput => break,
            }
        }
        self.carry.drain(..start);
        if self.eof && !self.carry.is_empty() {
            self.decoded.extend_from_slice(REPLACEMENT);
            self.stats.decode_errors += 1;
            self.carry.clear();
        }
    }

    /// Write UTF-8 output. Without an encoder it goes straight to the sink;
    /// otherwise it is coalesced and encoded on [`flush`](Self::flush).
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.encoder.is_none() {
            self.writer.write_all(bytes)?;
            return Ok(());
        }
        if self.cache.len() + bytes.len() >= CACHE_LIMIT {
            self.flush()?;
        }
        if bytes.len() >= CACHE_LIMIT {
            return self.encode(bytes);
        }
        self.cache.extend_from_slice(bytes);
        Ok(())
    }

    /// Encode and write whatever the cache holds.
    pub fn flush(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let mut cache = mem::take(&mut self.cache);
        let result = self.encode(&cache);
        cache.clear();
        self.cache = cache;
        result
    }

    fn encode(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            self.writer.write_all(bytes)?;
            return Ok(());
        };
        let joined;
        let mut input: &[u8] = if self.unencoded.is_empty() {
            bytes
        } else {
            self.unencoded.extend_from_slice(bytes);
            joined = mem::take(&mut self.unencoded);
            &joined
        };
        let mut scratch = [0u8; SCRATCH];
        while !input.is_empty() {
            let conv = encoder.convert(input, &mut scratch, false);
            self.writer.write_all(&scratch[..conv.written])?;
            input = &input[conv.read..];
            match conv.status {
                Status::Ok => break,
                Status::OutputFull => {}
                Status::IllegalSequence => {
                    // Drop the offending byte; the rest of a multi-byte
                    // character is dropped the same way on the next rounds.
                    self.stats.encode_errors += 1;
                    input = input.get(1..).unwrap_or_default();
                }
                Status::NeedMoreInput => {
                    self.unencoded.extend_from_slice(input);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Write the byte order mark of the target encoding, but only when that
    /// encoding was requested explicitly. Returns whether anything was
    /// written.
    pub fn write_bom(&mut self) -> Result<bool> {
        let Some(bom) = self.bom else {
            return Ok(false);
        };
        trace!("write_bom: {}", bom.name);
        self.writer.write_all(bom.magic)?;
        Ok(true)
    }

    /// Flush everything and close the session.
    pub fn finish(mut self) -> Result<SessionStats> {
        self.flush()?;
        if !self.unencoded.is_empty() {
            self.stats.encode_errors += 1;
        }
        self.writer.flush()?;
        if self.stats.had_errors() {
            warn!(
                "{} -> {}: {} illegal input sequences, {} unencodable characters",
                self.source, self.target, self.stats.decode_errors, self.stats.encode_errors
            );
        }
        Ok(self.stats)
    }
}

/// Work out the source encoding and how many leading BOM bytes to skip.
fn resolve_source(decode: Option<&str>, prefix: &[u8]) -> (String, usize) {
    let name = match decode {
        Some(name) => match UnicodeForm::parse(name) {
            // The byte order of a bare UTF-16/32 comes from the BOM if there
            // is one, little endian otherwise.
            Some(form) if form.is_fixed_width() && form.endian.is_none() => {
                let big = UnicodeForm {
                    endian: Some(Endian::Big),
                    ..form
                };
                match Bom::for_name(&big.name()) {
                    Some(bom) if prefix.starts_with(bom.magic) => big.name(),
                    _ => form.or_little_endian().name(),
                }
            }
            _ => name.to_string(),
        },
        None => match sniff(prefix) {
            Some(bom) => bom.name.to_string(),
            None => return (CANONICAL.to_string(), 0),
        },
    };
    let skip = Bom::for_name(&name)
        .filter(|bom| prefix.starts_with(bom.magic))
        .map_or(0, |bom| bom.magic.len());
    (name, skip)
}

/// `UTF-16` and friends become `UTF-16LE`; everything else is kept as is.
fn with_default_order(name: &str) -> String {
    match UnicodeForm::parse(name) {
        Some(form) if form.is_fixed_width() && form.endian.is_none() => {
            form.or_little_endian().name()
        }
        _ => name.to_string(),
    }
}

/// Open a session with the default codecs.
pub fn open<R: Read, W: Write>(
    reader: R,
    writer: W,
    decode: Option<&str>,
    encode: Option<&str>,
) -> Result<TranscodeSession<R, W>> {
    TranscodeSession::open(reader, writer, decode, encode, &super::transcoder::EncodingRsCodecs)
}
