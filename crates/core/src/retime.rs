//! The retiming pass: one subtitle document in, one out.
//!
//! Lines flow from a [`TranscodeSession`] through the chop filter and the
//! [`LineRewriter`] and back into the session. Everything that is not a time
//! stamp or a renumbered serial line is copied byte for byte.

use std::io::{Read, Write};

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::chop::{is_dialogue, is_serial_number, ChopFilter, DocumentMagic};
use crate::config::RetimeConfig;
use crate::encoding::session::{ReadLine, SessionStats, TranscodeSession};
use crate::encoding::transcoder::{Codecs, EncodingRsCodecs};
use crate::error::{Result, SyncError};
use crate::timestamp;
use crate::tweak::Tweak;

/// Summary of one retiming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetimeReport {
    pub lines_read: usize,
    /// Lines left out by the chop range.
    pub lines_dropped: usize,
    pub stamps_rewritten: usize,
    /// Records counted by the classifier.
    pub records: u32,
    pub magic: DocumentMagic,
    pub source_encoding: String,
    pub target_encoding: String,
    pub stats: SessionStats,
}

/// Rewrites the time stamps and serial numbers of single lines.
#[derive(Debug, Clone)]
pub struct LineRewriter {
    tweak: Tweak,
    next_serial: Option<u32>,
    stamps: usize,
}

impl LineRewriter {
    pub fn new(tweak: Tweak, renumber_from: Option<u32>) -> Self {
        Self {
            tweak,
            next_serial: renumber_from,
            stamps: 0,
        }
    }

    /// Number of time stamps rewritten so far.
    pub fn stamps(&self) -> usize {
        self.stamps
    }

    /// Rewrite one line, terminator included.
    pub fn rewrite_line(&mut self, line: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(line.len() + 8);
        let lead = line.iter().take_while(|&&b| (0x01..=0x20).contains(&b)).count();
        out.extend_from_slice(&line[..lead]);
        let body = &line[lead..];

        if is_dialogue(body) {
            self.rewrite_dialogue(body, &mut out);
        } else if timestamp::parse_bytes(body).is_some_and(|t| t.is_full()) {
            self.rewrite_range(body, &mut out);
        } else if let Some(serial) = self.next_serial.filter(|_| is_serial_number(body)) {
            let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
            out.extend_from_slice(serial.to_string().as_bytes());
            out.extend_from_slice(&body[digits..]);
            self.next_serial = Some(serial.saturating_add(1));
        } else {
            out.extend_from_slice(body);
        }
        out
    }

    /// `Dialogue: Marked=0,0:02:42.42,0:02:44.15,...`: the stamps follow the
    /// first and second comma.
    fn rewrite_dialogue(&mut self, body: &[u8], out: &mut Vec<u8>) {
        let mut rest = body;
        for _ in 0..2 {
            let Some(comma) = rest.iter().position(|&b| b == b',') else {
                break;
            };
            out.extend_from_slice(&rest[..=comma]);
            rest = &rest[comma + 1..];
            match self.retime_stamp(rest, out) {
                Some(len) => rest = &rest[len..],
                None => break,
            }
        }
        out.extend_from_slice(rest);
    }

    /// `00:02:17,440 --> 00:02:20,375`: a stamp, a run of non-digits, and
    /// another stamp.
    fn rewrite_range(&mut self, body: &[u8], out: &mut Vec<u8>) {
        let mut rest = body;
        if let Some(len) = self.retime_stamp(rest, out) {
            rest = &rest[len..];
        }
        let gap = rest.iter().take_while(|b| !b.is_ascii_digit()).count();
        out.extend_from_slice(&rest[..gap]);
        rest = &rest[gap..];
        if let Some(len) = self.retime_stamp(rest, out) {
            rest = &rest[len..];
        }
        out.extend_from_slice(rest);
    }

    /// Rewrite the stamp at the start of `text` in its own style and return
    /// how many bytes it took up. Whitespace in front of it is kept.
    fn retime_stamp(&mut self, text: &[u8], out: &mut Vec<u8>) -> Option<usize> {
        let pad = text.iter().take_while(|b| b.is_ascii_whitespace()).count();
        let stamp = timestamp::parse_bytes(&text[pad..])?;
        let ms = self.tweak.apply(stamp.ms);
        out.extend_from_slice(&text[..pad]);
        out.extend_from_slice(timestamp::format(ms, stamp.style).as_bytes());
        self.stamps += 1;
        Some(pad + stamp.len)
    }
}

/// Retime one document with the default codecs.
pub fn retime<R: Read, W: Write>(input: R, output: W, config: &RetimeConfig) -> Result<RetimeReport> {
    retime_with(input, output, config, &EncodingRsCodecs)
}

/// Retime one document, opening transcoders through `codecs`.
/// Binary input is rejected before anything is written.
pub fn retime_with<R: Read, W: Write>(
    input: R,
    output: W,
    config: &RetimeConfig,
    codecs: &dyn Codecs,
) -> Result<RetimeReport> {
    trace!("retime_with(config={config:?})");
    let mut session = TranscodeSession::open(
        input,
        output,
        config.decode.as_deref(),
        config.encode.as_deref(),
        codecs,
    )?;
    if let Some(offset) = session.binary_offset() {
        return Err(SyncError::BinaryContent { offset });
    }
    if session.write_bom()? {
        debug!("wrote {} byte order mark", session.target());
    }

    let mut filter = ChopFilter::new(config.chop);
    let mut rewriter = LineRewriter::new(config.tweak(), config.renumber_from);
    let mut record = 0;
    let mut report = RetimeReport {
        source_encoding: session.source().to_string(),
        target_encoding: session.target().to_string(),
        ..RetimeReport::default()
    };
    loop {
        let line = match session.read_line()? {
            ReadLine::Line(line) => line,
            ReadLine::EndOfStream => break,
            ReadLine::BinaryDetected => {
                return Err(SyncError::BinaryContent {
                    offset: session.binary_offset().unwrap_or_default(),
                })
            }
        };
        report.lines_read += 1;
        if filter.suppress(&line) {
            report.lines_dropped += 1;
            continue;
        }
        // Encoded output goes out a record at a time.
        if filter.classifier().record() != record {
            record = filter.classifier().record();
            session.flush()?;
        }
        let line = rewriter.rewrite_line(&line);
        session.write(&line)?;
        if line.iter().all(u8::is_ascii_whitespace) {
            session.flush()?;
        }
    }

    report.stamps_rewritten = rewriter.stamps();
    report.records = filter.classifier().record();
    report.magic = filter.classifier().magic();
    report.stats = session.finish()?;
    info!(
        "retimed {} stamps in {} records ({:?}), dropped {} lines",
        report.stamps_rewritten, report.records, report.magic, report.lines_dropped
    );
    Ok(report)
}
