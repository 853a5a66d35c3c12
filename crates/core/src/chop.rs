//! Record classification and the chop filter.
//!
//! A [`RecordClassifier`] watches the physical lines of one document, works
//! out whether it is SubRip or SubStation, and counts records as they go by.
//! A [`ChopFilter`] layers a [`ChopRange`] on top and decides which lines
//! are dropped. Both are plain values threaded through the line loop by the
//! caller, one per document.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::timestamp;

const DIALOGUE: &[u8] = b"Dialogue:";

/// Which subtitle dialect a document has been recognised as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentMagic {
    #[default]
    Unknown,
    Srt,
    Ass,
}

/// True when the line is a bare decimal integer, like an SRT serial number.
///
/// A dialogue line that happens to be all digits also matches and gets
/// counted as a record.
pub fn is_serial_number(line: &[u8]) -> bool {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0 && line[digits..].iter().all(|b| b.is_ascii_whitespace())
}

/// True when the line starts an SSA/ASS `Dialogue:` event, in any case.
pub fn is_dialogue(line: &[u8]) -> bool {
    line.len() >= DIALOGUE.len() && line[..DIALOGUE.len()].eq_ignore_ascii_case(DIALOGUE)
}

fn is_ass_header(line: &[u8]) -> bool {
    line.starts_with(b"[Events]") || line.starts_with(b"[Script Info]")
}

/// Per-document dialect detection and record counting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordClassifier {
    magic: DocumentMagic,
    record: u32,
}

impl RecordClassifier {
    /// A classifier that has seen no lines yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialect seen so far; `Unknown` until a record line settles it.
    pub fn magic(&self) -> DocumentMagic {
        self.magic
    }

    /// 1-based index of the current record, 0 before the first one.
    pub fn record(&self) -> u32 {
        self.record
    }

    /// Feed one physical line.
    pub fn observe(&mut self, line: &[u8]) {
        match self.magic {
            DocumentMagic::Unknown => {
                if is_serial_number(line) || timestamp::parse_bytes(line).is_some() {
                    self.resolve(DocumentMagic::Srt);
                    self.record += 1;
                } else if is_ass_header(line) {
                    self.resolve(DocumentMagic::Ass);
                } else if is_dialogue(line) {
                    self.resolve(DocumentMagic::Ass);
                    self.record += 1;
                }
            }
            DocumentMagic::Srt => {
                if is_serial_number(line) {
                    self.record += 1;
                }
            }
            DocumentMagic::Ass => {
                if is_dialogue(line) {
                    self.record += 1;
                }
            }
        }
    }

    fn resolve(&mut self, magic: DocumentMagic) {
        debug!("document recognised as {magic:?}");
        self.magic = magic;
    }
}

/// Inclusive, 1-based range of records to keep. Unset bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChopRange {
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl ChopRange {
    /// Range from raw bounds, taken as given.
    pub fn new(from: Option<u32>, to: Option<u32>) -> Self {
        Self { from, to }
    }

    /// Read `N:M`, `N:` or `:M`. A zero bound counts as unset.
    pub fn parse(arg: &str) -> Result<Self> {
        let invalid = || SyncError::InvalidChop(arg.to_string());
        let (from, to) = arg.split_once(':').ok_or_else(invalid)?;
        let bound = |s: &str| -> Result<Option<u32>> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            let n: u32 = s.parse().map_err(|_| invalid())?;
            Ok((n > 0).then_some(n))
        };
        let range = Self::new(bound(from)?, bound(to)?);
        if let (Some(from), Some(to)) = (range.from, range.to) {
            if from > to {
                return Err(invalid());
            }
        }
        Ok(range)
    }

    /// True when at least one bound is set.
    pub fn is_set(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Whether the 1-based `record` falls inside the range.
    pub fn contains(&self, record: u32) -> bool {
        self.from.map_or(true, |f| record >= f) && self.to.map_or(true, |t| record <= t)
    }
}

/// Decides, line by line, whether a line belongs to a chopped-off record.
#[derive(Debug, Clone, Default)]
pub struct ChopFilter {
    range: ChopRange,
    classifier: RecordClassifier,
}

impl ChopFilter {
    pub fn new(range: ChopRange) -> Self {
        Self {
            range,
            classifier: RecordClassifier::new(),
        }
    }

    /// The classifier fed by [`suppress`](Self::suppress).
    pub fn classifier(&self) -> &RecordClassifier {
        &self.classifier
    }

    /// Classify the line, then report whether it should be dropped.
    /// Lines ahead of the first record (an ASS script header, say) are
    /// always kept.
    pub fn suppress(&mut self, line: &[u8]) -> bool {
        self.classifier.observe(line);
        let record = self.classifier.record();
        if !self.range.is_set() || record == 0 {
            return false;
        }
        !self.range.contains(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srt_document(records: u32) -> Vec<String> {
        let mut lines = Vec::new();
        for i in 1..=records {
            lines.push(format!("{i}\r\n"));
            lines.push(format!("00:00:0{i},000 --> 00:00:0{i},500\r\n"));
            lines.push(format!("line {i}\r\n"));
            lines.push("\r\n".to_string());
        }
        lines
    }

    #[test]
    fn serial_numbers() {
        assert!(is_serial_number(b"12\r\n"));
        assert!(is_serial_number(b"7"));
        assert!(!is_serial_number(b"12 monkeys\n"));
        assert!(!is_serial_number(b" 12\n"));
        assert!(!is_serial_number(b"\n"));
    }

    #[test]
    fn dialogue_prefix_ignores_case() {
        assert!(is_dialogue(b"Dialogue: 0,0:00:01.00"));
        assert!(is_dialogue(b"dialogue: 0"));
        assert!(!is_dialogue(b"Comment: 0"));
        assert!(!is_dialogue(b"Dial"));
    }

    /// SRT documents count serial-number lines.
    #[test]
    fn counts_srt_records() {
        let mut classifier = RecordClassifier::new();
        for line in srt_document(3) {
            classifier.observe(line.as_bytes());
        }
        assert_eq!(classifier.magic(), DocumentMagic::Srt);
        assert_eq!(classifier.record(), 3);
    }

    /// An SRT file without serial numbers is recognised by its first stamp.
    #[test]
    fn recognises_srt_by_timestamp() {
        let mut classifier = RecordClassifier::new();
        classifier.observe(b"00:00:01,000 --> 00:00:02,000\n");
        assert_eq!(classifier.magic(), DocumentMagic::Srt);
        assert_eq!(classifier.record(), 1);
    }

    /// ASS headers resolve the dialect without counting; dialogues count.
    #[test]
    fn counts_ass_records() {
        let mut classifier = RecordClassifier::new();
        classifier.observe(b"[Script Info]\n");
        assert_eq!(classifier.magic(), DocumentMagic::Ass);
        assert_eq!(classifier.record(), 0);
        classifier.observe(b"Format: Marked, Start, End, Text\n");
        classifier.observe(b"Dialogue: Marked=0,0:02:42.42,0:02:44.15,Hi\n");
        classifier.observe(b"DIALOGUE: Marked=0,0:02:45.00,0:02:46.00,Yo\n");
        classifier.observe(b"42\n");
        assert_eq!(classifier.record(), 2);
    }

    /// Once resolved the dialect sticks.
    #[test]
    fn magic_never_reverts() {
        let mut classifier = RecordClassifier::new();
        classifier.observe(b"Dialogue: 0,0:00:01.00,0:00:02.00,x\n");
        classifier.observe(b"1\n");
        classifier.observe(b"[Script Info]\n");
        assert_eq!(classifier.magic(), DocumentMagic::Ass);
        assert_eq!(classifier.record(), 1);
    }

    /// An all-digit text line is counted as a record too.
    #[test]
    fn digit_only_text_is_counted() {
        let mut classifier = RecordClassifier::new();
        for line in ["1\n", "00:00:01,000 --> 00:00:02,000\n", "2024\n", "\n"] {
            classifier.observe(line.as_bytes());
        }
        assert_eq!(classifier.record(), 2);
    }

    #[test]
    fn parses_chop_ranges() {
        assert_eq!(ChopRange::parse("3:5").unwrap(), ChopRange::new(Some(3), Some(5)));
        assert_eq!(ChopRange::parse(" 3 : 5 ").unwrap(), ChopRange::new(Some(3), Some(5)));
        assert_eq!(ChopRange::parse("4:").unwrap(), ChopRange::new(Some(4), None));
        assert_eq!(ChopRange::parse(":9").unwrap(), ChopRange::new(None, Some(9)));
        assert!(!ChopRange::parse("0:0").unwrap().is_set());
        assert!(ChopRange::parse("5").is_err());
        assert!(ChopRange::parse("5:3").is_err());
        assert!(ChopRange::parse("a:b").is_err());
    }

    /// Keeping records 3 to 5 of 6 drops the first two and the last.
    #[test]
    fn keeps_only_chop_range() {
        let mut filter = ChopFilter::new(ChopRange::new(Some(3), Some(5)));
        let kept: Vec<String> = srt_document(6)
            .into_iter()
            .filter(|line| !filter.suppress(line.as_bytes()))
            .collect();
        let serials: Vec<&str> = kept
            .iter()
            .map(|l| l.trim_end())
            .filter(|l| is_serial_number(l.as_bytes()))
            .collect();
        assert_eq!(serials, ["3", "4", "5"]);
        assert_eq!(kept.len(), 12);
        assert!(kept.iter().any(|l| l.starts_with("line 4")));
        assert!(!kept.iter().any(|l| l.starts_with("line 6")));
    }

    /// The script header ahead of the first dialogue survives chopping.
    #[test]
    fn keeps_ass_preamble() {
        let mut filter = ChopFilter::new(ChopRange::new(Some(2), None));
        let lines = [
            "[Script Info]\n",
            "[Events]\n",
            "Dialogue: 0,0:00:01.00,0:00:02.00,one\n",
            "Dialogue: 0,0:00:03.00,0:00:04.00,two\n",
        ];
        let kept: Vec<&str> = lines
            .into_iter()
            .filter(|l| !filter.suppress(l.as_bytes()))
            .collect();
        assert_eq!(kept, ["[Script Info]\n", "[Events]\n", "Dialogue: 0,0:00:03.00,0:00:04.00,two\n"]);
    }

    #[test]
    fn unset_range_keeps_everything() {
        let mut filter = ChopFilter::new(ChopRange::default());
        assert!(srt_document(4).iter().all(|l| !filter.suppress(l.as_bytes())));
        assert_eq!(filter.classifier().record(), 4);
    }
}
