//! This module is responsible for reading and writing subtitle time stamps.
//! The parser is deliberately tolerant: any of `:`, `-`, `.`, `,` may join
//! up to four numeric fields, and the separator in front of the last field
//! decides which notation the value is written back in.

use serde::{Deserialize, Serialize};
use std::fmt;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_SECOND: i64 = 1_000;

/// At most hour, minute, second and fraction.
const MAX_FIELDS: usize = 4;

/// Notation a time stamp was read in and will be written back in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeStyle {
    /// SubRip `HH:MM:SS,mmm`.
    #[default]
    Srt,
    /// SubStation `H:MM:SS.cc`, in centiseconds.
    Ass,
    /// `HH:MM:SS:mmm`.
    Colon,
    /// `HH.MM.SS.mmm`.
    Dot,
    /// `HH-MM-SS-mmm`.
    Dash,
}

impl TimeStyle {
    /// True when the smallest unit is 1/100 second.
    pub fn is_centisecond(self) -> bool {
        matches!(self, TimeStyle::Ass)
    }

    fn from_separator(sep: u8) -> TimeStyle {
        match sep {
            b'.' => TimeStyle::Ass,
            b':' => TimeStyle::Colon,
            b'-' => TimeStyle::Dash,
            _ => TimeStyle::Srt,
        }
    }
}

/// A successfully parsed time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Signed value in milliseconds.
    pub ms: i64,
    /// Number of input bytes consumed, leading whitespace and sign included.
    pub len: usize,
    /// Notation detected from the last separator.
    pub style: TimeStyle,
    /// How many numeric fields were read (1 to 4).
    pub fields: usize,
}

impl Timestamp {
    /// True when all four fields were present, i.e. the stamp carries an hour.
    pub fn is_full(&self) -> bool {
        self.fields == MAX_FIELDS
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format(self.ms, self.style))
    }
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Hour,
    Minute,
    Second,
    Fraction,
    Millis,
}

/// How a given number of fields is read, and which range checks apply.
///
/// Minutes are only capped at 59 when an hour field sits above them, and
/// seconds only when a minute field does. That is what lets a bare `75:30`
/// or `90.5` through.
struct Layout {
    fields: usize,
    /// `Some(true)` when the layout needs a `:` before the last field,
    /// `Some(false)` when it needs anything else, `None` for either.
    colon: Option<bool>,
    units: &'static [Unit],
    minute_bounded: bool,
    second_bounded: bool,
}

const LAYOUTS: &[Layout] = &[
    Layout {
        fields: 1,
        colon: None,
        units: &[Unit::Millis],
        minute_bounded: false,
        second_bounded: false,
    },
    Layout {
        fields: 2,
        colon: Some(true),
        units: &[Unit::Minute, Unit::Second],
        minute_bounded: false,
        second_bounded: true,
    },
    Layout {
        fields: 2,
        colon: Some(false),
        units: &[Unit::Second, Unit::Fraction],
        minute_bounded: false,
        second_bounded: false,
    },
    Layout {
        fields: 3,
        colon: Some(true),
        units: &[Unit::Hour, Unit::Minute, Unit::Second],
        minute_bounded: true,
        second_bounded: true,
    },
    Layout {
        fields: 3,
        colon: Some(false),
        units: &[Unit::Minute, Unit::Second, Unit::Fraction],
        minute_bounded: false,
        second_bounded: true,
    },
    Layout {
        fields: 4,
        colon: None,
        units: &[Unit::Hour, Unit::Minute, Unit::Second, Unit::Fraction],
        minute_bounded: true,
        second_bounded: true,
    },
];

fn layout_for(fields: usize, colon: bool) -> Option<&'static Layout> {
    LAYOUTS
        .iter()
        .find(|l| l.fields == fields && l.colon.map_or(true, |c| c == colon))
}

fn is_separator(b: u8) -> bool {
    matches!(b, b':' | b'-' | b'.' | b',')
}

fn skip_space(text: &[u8], mut pos: usize) -> usize {
    while text.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

/// Read a run of ASCII digits starting at `pos`.
/// Returns `Some((value, end))`, with `end == pos` when there are no digits,
/// or `None` on overflow.
fn read_digits(text: &[u8], pos: usize) -> Option<(i64, usize)> {
    let mut value: i64 = 0;
    let mut end = pos;
    while let Some(&b) = text.get(end).filter(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        end += 1;
    }
    Some((value, end))
}

/// Parse a time stamp at the start of `text`.
pub fn parse(text: &str) -> Option<Timestamp> {
    parse_bytes(text.as_bytes())
}

/// Parse a time stamp at the start of a raw byte line.
/// Anything after the stamp is left alone; `len` says where it ended.
pub fn parse_bytes(text: &[u8]) -> Option<Timestamp> {
    let mut pos = skip_space(text, 0);
    let negative = match text.get(pos) {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };

    let mut values = [0i64; MAX_FIELDS];
    let mut count = 0;
    let mut last_sep = None;
    let mut any_digit = false;
    loop {
        let start = skip_space(text, pos);
        let (value, end) = read_digits(text, start)?;
        if end > start {
            values[count] = value;
            pos = end;
            any_digit = true;
        }
        count += 1;
        if count == MAX_FIELDS {
            break;
        }
        let next = skip_space(text, pos);
        match text.get(next) {
            Some(&b) if is_separator(b) => {
                last_sep = Some(b);
                pos = next + 1;
            }
            _ => break,
        }
    }
    if !any_digit {
        return None;
    }

    let style = last_sep.map_or(TimeStyle::Srt, TimeStyle::from_separator);
    let layout = layout_for(count, last_sep == Some(b':'))?;
    let mut ms: i64 = 0;
    for (unit, &value) in layout.units.iter().zip(&values[..count]) {
        let part = match unit {
            Unit::Hour => value.checked_mul(MS_PER_HOUR)?,
            Unit::Minute => {
                if layout.minute_bounded && value > 59 {
                    return None;
                }
                value.checked_mul(MS_PER_MINUTE)?
            }
            Unit::Second => {
                if layout.second_bounded && value > 59 {
                    return None;
                }
                value.checked_mul(MS_PER_SECOND)?
            }
            Unit::Fraction if style.is_centisecond() => {
                if value > 99 {
                    return None;
                }
                value * 10
            }
            Unit::Fraction => {
                if value > 999 {
                    return None;
                }
                value
            }
            Unit::Millis => value,
        };
        ms = ms.checked_add(part)?;
    }

    Some(Timestamp {
        ms: if negative { -ms } else { ms },
        len: pos,
        style,
        fields: count,
    })
}

/// Parse `text` as one time stamp with nothing but whitespace after it.
pub fn parse_complete(text: &str) -> Option<Timestamp> {
    let stamp = parse(text)?;
    text[stamp.len..].trim().is_empty().then_some(stamp)
}

/// Format milliseconds in the given notation.
/// Hours are zero padded to two digits but never truncated.
pub fn format(ms: i64, style: TimeStyle) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    let hours = ms / MS_PER_HOUR as u64;
    let minutes = ms % MS_PER_HOUR as u64 / MS_PER_MINUTE as u64;
    let seconds = ms % MS_PER_MINUTE as u64 / MS_PER_SECOND as u64;
    let millis = ms % MS_PER_SECOND as u64;
    match style {
        TimeStyle::Srt => format!("{sign}{hours:02}:{minutes:02}:{seconds:02},{millis:03}"),
        TimeStyle::Ass => format!("{sign}{hours}:{minutes:02}:{seconds:02}.{:02}", millis / 10),
        TimeStyle::Colon => format!("{sign}{hours:02}:{minutes:02}:{seconds:02}:{millis:03}"),
        TimeStyle::Dot => format!("{sign}{hours:02}.{minutes:02}.{seconds:02}.{millis:03}"),
        TimeStyle::Dash => format!("{sign}{hours:02}-{minutes:02}-{seconds:02}-{millis:03}"),
    }
}
