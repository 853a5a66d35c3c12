//! Time stamp arithmetic: offset, scale and the active window that gates
//! them, plus the argument forms used to specify offsets and scales.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, SyncError};
use crate::timestamp;

/// Frame rate conversions that can be named instead of spelled out.
pub const NAMED_SCALES: [(&str, f64); 6] = [
    ("N-P", 1.1988),  // NTSC 29.97 to PAL 25
    ("P-N", 0.83417), // PAL to NTSC
    ("N-C", 1.25),    // NTSC to cinema 23.976
    ("C-N", 0.8),     // cinema to NTSC
    ("P-C", 1.04271), // PAL to cinema
    ("C-P", 0.95904), // cinema to PAL
];

/// Inclusive span of time stamps that offset and scale apply to.
/// An unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl ActiveWindow {
    /// A window from `start` to `end`; `None` leaves that side open.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// Read `--span` bounds. Each bound takes any offset form.
    pub fn parse(start: &str, end: Option<&str>) -> Result<Self> {
        trace!("ActiveWindow::parse(start={start}, end={end:?})");
        let bound = |arg: &str| parse_offset(arg).map_err(|_| SyncError::InvalidSpan(arg.to_string()));
        let window = Self::new(Some(bound(start)?), end.map(bound).transpose()?);
        if let (Some(start), Some(end)) = (window.start, window.end) {
            if start > end {
                return Err(SyncError::InvalidSpan(format!("{start} > {end}")));
            }
        }
        Ok(window)
    }

    /// True when at least one bound was given.
    pub fn is_set(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Check `ms` against each set bound, inclusively.
    pub fn contains(&self, ms: i64) -> bool {
        self.start.map_or(true, |s| ms >= s) && self.end.map_or(true, |e| ms <= e)
    }
}

/// The per-run transformation applied to every time stamp.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tweak {
    /// Milliseconds added first.
    pub offset: i64,
    /// Ratio applied after the offset; `0.0` means no scaling.
    pub scale: f64,
    /// Gate deciding which stamps are touched at all.
    pub window: ActiveWindow,
}

impl Tweak {
    /// Bundle the run's offset, scale and window.
    pub fn new(offset: i64, scale: f64, window: ActiveWindow) -> Self {
        Self {
            offset,
            scale,
            window,
        }
    }

    /// Map one time stamp. Values outside the window pass through untouched;
    /// the window is a gate, not a clamp. Results saturate at the `i64`
    /// range.
    pub fn apply(&self, ms: i64) -> i64 {
        if !self.window.contains(ms) {
            return ms;
        }
        let mut ms = ms;
        if self.offset != 0 {
            ms = ms.saturating_add(self.offset);
        }
        if self.scale != 0.0 {
            ms = (ms as f64 * self.scale).trunc() as i64;
        }
        ms
    }

    /// True when neither offset nor scale would change a stamp.
    pub fn is_identity(&self) -> bool {
        self.offset == 0 && self.scale == 0.0
    }
}

/// Accepted spellings of an offset, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetForm {
    /// `[+-]A-B`: the expected stamp minus the actual one.
    Difference,
    /// `[+-]HH:MM:SS,mmm` or any other stamp the grammar accepts.
    Timestamp,
    /// `[+-]134600`
    Integer,
}

const OFFSET_FORMS: [OffsetForm; 3] = [
    OffsetForm::Difference,
    OffsetForm::Timestamp,
    OffsetForm::Integer,
];

impl OffsetForm {
    fn extract(self, arg: &str) -> Option<i64> {
        match self {
            OffsetForm::Difference => {
                let body = strip_sign(arg);
                body.match_indices('-').find_map(|(at, _)| {
                    let minuend = timestamp::parse_complete(&body[..at])?;
                    let subtrahend = timestamp::parse_complete(&body[at + 1..])?;
                    minuend.ms.checked_sub(subtrahend.ms)
                })
            }
            OffsetForm::Timestamp => timestamp::parse_complete(arg).map(|t| t.ms),
            OffsetForm::Integer => arg.trim().parse().ok(),
        }
    }
}

/// Accepted spellings of a scale ratio, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleForm {
    /// One of [`NAMED_SCALES`].
    Named,
    /// `A/B`: the expected stamp divided by the actual one.
    Quotient,
    /// `1.000955`
    Float,
}

const SCALE_FORMS: [ScaleForm; 3] = [ScaleForm::Named, ScaleForm::Quotient, ScaleForm::Float];

impl ScaleForm {
    fn extract(self, arg: &str) -> Option<f64> {
        match self {
            ScaleForm::Named => NAMED_SCALES
                .iter()
                .find(|(id, _)| *id == arg)
                .map(|&(_, fact)| fact),
            ScaleForm::Quotient => {
                let (expect, actual) = arg.split_once('/')?;
                let expect = timestamp::parse_complete(expect)?;
                let actual = timestamp::parse_complete(actual)?;
                (actual.ms != 0).then(|| expect.ms as f64 / actual.ms as f64)
            }
            ScaleForm::Float => {
                if !arg.contains('.') {
                    return None;
                }
                arg.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
    }
}

fn strip_sign(arg: &str) -> &str {
    arg.strip_prefix(['+', '-']).unwrap_or(arg)
}

/// Resolve an offset argument to milliseconds.
/// Anything containing `/` is a scale and is rejected here.
pub fn parse_offset(arg: &str) -> Result<i64> {
    trace!("parse_offset(arg={arg})");
    if arg.contains('/') {
        return Err(SyncError::InvalidOffset(arg.to_string()));
    }
    OFFSET_FORMS
        .iter()
        .find_map(|form| form.extract(arg))
        .ok_or_else(|| SyncError::InvalidOffset(arg.to_string()))
}

/// Resolve a scale argument. A leading sign is ignored since a ratio has none.
pub fn parse_scale(arg: &str) -> Result<f64> {
    trace!("parse_scale(arg={arg})");
    let body = strip_sign(arg.trim());
    SCALE_FORMS
        .iter()
        .find_map(|form| form.extract(body))
        .ok_or_else(|| SyncError::InvalidScale(arg.to_string()))
}

/// What a bare signed argument turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Offset(i64),
    Scale(f64),
}

/// Read a bare `[+-]VALUE` argument: as an offset if any offset form fits,
/// as a scale otherwise. `+1000` shifts, `-N-P` and `1/2` scale.
pub fn resolve_argument(arg: &str) -> Result<Adjustment> {
    trace!("resolve_argument(arg={arg})");
    if let Ok(ms) = parse_offset(arg) {
        return Ok(Adjustment::Offset(ms));
    }
    parse_scale(arg)
        .map(Adjustment::Scale)
        .map_err(|_| SyncError::InvalidArgument(arg.to_string()))
}

/// Difference of two offset arguments, in milliseconds.
pub fn subtract(expect: &str, actual: &str) -> Result<i64> {
    parse_offset(expect)?
        .checked_sub(parse_offset(actual)?)
        .ok_or_else(|| SyncError::InvalidOffset(format!("{expect} - {actual}")))
}

/// Ratio of two offset arguments.
pub fn divide(expect: &str, actual: &str) -> Result<f64> {
    let divisor = parse_offset(actual)?;
    if divisor == 0 {
        return Err(SyncError::InvalidScale(actual.to_string()));
    }
    Ok(parse_offset(expect)? as f64 / divisor as f64)
}
