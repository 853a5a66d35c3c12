//! Run configuration.
//!
//! A [`RetimeConfig`] is resolved once from the command line and then only
//! read, by every document processed in the run.

use serde::{Deserialize, Serialize};

use crate::chop::ChopRange;
use crate::tweak::{ActiveWindow, Tweak};

/// Everything one retiming run needs to know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetimeConfig {
    /// Milliseconds added to every stamp in the window.
    pub offset: i64,
    /// Ratio applied after the offset; `0.0` leaves stamps unscaled.
    pub scale: f64,
    pub window: ActiveWindow,
    pub chop: ChopRange,
    /// First number used when renumbering SRT serial lines.
    pub renumber_from: Option<u32>,
    /// Encoding the input is read in; sniffed when unset.
    pub decode: Option<String>,
    /// Encoding the output is written in; same as the input when unset.
    pub encode: Option<String>,
}

impl RetimeConfig {
    /// The time adjustment this run applies to every stamp.
    pub fn tweak(&self) -> Tweak {
        Tweak::new(self.offset, self.scale, self.window)
    }

    /// True when running would change nothing but the encoding.
    pub fn is_noop(&self) -> bool {
        self.tweak().is_identity() && self.renumber_from.is_none() && !self.chop.is_set()
    }
}
