//! Character encoding support.
//!
//! Subtitle text is processed as UTF-8 internally. This module sniffs byte
//! order marks and normalises encoding names. [`transcoder`] provides the
//! byte-level conversions and [`session`] wraps a pair of streams so the
//! rest of the crate can read and write lines without caring what the file
//! was encoded in.

pub mod session;
pub mod transcoder;

/// Name of the internal text encoding.
pub const CANONICAL: &str = "UTF-8";

/// Byte order of a multi-byte encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A known byte order mark.
#[derive(Debug, PartialEq, Eq)]
pub struct Bom {
    pub magic: &'static [u8],
    pub name: &'static str,
}

pub static BOMS: [Bom; 5] = [
    Bom {
        magic: b"\xEF\xBB\xBF",
        name: "UTF-8",
    },
    Bom {
        magic: b"\xFE\xFF",
        name: "UTF-16BE",
    },
    Bom {
        magic: b"\xFF\xFE",
        name: "UTF-16LE",
    },
    Bom {
        magic: b"\x00\x00\xFE\xFF",
        name: "UTF-32BE",
    },
    Bom {
        magic: b"\xFF\xFE\x00\x00",
        name: "UTF-32LE",
    },
];

impl Bom {
    /// Width of one code unit in bytes.
    pub fn width(&self) -> u8 {
        self.form().width
    }

    pub fn endian(&self) -> Option<Endian> {
        self.form().endian
    }

    fn form(&self) -> UnicodeForm {
        UnicodeForm::parse(self.name).unwrap_or_default()
    }

    /// BOM for an encoding name, compared in normalised form. UTF-16 and
    /// UTF-32 without a byte order are taken as little endian.
    pub fn for_name(name: &str) -> Option<&'static Bom> {
        let wanted = UnicodeForm::parse(name)?.or_little_endian();
        BOMS.iter().find(|bom| bom.form() == wanted)
    }
}

/// Find the longest byte order mark at the start of `prefix`.
pub fn sniff(prefix: &[u8]) -> Option<&'static Bom> {
    BOMS.iter()
        .filter(|bom| prefix.starts_with(bom.magic))
        .max_by_key(|bom| bom.magic.len())
}

/// Unicode encoding name broken into family, code unit width and byte order.
///
/// `UTF-16BE`, `utf16be` and `UCS-2BE` all normalise to a 2-byte big endian
/// form. Names outside the UTF/UCS families have no form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnicodeForm {
    pub ucs: bool,
    /// 1, 2 or 4; 0 for widths we do not know (UTF-7 and the like).
    pub width: u8,
    pub endian: Option<Endian>,
}

impl UnicodeForm {
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let (ucs, rest) = if let Some(rest) = lower.strip_prefix("ucs") {
            (true, rest)
        } else if let Some(rest) = lower.strip_prefix("utf") {
            (false, rest)
        } else {
            return None;
        };
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        let (width, rest) = [("8", 1), ("16", 2), ("2", 2), ("32", 4), ("4", 4)]
            .iter()
            .find_map(|(digits, width)| rest.strip_prefix(digits).map(|r| (*width, r)))
            .unwrap_or((0, rest));
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        let endian = if rest.starts_with("le") {
            Some(Endian::Little)
        } else if rest.starts_with("be") {
            Some(Endian::Big)
        } else {
            None
        };
        Some(Self { ucs, width, endian })
    }

    /// True for UTF-16 and UTF-32 style encodings, whose byte order matters.
    pub fn is_fixed_width(&self) -> bool {
        matches!(self.width, 2 | 4)
    }

    pub fn or_little_endian(mut self) -> Self {
        if self.is_fixed_width() && self.endian.is_none() {
            self.endian = Some(Endian::Little);
        }
        self
    }

    /// Canonical spelling, such as `UTF-16LE`.
    pub fn name(&self) -> String {
        let suffix = match self.endian {
            Some(Endian::Little) => "LE",
            Some(Endian::Big) => "BE",
            None => "",
        };
        format!("UTF-{}{suffix}", u32::from(self.width) * 8)
    }
}

/// True if `name` is a spelling of the internal encoding.
pub fn is_canonical(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case("CP65001")
        || UnicodeForm::parse(name).is_some_and(|f| !f.ucs && f.width == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each table entry sniffs as itself.
    #[test]
    fn sniffs_known_marks() {
        assert_eq!(sniff(b"\xEF\xBB\xBF ABC").unwrap().name, "UTF-8");
        assert_eq!(sniff(b"\xFE\xFF ABC").unwrap().name, "UTF-16BE");
        assert_eq!(sniff(b"\xFF\xFE ABC").unwrap().name, "UTF-16LE");
        assert_eq!(sniff(b"\x00\x00\xFE\xFF ABC").unwrap().name, "UTF-32BE");
        assert_eq!(sniff(b"\xFF\xFE\x00\x00 ABC").unwrap().name, "UTF-32LE");
    }

    /// The longest match wins, and a near miss falls back to the shorter mark.
    #[test]
    fn prefers_longest_match() {
        assert_eq!(sniff(b"\xFF\xFE\x00 ABC").unwrap().name, "UTF-16LE");
        assert_eq!(sniff(b"\xFF\xFE\x00\x00").unwrap().name, "UTF-32LE");
    }

    #[test]
    fn unknown_marks_are_not_detected() {
        assert!(sniff(b"\x2B\x2F\x76 ABC").is_none());
        assert!(sniff(b"\x84\x31\x95\x33 ABC").is_none());
        assert!(sniff(b"1\r\n00:00").is_none());
        assert!(sniff(b"").is_none());
    }

    #[test]
    fn reports_width_and_order() {
        let bom = sniff(b"\x00\x00\xFE\xFF").unwrap();
        assert_eq!((bom.width(), bom.endian()), (4, Some(Endian::Big)));
        let bom = sniff(b"\xEF\xBB\xBF").unwrap();
        assert_eq!((bom.width(), bom.endian()), (1, None));
    }

    /// Different spellings of one encoding normalise to the same form.
    #[test]
    fn normalises_names() {
        let be = UnicodeForm::parse("UTF-16BE").unwrap();
        assert_eq!(be, UnicodeForm::parse("utf16be").unwrap());
        assert_eq!(be.width, 2);
        assert_eq!(be.endian, Some(Endian::Big));
        let ucs = UnicodeForm::parse("UCS-4LE").unwrap();
        assert!(ucs.ucs);
        assert_eq!((ucs.width, ucs.endian), (4, Some(Endian::Little)));
        assert_eq!(UnicodeForm::parse("utf-7").unwrap().width, 0);
        assert!(UnicodeForm::parse("GBK").is_none());
    }

    #[test]
    fn canonical_spellings() {
        for name in ["UTF-8", "utf8", "Utf-8", "CP65001"] {
            assert!(is_canonical(name), "{name}");
        }
        for name in ["UTF-16", "latin1", "ucs-8"] {
            assert!(!is_canonical(name), "{name}");
        }
    }

    /// Unordered UTF-16/32 names take the little endian mark.
    #[test]
    fn bom_for_name() {
        assert_eq!(Bom::for_name("utf-16").unwrap().magic, b"\xFF\xFE");
        assert_eq!(Bom::for_name("UTF-32BE").unwrap().magic, b"\x00\x00\xFE\xFF");
        assert_eq!(Bom::for_name("utf8").unwrap().magic, b"\xEF\xBB\xBF");
        assert!(Bom::for_name("windows-1252").is_none());
        assert_eq!(UnicodeForm::parse("ucs2").unwrap().or_little_endian().name(), "UTF-16LE");
    }
}
