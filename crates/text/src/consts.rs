use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// A UTF-8 lead byte followed by continuation bytes, each decoded as Latin-1.
regex!(DOUBLE_ENCODED, r"[\xC2-\xF4][\x80-\xBF]+");

/// Legacy charsets tried, in order, when explaining a change as a
/// re-encoding of the previous snapshot. Labels are WHATWG labels; entries
/// without an encoder (IBM855) never match.
pub(crate) const LEGACY_CHARSETS: &[&str] = &[
    "euc-jp",
    "gb2312",
    "euc-kr",
    "big5",
    "shift_jis",
    "windows-1252",
    "ibm855",
    "ibm866",
    "iso-8859-2",
    "iso-8859-5",
    "iso-8859-7",
    "koi8-r",
    "x-mac-cyrillic",
    "tis-620",
    "windows-1250",
    "windows-1251",
    "windows-1253",
    "windows-1255",
];
