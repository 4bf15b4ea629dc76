//! Conversion of the legacy system's local wall-clock timestamps to UTC.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use time::macros::format_description;
use time::{Duration, PrimitiveDateTime, UtcDateTime, UtcOffset};
use time_tz::{OffsetResult, PrimitiveDateTimeExt, Tz, timezones};

/// The zone legacy timestamps were recorded in.
#[derive(Debug, Clone, Copy)]
pub struct LocalZone {
    tz: &'static Tz,
}

impl LocalZone {
    /// Look up an IANA zone name such as `America/New_York`.
    pub fn new(name: &str) -> Result<Self> {
        let tz = timezones::get_by_name(name).ok_or_raise(|| ErrorKind::UnknownTimeZone(name.to_string()))?;
        Ok(Self { tz })
    }

    /// Convert a local wall-clock time to UTC.
    ///
    /// A time repeated when clocks go back is read as the first occurrence
    /// (daylight time). A time skipped when clocks go forward is read with
    /// the offset in force just before the jump.
    pub fn to_utc(&self, local: PrimitiveDateTime) -> UtcDateTime {
        match local.assume_timezone(self.tz) {
            OffsetResult::Some(at) => at.to_utc(),
            OffsetResult::Ambiguous(a, b) => {
                tracing::debug!(%local, "Ambiguous local time, assuming daylight time");
                let at = if a.offset() >= b.offset() { a } else { b };
                at.to_utc()
            },
            OffsetResult::None => {
                tracing::debug!(%local, "Local time falls in a daylight saving gap");
                local.assume_offset(self.offset_before(local)).to_utc()
            },
        }
    }

    fn offset_before(&self, local: PrimitiveDateTime) -> UtcOffset {
        match (local - Duration::days(1)).assume_timezone(self.tz) {
            OffsetResult::Some(at) | OffsetResult::Ambiguous(at, _) => at.offset(),
            OffsetResult::None => UtcOffset::UTC,
        }
    }

    /// Parse a legacy `YYYY-MM-DD HH:MM:SS[.ffffff]` timestamp and convert it
    /// to UTC. A `T` separator is accepted too.
    pub fn parse(&self, text: &str) -> Result<UtcDateTime> {
        Ok(self.to_utc(parse_naive(text)?))
    }
}

fn parse_naive(text: &str) -> Result<PrimitiveDateTime> {
    let invalid = || ErrorKind::InvalidTimestamp(text.to_string());
    let normalized = text.trim().replacen('T', " ", 1);
    let (whole, fraction) = match normalized.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (normalized.as_str(), None),
    };
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let parsed = PrimitiveDateTime::parse(whole, format).ok().ok_or_raise(invalid)?;
    let Some(fraction) = fraction else {
        return Ok(parsed);
    };
    if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        exn::bail!(invalid());
    }
    let nanos = format!("{fraction:0<9}").parse::<u32>().ok().ok_or_raise(invalid)?;
    parsed.replace_nanosecond(nanos).ok().ok_or_raise(invalid)
}
