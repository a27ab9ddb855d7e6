use std::fmt;

use time::OffsetDateTime;

use crate::error::{Error, ErrorKind};

/// `{Full, Diff, Incr}` from the data model. Allowed transitions inside a
/// backup set: `Full -> (Diff | Incr)*`, `Diff -> Incr*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackupType {
    Full,
    Diff,
    Incr,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Diff => "diff",
            BackupType::Incr => "incr",
        }
    }

    fn suffix_char(self) -> Option<char> {
        match self {
            BackupType::Full => None,
            BackupType::Diff => Some('D'),
            BackupType::Incr => Some('I'),
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 15-character timestamp in the `YYYYMMDD-HHMMSS` grammar used both as
/// the full-backup prefix and as the differential/incremental suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp15([u8; 15]);

impl Timestamp15 {
    pub fn now_local() -> Self {
        let now = OffsetDateTime::now_utc();
        Self::from_offset(now)
    }

    pub fn from_offset(dt: OffsetDateTime) -> Self {
        let mut buf = [0u8; 15];
        let s = format!(
            "{:04}{:02}{:02}-{:02}{:02}{:02}",
            dt.year(),
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        );
        buf.copy_from_slice(s.as_bytes());
        Self(buf)
    }

    /// Advance by one second, as the allocation rule requires on collision.
    pub fn plus_one_second(self) -> Self {
        let s = std::str::from_utf8(&self.0).unwrap();
        let (date, time) = s.split_at(8);
        let time = &time[1..]; // skip '-'
        let year: i32 = date[0..4].parse().unwrap();
        let month: u8 = date[4..6].parse().unwrap();
        let day: u8 = date[6..8].parse().unwrap();
        let hour: u8 = time[0..2].parse().unwrap();
        let minute: u8 = time[2..4].parse().unwrap();
        let second: u8 = time[4..6].parse().unwrap();

        let month = time::Month::try_from(month).unwrap();
        let date = time::Date::from_calendar_date(year, month, day).unwrap();
        let t = time::Time::from_hms(hour, minute, second).unwrap();
        let dt = date.with_time(t) + time::Duration::seconds(1);
        Self::from_offset(dt.assume_utc())
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap()
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() != 15 || s.as_bytes()[8] != b'-' {
            return Err(Error::new(
                ErrorKind::Format,
                format!("invalid timestamp '{s}'"),
            ));
        }
        let digits_ok = s
            .bytes()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit());
        if !digits_ok {
            return Err(Error::new(
                ErrorKind::Format,
                format!("invalid timestamp '{s}'"),
            ));
        }
        let mut buf = [0u8; 15];
        buf.copy_from_slice(s.as_bytes());
        Ok(Self(buf))
    }
}

impl fmt::Display for Timestamp15 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backup label: `YYYYMMDD-HHMMSSF` or
/// `YYYYMMDD-HHMMSSF_YYYYMMDD-HHMMSS[DI]`.
///
/// Invariant upheld by construction: the first 16 characters always name
/// the parent full backup, even for a `Full` label (where they name
/// itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupLabel(String);

impl BackupLabel {
    pub fn new_full(ts: Timestamp15) -> Self {
        Self(format!("{ts}F"))
    }

    pub fn new_child(full_ts: Timestamp15, child_ts: Timestamp15, ty: BackupType) -> Self {
        let suffix = ty.suffix_char().expect("Full has no child suffix");
        Self(format!("{full_ts}F_{child_ts}{suffix}"))
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let bad = || Error::new(ErrorKind::Format, format!("invalid backup label '{s}'"));
        if s.len() == 16 {
            if &s[15..16] != "F" {
                return Err(bad());
            }
            Timestamp15::parse(&s[0..15])?;
            return Ok(Self(s.to_string()));
        }
        if s.len() == 33 {
            if s.as_bytes()[15] != b'F' || s.as_bytes()[16] != b'_' {
                return Err(bad());
            }
            Timestamp15::parse(&s[0..15])?;
            Timestamp15::parse(&s[17..32])?;
            return match &s[32..] {
                "D" | "I" => Ok(Self(s.to_string())),
                _ => Err(bad()),
            };
        }
        Err(bad())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 16-character prefix identifying the parent full backup (or
    /// itself, for a full backup).
    pub fn full_prefix(&self) -> &str {
        &self.0[0..16]
    }

    pub fn backup_type(&self) -> BackupType {
        if self.0.len() == 16 {
            BackupType::Full
        } else {
            match self.0.as_bytes()[self.0.len() - 1] {
                b'D' => BackupType::Diff,
                b'I' => BackupType::Incr,
                _ => unreachable!("validated at construction"),
            }
        }
    }

    /// The 15-character timestamp prefix that must be unique per stanza,
    /// per the label-uniqueness invariant (spec S8.1).
    pub fn timestamp_prefix(&self) -> &str {
        &self.0[0..15]
    }
}

impl fmt::Display for BackupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_label() {
        let l = BackupLabel::parse("20230101-000000F").unwrap();
        assert_eq!(l.backup_type(), BackupType::Full);
        assert_eq!(l.full_prefix(), "20230101-000000F");
    }

    #[test]
    fn parses_diff_and_incr_labels() {
        let d = BackupLabel::parse("20230101-000000F_20230102-010000D").unwrap();
        assert_eq!(d.backup_type(), BackupType::Diff);
        assert_eq!(d.full_prefix(), "20230101-000000F");

        let i = BackupLabel::parse("20230101-000000F_20230102-010000I").unwrap();
        assert_eq!(i.backup_type(), BackupType::Incr);
    }

    #[test]
    fn rejects_garbage() {
        assert!(BackupLabel::parse("not-a-label").is_err());
        assert!(BackupLabel::parse("20230101-000000X").is_err());
    }

    #[test]
    fn timestamp_advances_across_minute_boundary() {
        let ts = Timestamp15::parse("20230101-000059").unwrap();
        let next = ts.plus_one_second();
        assert_eq!(next.as_str(), "20230101-000100");
    }
}
