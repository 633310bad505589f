use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;

/// Inclusive, ascending range of calendar dates. Iterating it is cheap and
/// can be repeated, which is what makes a fetch over it restartable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn iter(&self) -> DateIter {
        DateIter {
            next: Some(self.start),
            end: self.end,
        }
    }

    /// Shrink the range so it ends no later than `limit`.
    pub fn clamp_end(&self, limit: NaiveDate) -> Option<Self> {
        DateRange::new(self.start, self.end.min(limit))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

impl IntoIterator for DateRange {
    type Item = NaiveDate;
    type IntoIter = DateIter;

    fn into_iter(self) -> DateIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct DateIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DateIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next.filter(|d| *d <= self.end)?;
        self.next = current.succ_opt();
        Some(current)
    }
}

/// The most recent date whose games are all final, as seen from the
/// provider's timezone.
pub fn yesterday_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today.pred_opt().unwrap_or(today)
}

/// Parse an NBA season label into the dates it can contain.
///
/// `"2023-24"` is a single season; `"2020-2024"` covers the 2020-21 through
/// 2023-24 seasons. Seasons are taken to run from October 1 to June 30.
pub fn parse_season(s: &str) -> Result<DateRange, String> {
    let (left, right) = s
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("expected YYYY-YY or YYYY-YYYY, got {:?}", s))?;
    let start_year: i32 = parse_digits(left, 4)
        .ok_or_else(|| format!("bad start year in {:?}", s))?;

    let end_year = match right.len() {
        2 => {
            let short = parse_digits(right, 2).ok_or_else(|| format!("bad end year in {:?}", s))?;
            if short != (start_year + 1) % 100 {
                return Err(format!("season end must be start + 1, e.g. {}-{:02}", start_year, (start_year + 1) % 100));
            }
            start_year + 1
        }
        4 => {
            let end = parse_digits(right, 4).ok_or_else(|| format!("bad end year in {:?}", s))?;
            if end <= start_year {
                return Err("end year must be greater than start year".into());
            }
            end
        }
        _ => return Err(format!("expected YYYY-YY or YYYY-YYYY, got {:?}", s)),
    };

    let start = NaiveDate::from_ymd_opt(start_year, 10, 1)
        .ok_or_else(|| format!("year out of range in {:?}", s))?;
    let end = NaiveDate::from_ymd_opt(end_year, 6, 30)
        .ok_or_else(|| format!("year out of range in {:?}", s))?;
    DateRange::new(start, end).ok_or_else(|| format!("empty season range {:?}", s))
}

fn parse_digits(s: &str, width: usize) -> Option<i32> {
    if s.len() == width && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Season label ("2023-24") a date belongs to.
pub fn season_label(date: NaiveDate) -> String {
    let start = if date.month() >= 10 { date.year() } else { date.year() - 1 };
    format!("{}-{:02}", start, (start + 1) % 100)
}
