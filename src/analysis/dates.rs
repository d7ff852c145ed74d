//! Birth date extraction
//!
//! Rules run in priority order: machine-readable zone, birth-date label
//! proximity, then the earliest date anywhere in the text. Every candidate
//! passes the age plausibility filter before a rule may accept it; an
//! implausible candidate lets the next rule try.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};
use tracing::trace;

use crate::config::ConsensusSettings;

/// Birth date, check digit, sex marker, expiry date
static MRZ_DATES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})(\d{2})(\d{2})\d?[MF<](\d{6})").unwrap());

/// DD sep MM sep YYYY
static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})(?:[ \t]*[./\-][ \t]*|[ \t]+)(\d{1,2})(?:[ \t]*[./\-][ \t]*|[ \t]+)(\d{4})\b")
        .unwrap()
});

/// DD MON YYYY, month spelled out or abbreviated
static TEXTUAL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:[ \t]*[./\-][ \t]*|[ \t]+)(\p{L}{3,9})\.?(?:[ \t]*[./\-][ \t]*|[ \t]+)(\d{4})\b")
        .unwrap()
});

static BIRTH_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(nasc|birth|\bdob\b|d\.o\.b|nacimiento|naissance|geburt)").unwrap()
});

/// Whole years between `birth` and `today`, `None` for dates in the future
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if birth > today {
        return None;
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// True when the implied age lies within the configured bounds, inclusive
pub fn is_plausible(birth: NaiveDate, today: NaiveDate, bounds: &ConsensusSettings) -> bool {
    age_on(birth, today).is_some_and(|age| (bounds.min_age..=bounds.max_age).contains(&age))
}

/// Extract a plausible birth date from recognized text
pub fn extract_date(text: &str, today: NaiveDate, bounds: &ConsensusSettings) -> Option<NaiveDate> {
    let plausible = |d: &NaiveDate| is_plausible(*d, today, bounds);

    if let Some(date) = mrz_dates(text, today).into_iter().find(plausible) {
        trace!("Birth date {} from machine-readable zone", date);
        return Some(date);
    }

    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if !BIRTH_LABEL.is_match(line) {
            continue;
        }
        let nearby = std::iter::once(*line).chain(lines.get(i + 1).copied());
        for candidate_line in nearby {
            if let Some(date) = dates_in(candidate_line).into_iter().find(plausible) {
                trace!("Birth date {} near label {:?}", date, line);
                return Some(date);
            }
        }
    }

    dates_in(text).into_iter().filter(plausible).min()
}

/// Birth dates encoded in MRZ lines; spaces inside a line are ignored
fn mrz_dates(text: &str, today: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    for line in text.lines() {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        for caps in MRZ_DATES.captures_iter(&compact) {
            let yy: i32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let day: u32 = caps[3].parse().unwrap_or(0);
            if let Some(date) = NaiveDate::from_ymd_opt(mrz_century(yy, today), month, day) {
                dates.push(date);
            }
        }
    }
    dates
}

/// Two-digit MRZ years belong to this century unless that lands after today's year
fn mrz_century(yy: i32, today: NaiveDate) -> i32 {
    if 2000 + yy <= today.year() {
        2000 + yy
    } else {
        1900 + yy
    }
}

/// Every valid calendar date in `text`, in order of appearance
fn dates_in(text: &str) -> Vec<NaiveDate> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    for caps in NUMERIC_DATE.captures_iter(text) {
        let month = caps[2].parse().ok();
        if let Some(date) = month.and_then(|m| build_date(&caps, m)) {
            found.push((caps.get(0).map_or(0, |m| m.start()), date));
        }
    }
    for caps in TEXTUAL_DATE.captures_iter(text) {
        if let Some(date) = month_from_name(&caps[2]).and_then(|m| build_date(&caps, m)) {
            found.push((caps.get(0).map_or(0, |m| m.start()), date));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, date)| date).collect()
}

fn build_date(caps: &Captures, month: u32) -> Option<NaiveDate> {
    let day = caps[1].parse().ok()?;
    let year = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Month number from an English, Portuguese, Spanish or French name
fn month_from_name(name: &str) -> Option<u32> {
    let upper: String = name
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'É' | 'È' => 'E',
            'Û' => 'U',
            'Ç' => 'C',
            other => other,
        })
        .collect();

    // French JUIN/JUIL share a three-letter prefix
    if upper.starts_with("JUIN") {
        return Some(6);
    }
    if upper.starts_with("JUIL") {
        return Some(7);
    }

    let prefix: String = upper.chars().take(3).collect();
    let month = match prefix.as_str() {
        "JAN" | "ENE" => 1,
        "FEB" | "FEV" => 2,
        "MAR" => 3,
        "APR" | "ABR" | "AVR" => 4,
        "MAY" | "MAI" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" | "AGO" | "AOU" => 8,
        "SEP" | "SET" => 9,
        "OCT" | "OUT" => 10,
        "NOV" => 11,
        "DEC" | "DEZ" | "DIC" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn extract(text: &str) -> Option<NaiveDate> {
        extract_date(text, today(), &ConsensusSettings::default())
    }

    #[test]
    fn test_age_is_birthday_aware() {
        assert_eq!(age_on(ymd(2008, 10, 17), today()), Some(18));
        assert_eq!(age_on(ymd(2008, 10, 18), today()), Some(17));
        assert_eq!(age_on(ymd(2027, 1, 1), today()), None);
    }

    #[test]
    fn test_plausibility_bounds() {
        // 17 years old
        assert_eq!(extract("NASCIMENTO 18/10/2008"), None);
        // 18 on the birthday itself
        assert_eq!(extract("NASCIMENTO 17/10/2008"), Some(ymd(2008, 10, 17)));
        // 90 is still accepted, 91 is not
        assert_eq!(extract("NASCIMENTO 01/01/1936"), Some(ymd(1936, 1, 1)));
        assert_eq!(extract("NASCIMENTO 01/01/1935"), None);
    }

    #[test]
    fn test_mrz_date() {
        let text = "P<BRASILVA<<JOAO<<<<<<<<<<<<<<<<<<<<<<<<<<<<\nAB1234567<8BRA9002157M3001012<<<<<<<<<<<<<<02";
        assert_eq!(extract(text), Some(ymd(1990, 2, 15)));
    }

    #[test]
    fn test_mrz_century_follows_current_year() {
        assert_eq!(mrz_century(5, today()), 2005);
        assert_eq!(mrz_century(26, today()), 2026);
        assert_eq!(mrz_century(27, today()), 1927);
    }

    #[test]
    fn test_mrz_takes_priority_over_labels() {
        let text = "DATE OF BIRTH 01/01/1980\n8501012F3001012";
        assert_eq!(extract(text), Some(ymd(1985, 1, 1)));
    }

    #[test]
    fn test_label_on_same_line() {
        assert_eq!(extract("NASCIMENTO 15/02/1990"), Some(ymd(1990, 2, 15)));
        assert_eq!(extract("Date of birth: 03.07.1975"), Some(ymd(1975, 7, 3)));
    }

    #[test]
    fn test_label_with_date_on_next_line() {
        let text = "EXPEDICAO 10/01/1970\nDATA DE NASCIMENTO\n15/02/1990\nVALIDADE 10/01/2030";
        assert_eq!(extract(text), Some(ymd(1990, 2, 15)));
    }

    #[test]
    fn test_implausible_label_date_falls_through() {
        // Labelled date implies age 11, so the fallback rule answers
        let text = "NASCIMENTO 01/03/2015\nREPUBLICA\n12/05/1985";
        assert_eq!(extract(text), Some(ymd(1985, 5, 12)));
    }

    #[test]
    fn test_fallback_picks_earliest() {
        let text = "REPUBLICA\n15/02/1990\n12 - 05 - 1985\n01/03/2001";
        assert_eq!(extract(text), Some(ymd(1985, 5, 12)));
    }

    #[test]
    fn test_invalid_calendar_dates_are_skipped() {
        assert_eq!(extract("NASC 31/02/1990"), None);
        assert_eq!(extract("NASC 31/02/1990 29/02/1988"), Some(ymd(1988, 2, 29)));
    }

    #[test]
    fn test_textual_months() {
        assert_eq!(extract("NASCIMENTO 15 FEV 1990"), Some(ymd(1990, 2, 15)));
        assert_eq!(extract("DOB 3 Dec 1979"), Some(ymd(1979, 12, 3)));
        assert_eq!(extract("Né le 4 juil. 1982 naissance"), Some(ymd(1982, 7, 4)));
        assert_eq!(month_from_name("juin"), Some(6));
        assert_eq!(month_from_name("OUT"), Some(10));
        assert_eq!(month_from_name("XYZ"), None);
    }

    #[test]
    fn test_no_date() {
        assert_eq!(extract(""), None);
        assert_eq!(extract("REPUBLICA FEDERATIVA DO BRASIL"), None);
    }
}
