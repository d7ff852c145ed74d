//! Document number extraction and document type classification

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of document the winning text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Id,
    Passport,
    /// No consensus was reached, so nothing was classified
    Unknown,
}

/// Taxpayer ID, 000.000.000-00
static CPF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}\.\d{3}\.\d{3}[-/]\d{2}\b").unwrap());

/// National ID shape, 00.000.000-0
static RG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}\.\d{3}\.\d{3}-?[\dXx]\b").unwrap());

static NATIONAL_ID_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(rg|registro\s+geral|identidade|dni|id\s*(?:no|n[º°o]|number|#))\b").unwrap()
});

static DRIVER_LICENSE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cnh|habilita[cç][aã]o|driver'?s?\s+licen[cs]e|licen[cs]e\s+(?:no|number)|dl\s*(?:no|#))")
        .unwrap()
});

/// Number printed next to a label: digits with optional separators
static LABELLED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.\-/ ]{3,16}[\dXx]").unwrap());

/// Short or full numeric date such as `10/01` or `15/02/1990`
static DATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}[./\-]\d{1,2}(?:[./\-]\d{2,4})?$").unwrap());

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

static PASSPORT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(passport|passaporte|pasaporte|passeport|reisepass)\b").unwrap()
});

/// MRZ document code for passports, `P<` followed by the issuing state
static PASSPORT_MRZ: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"P<[A-Z<]{3}").unwrap());

/// Extract the document number from the winning sample's text
///
/// Priority: taxpayer ID, national ID label, driver's license label, national
/// ID shape, then the longest 7-12 digit run that is not the birth date.
pub fn extract_document_number(text: &str, birth_date: Option<NaiveDate>) -> Option<String> {
    if let Some(m) = CPF.find(text) {
        return Some(m.as_str().to_string());
    }
    if let Some(number) = labelled_number(text, &NATIONAL_ID_LABEL) {
        return Some(number);
    }
    if let Some(number) = labelled_number(text, &DRIVER_LICENSE_LABEL) {
        return Some(number);
    }
    if let Some(m) = RG.find(text) {
        return Some(m.as_str().to_string());
    }
    longest_digit_run(text, birth_date)
}

/// Number following `label` on the same line, or leading the next line
fn labelled_number(text: &str, label: &Regex) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let Some(found) = label.find(line) else {
            continue;
        };
        let rest = &line[found.end()..];
        let candidate = leading_number(rest)
            .or_else(|| lines.get(i + 1).and_then(|next| leading_number(next)));
        if let Some(number) = candidate {
            if number.chars().filter(|c| c.is_ascii_digit()).count() >= 5 {
                return Some(number);
            }
        }
    }
    None
}

/// First separator-tolerant number in `text`, cut before any date printed beside it
fn leading_number(text: &str) -> Option<String> {
    let m = LABELLED_NUMBER.find(text)?;
    let tokens: Vec<&str> = m
        .as_str()
        .split_whitespace()
        .take_while(|token| !DATE_TOKEN.is_match(token))
        .collect();
    let number = tokens.join(" ");
    let number = number.trim_end_matches(['.', '-', '/']);
    (!number.is_empty()).then(|| number.to_string())
}

fn longest_digit_run(text: &str, birth_date: Option<NaiveDate>) -> Option<String> {
    let excluded: Vec<String> = birth_date
        .map(|d| vec![d.format("%Y%m%d").to_string(), d.format("%d%m%Y").to_string()])
        .unwrap_or_default();

    let mut best: Option<&str> = None;
    for m in DIGIT_RUN.find_iter(text) {
        let run = m.as_str();
        if !(7..=12).contains(&run.len()) || excluded.iter().any(|e| e == run) {
            continue;
        }
        if best.map_or(true, |b| run.len() > b.len()) {
            best = Some(run);
        }
    }
    best.map(str::to_string)
}

/// Passport keywords or a passport MRZ marker mean `Passport`, anything else `Id`
pub fn classify(text: &str) -> DocumentType {
    if PASSPORT_KEYWORD.is_match(text) || PASSPORT_MRZ.is_match(text) {
        DocumentType::Passport
    } else {
        DocumentType::Id
    }
}
