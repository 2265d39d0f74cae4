use std::sync::LazyLock;

use regex::Regex;

use super::fields::{self, FieldKind};

static NAME_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\p{Lu}\p{Ll}+").unwrap());
static UPPER_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{Lu}{2,}").unwrap());

const MIN_LEN: usize = 2;
const MAX_LEN: usize = 50;

// Matched case-insensitively as substrings.
const COMPANY_KEYWORDS: &[&str] = &[
    "inc", "llc", "corp", "company", "ltd", "group", "solutions", "services", "technologies",
];
const TITLE_KEYWORDS: &[&str] = &[
    "ceo", "cto", "cfo", "manager", "director", "president", "vice", "senior", "lead", "head",
    "chief", "officer", "agent",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    TooShort,
    TooLong,
    Field(FieldKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Name,
    Company,
    JobTitle,
    Unclassified,
    Excluded(Exclusion),
}

#[derive(Debug, Clone)]
pub struct LineRecord {
    pub text: String,
    pub class: LineClass,
}

/// Raw (pre-normalization) slot values. Each is filled from at most one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slots {
    pub name: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
}

impl Slots {
    fn open(&self, class: LineClass) -> bool {
        match class {
            LineClass::Name => self.name.is_none(),
            LineClass::Company => self.company.is_none(),
            LineClass::JobTitle => self.job_title.is_none(),
            _ => false,
        }
    }

    fn fill(&mut self, class: LineClass, line: &str) {
        let slot = match class {
            LineClass::Name => &mut self.name,
            LineClass::Company => &mut self.company,
            LineClass::JobTitle => &mut self.job_title,
            _ => return,
        };
        *slot = Some(line.to_string());
    }
}

/// Single ordered pass over the trimmed, non-empty lines of `text`.
///
/// Each line is tested name → company → job title against the slots still
/// open; the first test that passes claims the line. Assignment is final, so
/// the outcome depends on line order rather than on a best global fit.
pub fn classify_lines(text: &str) -> Vec<LineRecord> {
    let mut slots = Slots::default();
    let mut records = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let class = match exclusion(line) {
            Some(reason) => LineClass::Excluded(reason),
            None => classify_one(line, &slots),
        };
        slots.fill(class, line);
        records.push(LineRecord {
            text: line.to_string(),
            class,
        });
    }

    records
}

/// Collect the slot values from an already-classified pass.
pub fn fill_slots(lines: &[LineRecord]) -> Slots {
    let mut slots = Slots::default();
    for record in lines {
        if slots.open(record.class) {
            slots.fill(record.class, &record.text);
        }
    }
    slots
}

fn exclusion(line: &str) -> Option<Exclusion> {
    let len = line.chars().count();
    if len <= MIN_LEN {
        return Some(Exclusion::TooShort);
    }
    if len >= MAX_LEN {
        return Some(Exclusion::TooLong);
    }
    fields::matching_kind(line).map(Exclusion::Field)
}

fn classify_one(line: &str, slots: &Slots) -> LineClass {
    if slots.open(LineClass::Name) && looks_like_name(line) {
        LineClass::Name
    } else if slots.open(LineClass::Company) && looks_like_company(line) {
        LineClass::Company
    } else if slots.open(LineClass::JobTitle) && looks_like_job_title(line) {
        LineClass::JobTitle
    } else {
        LineClass::Unclassified
    }
}

/// 2-4 words, each starting with an uppercase letter followed by lowercase.
pub fn looks_like_name(line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    (2..=4).contains(&words.len()) && words.iter().all(|w| NAME_WORD_RE.is_match(w))
}

pub fn looks_like_company(line: &str) -> bool {
    contains_keyword(line, COMPANY_KEYWORDS) || line.contains('&') || UPPER_RUN_RE.is_match(line)
}

pub fn looks_like_job_title(line: &str) -> bool {
    contains_keyword(line, TITLE_KEYWORDS)
}

fn contains_keyword(line: &str, keywords: &[&str]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|kw| lower.contains(kw))
}
