use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
// 9..=16 chars after the optional "+(" prefix, never across a line break.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\(?[0-9][0-9 .()-]{7,14}[0-9]").unwrap());
// Group 1 is the domain; the leading class keeps `user@biz.io` from counting as a website.
// A domain directly followed by `@` is an email local part and is skipped in `website_match`.
static WEBSITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[^@\w.])(www\.[a-z0-9-]+(?:\.[a-z0-9-]+)+|[a-z0-9-]+(?:\.[a-z0-9-]+)*\.(?:com|net|org|io|co|uk|ca|de)\b)",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Email,
    Phone,
    Website,
}

impl FieldKind {
    pub const ALL: [FieldKind; 3] = [FieldKind::Email, FieldKind::Phone, FieldKind::Website];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Website => "website",
        }
    }

    /// First match of this kind's pattern, verbatim.
    pub fn find_first(self, text: &str) -> Option<&str> {
        match self {
            FieldKind::Email => EMAIL_RE.find(text).map(|m| m.as_str()),
            FieldKind::Phone => PHONE_RE.find(text).map(|m| m.as_str()),
            FieldKind::Website => website_match(text),
        }
    }

    pub fn is_match(self, text: &str) -> bool {
        match self {
            FieldKind::Email => EMAIL_RE.is_match(text),
            FieldKind::Phone => PHONE_RE.is_match(text),
            FieldKind::Website => website_match(text).is_some(),
        }
    }
}

fn website_match(text: &str) -> Option<&str> {
    WEBSITE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find(|m| !text[m.end()..].starts_with('@'))
        .map(|m| m.as_str())
}

/// First raw candidate per field kind, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// Scan the whole text, ignoring line structure. Patterns run independently,
/// so a phone candidate may come from digits that also sit inside an email or ID.
pub fn extract(text: &str) -> Candidates {
    let first = |kind: FieldKind| kind.find_first(text).map(str::to_string);
    Candidates {
        email: first(FieldKind::Email),
        phone: first(FieldKind::Phone),
        website: first(FieldKind::Website),
    }
}

/// The first field kind whose pattern occurs anywhere in `line`.
pub fn matching_kind(line: &str) -> Option<FieldKind> {
    FieldKind::ALL.into_iter().find(|k| k.is_match(line))
}
