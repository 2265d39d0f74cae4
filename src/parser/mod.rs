pub mod fields;
pub mod lines;
pub mod normalize;

use serde::Serialize;
use tracing::debug;

/// Structured contact pulled from one card. Every field is optional; a
/// partially (or fully) empty record is a valid result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactRecord {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub website: Option<String>,
}

impl ContactRecord {
    pub fn field_count(&self) -> usize {
        [
            &self.name,
            &self.email,
            &self.phone,
            &self.company,
            &self.job_title,
            &self.website,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}

/// OCR text → contact record. Never fails: anything unrecognized is left absent.
///
/// Field extraction and line classification both read the raw text; the
/// normalizers then canonicalize whatever they found.
pub fn extract_contact(raw: &str) -> ContactRecord {
    let candidates = fields::extract(raw);
    let classified = lines::classify_lines(raw);
    let slots = lines::fill_slots(&classified);

    let record = ContactRecord {
        name: slots.name.as_deref().map(normalize::name),
        email: candidates.email.as_deref().map(normalize::email),
        phone: candidates.phone.as_deref().map(normalize::phone),
        company: slots.company.as_deref().map(normalize::company),
        job_title: slots.job_title.as_deref().map(normalize::job_title),
        website: candidates.website.as_deref().map(normalize::website),
    };
    debug!(
        lines = classified.len(),
        fields = record.field_count(),
        "extracted contact"
    );
    record
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::fields::FieldKind;
    use super::lines::{classify_lines, LineClass};
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.txt", name)).unwrap()
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn john_smith_card() {
        let r = extract_contact(&fixture("john_smith"));
        assert_eq!(
            r,
            ContactRecord {
                name: some("John Smith"),
                email: some("john.smith@acme.com"),
                phone: some("+1-555-123-4567"),
                company: some("Acme Technologies Inc"),
                job_title: some("Senior Engineer"),
                website: some("acme.com"),
            }
        );
    }

    #[test]
    fn john_smith_inline() {
        let text = "John Smith\nSenior Engineer\nAcme Technologies Inc.\njohn.smith@acme.com\n(555) 123-4567\nwww.acme.com";
        assert_eq!(extract_contact(text), extract_contact(&fixture("john_smith")));
    }

    #[test]
    fn email_only() {
        let r = extract_contact("contact@biz.io");
        assert_eq!(
            r,
            ContactRecord {
                email: some("contact@biz.io"),
                ..Default::default()
            }
        );
        assert_eq!(r.field_count(), 1);
    }

    #[test]
    fn ocr_confused_email() {
        let r = extract_contact("J0HN@C0MPANY.COM");
        assert_eq!(r.email.as_deref(), Some("john@company.com"));
    }

    #[test]
    fn uppercase_company_line() {
        let r = extract_contact("ACME CORP");
        assert_eq!(r.company.as_deref(), Some("ACME CORP"));
        assert!(r.name.is_none());
    }

    #[test]
    fn phone_formats() {
        assert_eq!(extract_contact("15551234567").phone.as_deref(), Some("+1-555-123-4567"));
        assert_eq!(extract_contact("442071234567").phone.as_deref(), Some("+442071234567"));
    }

    #[test]
    fn northwind_card() {
        let r = extract_contact(&fixture("northwind"));
        assert_eq!(r.name.as_deref(), Some("Maria Lopez"));
        assert_eq!(r.company.as_deref(), Some("NORTHWIND TRADING"));
        assert_eq!(r.job_title.as_deref(), Some("Regional Sales Manager"));
        assert_eq!(r.email.as_deref(), Some("m.lopez@northwind.com"));
        assert_eq!(r.phone.as_deref(), Some("+1-415-555-0182"));
        assert_eq!(r.website.as_deref(), Some("northwind.com"));
    }

    #[test]
    fn london_card() {
        let r = extract_contact(&fixture("london"));
        assert_eq!(r.name.as_deref(), Some("Oliver Bennett"));
        assert_eq!(r.job_title.as_deref(), Some("Head of Partnerships"));
        assert_eq!(r.company.as_deref(), Some("Fenwick & Hale"));
        assert_eq!(r.phone.as_deref(), Some("+442079460958"));
        assert_eq!(r.email.as_deref(), Some("oliver@fenwickhale.co.uk"));
        assert!(r.website.is_none());
    }

    #[test]
    fn noisy_card_degrades() {
        let r = extract_contact(&fixture("noisy"));
        // Uppercase name line is taken by the abbreviation heuristic.
        assert!(r.name.is_none());
        assert_eq!(r.company.as_deref(), Some("JANE D0E"));
        assert_eq!(r.job_title.as_deref(), Some("Director of Operations"));
        assert_eq!(r.email.as_deref(), Some("jane.doe@gmall.com"));
        assert_eq!(r.phone.as_deref(), Some("+1-312-555-0147"));
        assert!(r.website.is_none());
    }

    #[test]
    fn never_fails_on_odd_input() {
        let long = "x".repeat(10_000);
        let inputs = [
            "",
            "\n\n\n",
            "   ",
            "@@@ ... +++",
            "ünïcödé Ω ≈ ç √ ∫",
            "12",
            "(((((((((((((",
            "日本語の名刺\n株式会社テスト",
            long.as_str(),
            "+",
            "\r\nJohn Smith\r\n",
        ];
        for input in inputs {
            let _ = extract_contact(input);
        }
        assert!(extract_contact("").is_empty());
        assert!(extract_contact("\n  \n").is_empty());
    }

    #[test]
    fn field_lines_never_fill_slots() {
        for name in ["john_smith", "northwind", "london", "noisy"] {
            for line in classify_lines(&fixture(name)) {
                let has_field = FieldKind::ALL.iter().any(|k| k.is_match(&line.text));
                if has_field {
                    assert!(
                        matches!(line.class, LineClass::Excluded(_)),
                        "{}: field line {:?} was classified as {:?}",
                        name,
                        line.text,
                        line.class
                    );
                }
            }
        }
    }

    #[test]
    fn at_most_one_line_per_slot() {
        let text = "Jane Doe\nJohn Smith\nAcme Corp\nBeta LLC\nSenior Manager\nChief Officer";
        let lines = classify_lines(text);
        for class in [LineClass::Name, LineClass::Company, LineClass::JobTitle] {
            assert_eq!(lines.iter().filter(|l| l.class == class).count(), 1);
        }
    }

    #[test]
    fn serializes_absent_fields_as_null() {
        let json = serde_json::to_value(extract_contact("contact@biz.io")).unwrap();
        assert_eq!(json["email"], "contact@biz.io");
        assert!(json["name"].is_null());
    }
}
