//! Canonical forms for extracted values. All functions are pure and total.

/// Lowercase, then repair common OCR confusions (`0`/`O` → `o`, `1` → `l`).
///
/// Lossy: a legitimate `0` or `1` in an address is rewritten too.
pub fn email(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| match c {
            '0' | 'O' => 'o',
            '1' | 'l' => 'l',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// North American numbers become `+1-DDD-DDD-DDDD`; everything else is `+` and the bare digits.
pub fn phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let national = match digits.len() {
        10 => Some(digits.as_str()),
        11 if digits.starts_with('1') => Some(&digits[1..]),
        _ => None,
    };
    match national {
        Some(d) => format!("+1-{}-{}-{}", &d[..3], &d[3..6], &d[6..]),
        None => format!("+{}", digits),
    }
}

pub fn website(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .trim_start_matches("www.")
        .to_string()
}

/// Keep letters, whitespace, `.` and `-`.
pub fn name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == '.' || *c == '-')
        .collect();
    collapse_whitespace(&kept)
}

/// Drops one trailing `,` or `.` ("Acme Inc." → "Acme Inc").
pub fn company(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    collapsed
        .strip_suffix([',', '.'])
        .unwrap_or(collapsed.as_str())
        .trim_end()
        .to_string()
}

pub fn job_title(raw: &str) -> String {
    collapse_whitespace(raw)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
