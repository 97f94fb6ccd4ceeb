//! Phone number cleanup shared by the resolver (deduplication) and the channel adapters.

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;
const LONGEST_NATIONAL_NUMBER: usize = 10;

/// Normalize a directory or ad-hoc number to E.164 (`+<country><subscriber>`).
///
/// Accepts `+` or `00` international prefixes, strips formatting punctuation, and replaces a
/// national trunk `0` with `default_country_code`. Returns `None` for anything that cannot be
/// turned into 8-15 digits.
pub fn normalize(raw: &str, default_country_code: &str) -> Option<String> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return None;
    }

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("{default_country_code}{rest}")
    } else if cleaned.len() <= LONGEST_NATIONAL_NUMBER {
        format!("{default_country_code}{cleaned}")
    } else {
        cleaned
    };

    if digits.starts_with('0') || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
        return None;
    }

    Some(format!("+{digits}"))
}

/// Strip whitespace and formatting punctuation, keeping digits and a leading `+`.
pub fn clean(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut cleaned = String::with_capacity(trimmed.len());
    for (index, c) in trimmed.chars().enumerate() {
        match c {
            '+' if index == 0 => cleaned.push(c),
            c if c.is_ascii_digit() => cleaned.push(c),
            ' ' | '-' | '(' | ')' | '.' | '/' | '\u{a0}' => {}
            // keep anything unexpected so validation downstream rejects it visibly
            other => cleaned.push(other),
        }
    }
    cleaned
}

pub fn is_e164(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => {
            (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
                && !digits.starts_with('0')
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
