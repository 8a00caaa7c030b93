//! Field normalisation for duplicate matching.
//!
//! Converts raw CRM property values into comparison keys so that cosmetic
//! differences do not hide duplicates.
//!
//! # Conventions
//!
//! - Emails: surrounding whitespace trimmed, case folded. `Ann@Example.COM`
//!   and ` ann@example.com` compare equal.
//! - Free text (names, phone numbers, domains): case folded, all whitespace
//!   and punctuation removed. `+1 (555) 010-2000` becomes `15550102000`,
//!   `O'Brien` becomes `obrien`.
//! - A value that normalises to the empty string never matches anything.

/// Normalise an email address into a comparison key.
///
/// Returns `None` for blank input.
pub fn normalize_email(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_lowercase())
}

/// Normalise free text into a comparison key.
///
/// # Algorithm
///
/// 1. Case fold with Unicode lowercase mapping
/// 2. Keep alphanumeric characters only (drops whitespace, punctuation, symbols)
/// 3. Empty result → `None`
pub fn normalize_text(s: &str) -> Option<String> {
    let folded: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect();
    if folded.is_empty() { None } else { Some(folded) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_case_and_whitespace() {
        assert_eq!(
            normalize_email("  Ann@Example.COM "),
            normalize_email("ann@example.com")
        );
    }

    #[test]
    fn email_blank() {
        assert_eq!(normalize_email(""), None);
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn text_strips_punctuation() {
        assert_eq!(
            normalize_text("+1 (555) 010-2000").as_deref(),
            Some("15550102000")
        );
        assert_eq!(normalize_text("O'Brien").as_deref(), Some("obrien"));
    }

    #[test]
    fn text_case_folded() {
        assert_eq!(normalize_text("ACME Corp."), normalize_text("acme corp"));
    }

    #[test]
    fn text_unicode_letters_kept() {
        assert_eq!(normalize_text("Zoë  Müller").as_deref(), Some("zoëmüller"));
    }

    #[test]
    fn text_only_punctuation_is_none() {
        assert_eq!(normalize_text(" -- "), None);
    }
}
