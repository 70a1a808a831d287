//! Key column resolution.
//!
//! A key specification is either a header name or a column letter address
//! (`A`, `B`, ..., `Z`, `AA`, ...). Anything that resolves to neither falls
//! back to the first header. Blank headers are never chosen.

/// Resolve `spec` against `headers`, returning the key column's header.
///
/// Returns `None` only when every header is blank.
pub fn resolve_key_column<'a>(spec: Option<&str>, headers: &'a [String]) -> Option<&'a str> {
    let named = |h: &&String| !h.is_empty();

    if let Some(spec) = spec {
        if let Some(header) = headers.iter().filter(named).find(|h| h.as_str() == spec) {
            return Some(header.as_str());
        }

        if let Some(header) = column_letter_index(spec)
            .and_then(|i| headers.get(i))
            .filter(named)
        {
            return Some(header.as_str());
        }
    }

    headers.iter().find(named).map(String::as_str)
}

/// Convert a column letter address into a 0-based index.
///
/// `A` is 0, `Z` is 25, `AA` is 26. Returns `None` for anything that is not
/// one or more ASCII letters.
pub fn column_letter_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }

    let mut index: usize = 0;
    for b in letters.bytes() {
        let digit = (b.to_ascii_uppercase() - b'A') as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<String> {
        ["id", "name", "status", "lock"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter_index("A"), Some(0));
        assert_eq!(column_letter_index("b"), Some(1));
        assert_eq!(column_letter_index("Z"), Some(25));
        assert_eq!(column_letter_index("AA"), Some(26));
        assert_eq!(column_letter_index("AZ"), Some(51));
        assert_eq!(column_letter_index("BA"), Some(52));
        assert_eq!(column_letter_index(""), None);
        assert_eq!(column_letter_index("A1"), None);
        assert_eq!(column_letter_index("ステータス"), None);
    }

    #[test]
    fn test_exact_header_match() {
        let h = headers();
        assert_eq!(resolve_key_column(Some("status"), &h), Some("status"));
    }

    #[test]
    fn test_header_name_beats_letter() {
        let mut h = headers();
        h.push("B".to_string());
        // "B" is a header, so it wins over column B ("name")
        assert_eq!(resolve_key_column(Some("B"), &h), Some("B"));
    }

    #[test]
    fn test_letter_address() {
        let h = headers();
        assert_eq!(resolve_key_column(Some("C"), &h), Some("status"));
        assert_eq!(resolve_key_column(Some("d"), &h), Some("lock"));
    }

    #[test]
    fn test_letter_out_of_range_falls_back() {
        let h = headers();
        assert_eq!(resolve_key_column(Some("Q"), &h), Some("id"));
    }

    #[test]
    fn test_unknown_spec_falls_back() {
        let h = headers();
        assert_eq!(resolve_key_column(Some("missing_1"), &h), Some("id"));
        assert_eq!(resolve_key_column(None, &h), Some("id"));
    }

    #[test]
    fn test_blank_headers_are_skipped() {
        let h: Vec<String> = ["", "id", "", "status"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(resolve_key_column(None, &h), Some("id"));
        assert_eq!(resolve_key_column(Some(""), &h), Some("id"));
        // Column C is blank, so the letter falls back to the first named header
        assert_eq!(resolve_key_column(Some("C"), &h), Some("id"));
        assert_eq!(resolve_key_column(Some("D"), &h), Some("status"));

        let blank = vec![String::new(), String::new()];
        assert_eq!(resolve_key_column(Some("A"), &blank), None);
    }

    #[test]
    fn test_empty_headers() {
        assert_eq!(resolve_key_column(Some("A"), &[]), None);
    }
}
