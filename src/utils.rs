//! Small shared helpers for text normalization

/// Strip every non-digit character from a string.
///
/// Tax documents arrive formatted (`12.345.678/0001-99`) or raw; every
/// comparison and every artifact name uses the digits-only form.
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn norm_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_only_strips_formatting() {
        assert_eq!(digits_only("12.345.678/0001-99"), "12345678000199");
        assert_eq!(digits_only("  042 "), "042");
        assert_eq!(digits_only("no digits"), "");
        assert_eq!(digits_only(""), "");
    }

    #[test]
    fn norm_text_collapses_whitespace() {
        assert_eq!(
            norm_text("  NF-e \t em  processamento \n"),
            "NF-e em processamento"
        );
        assert_eq!(norm_text(""), "");
        assert_eq!(norm_text("   "), "");
    }
}
