//! Case and accent folding shared by suggestion ranking and local filtering.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lower-cases `value`, decomposes it (NFD) and drops combining marks.
///
/// `normalize("Café")` and `normalize("CAFE")` both yield `"cafe"`.
/// Lower-casing runs first so marks it introduces (`İ` -> `i̇`) are
/// stripped too, which keeps the function idempotent.
pub fn normalize(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_lowercase)
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize("Café"), "cafe");
        assert_eq!(normalize("AÇÚCAR Mascavo"), "acucar mascavo");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn dotted_capital_i_is_stable() {
        let once = normalize("İstanbul");
        assert_eq!(once, "istanbul");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn keeps_surrounding_whitespace() {
        assert_eq!(normalize("  Pão "), "  pao ");
    }
}
