//! Normalized edit-distance similarity between message texts.

/// Similarity ratio in `[0, 1]`: `1 - levenshtein(a, b) / max(len(a), len(b))`.
///
/// Lengths and distance are counted in chars, not bytes, so Cyrillic text is
/// weighted the same as ASCII. Two empty strings are identical (`1.0`).
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (1.0 - distance as f64 / longest as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts() {
        assert_eq!(similarity("Дата: 2024-05-16", "Дата: 2024-05-16"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn completely_different() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("", "abc"), 0.0);
    }

    #[test]
    fn single_char_difference() {
        let s = similarity("Адрес: Мира 15", "Адрес: Мира 16");
        assert!(s < 1.0);
        assert!((s - (1.0 - 1.0 / 14.0)).abs() < 1e-9, "got {s}");
        assert_eq!(similarity("a", "b"), 0.0);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // 5 Cyrillic chars, one substitution.
        let s = similarity("Адрес", "Адрес".replace('с', "з").as_str());
        assert!((s - 0.8).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn symmetric() {
        let a = "Встреча 2023-12-25, улица Пушкина 20";
        let b = "Встреча 2023-12-26, улица Пушкина";
        assert_eq!(similarity(a, b), similarity(b, a));
    }
}
