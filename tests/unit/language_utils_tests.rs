/*!
 * Tests for language utility functions
 */

use subrelay::language_utils::{
    get_language_name, language_codes_match, normalize_to_part1_or_part2t, resolve_language,
};

/// Test normalization of language codes used in paths and keys
#[test]
fn test_normalize_withMixedCodeStyles_shouldPreferPart1() {
    assert_eq!(normalize_to_part1_or_part2t("en").unwrap(), "en");
    assert_eq!(normalize_to_part1_or_part2t("eng").unwrap(), "en");
    assert_eq!(normalize_to_part1_or_part2t("dut").unwrap(), "nl");
    assert_eq!(normalize_to_part1_or_part2t(" NLD ").unwrap(), "nl");
    assert_eq!(normalize_to_part1_or_part2t("ger").unwrap(), "de");
}

#[test]
fn test_normalize_withInvalidCode_shouldFail() {
    assert!(normalize_to_part1_or_part2t("xx").is_err());
    assert!(normalize_to_part1_or_part2t("").is_err());
    assert!(normalize_to_part1_or_part2t("english").is_err());
}

/// Subtitle sources label tracks with any of the ISO 639 flavours
#[test]
fn test_languageCodesMatch_acrossIsoFlavours_shouldMatch() {
    assert!(language_codes_match("en", "eng"));
    assert!(language_codes_match("fre", "fra"));
    assert!(language_codes_match("fr", "fre"));
    assert!(language_codes_match("DE", "ger"));
    assert!(!language_codes_match("en", "nl"));
    assert!(!language_codes_match("en", "unknown"));
}

#[test]
fn test_getLanguageName_shouldReturnEnglishName() {
    assert_eq!(get_language_name("nl").unwrap(), "Dutch");
    assert_eq!(get_language_name("fra").unwrap(), "French");
    assert!(get_language_name("zz").is_err());
}

#[test]
fn test_resolveLanguage_withWrongLength_shouldBeNone() {
    assert!(resolve_language("e").is_none());
    assert!(resolve_language("engl").is_none());
    assert!(resolve_language("pt").is_some());
}
