//! Derived display-name keys stored next to contact and group names.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lowercases and strips diacritics: "Élodie" and "elodie" fold the same.
pub fn fold(value: &str) -> String {
    value
        .trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Collation key for ordering contacts by their effective name.
pub fn sort_key(effective_name: &str) -> Vec<u8> {
    fold(effective_name).into_bytes()
}

/// Space separated, deduplicated words of the raw and custom names.
pub fn search_key(display_name: &str, custom_display_name: Option<&str>) -> String {
    let mut words: Vec<String> = Vec::new();
    for name in std::iter::once(display_name).chain(custom_display_name) {
        for word in fold(name).split_whitespace() {
            if !words.iter().any(|w| w == word) {
                words.push(word.to_string());
            }
        }
    }
    words.join(" ")
}

/// The denormalized member list of a group, as shown under the group title.
pub fn members_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_by_cached_key(|name| fold(name));
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_diacritics_and_case() {
        assert_eq!(fold("  Élodie Åström "), "elodie astrom");
        assert_eq!(sort_key("Zoë"), b"zoe".to_vec());
    }

    #[test]
    fn test_search_key_merges_names() {
        assert_eq!(search_key("Alice Martin", Some("alice")), "alice martin");
        assert_eq!(search_key("Bob", Some("Bobby B")), "bob bobby b");
        assert_eq!(search_key("Bob", None), "bob");
    }

    #[test]
    fn test_members_names_sorted_by_folded_name() {
        assert_eq!(members_names(["bob", "Émile", "alice"]), "alice, bob, Émile");
        assert_eq!(members_names(Vec::<&str>::new()), "");
    }
}
