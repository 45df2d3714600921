//! Naming convention variants used to bridge language boundaries.

use crate::utils::split_words;

/// `snake_case`, `camelCase`, `PascalCase` and `kebab-case` spellings of
/// `name`, deduplicated, excluding `name` itself.
pub fn naming_variants(name: &str) -> Vec<String> {
    let words = split_words(name);
    if words.is_empty() {
        return Vec::new();
    }

    let capitalize = |word: &str| {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        }
    };

    let pascal: String = words.iter().map(|w| capitalize(w)).collect();
    let camel: String = words
        .iter()
        .enumerate()
        .map(|(i, w)| if i == 0 { w.clone() } else { capitalize(w) })
        .collect();

    let mut variants = Vec::with_capacity(4);
    for candidate in [words.join("_"), camel, pascal, words.join("-")] {
        if candidate != name && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_of_camel_case() {
        assert_eq!(
            naming_variants("getUserData"),
            vec!["get_user_data", "GetUserData", "get-user-data"]
        );
    }

    #[test]
    fn test_variants_of_snake_case() {
        assert_eq!(
            naming_variants("get_user_data"),
            vec!["getUserData", "GetUserData", "get-user-data"]
        );
    }

    #[test]
    fn test_single_word() {
        assert_eq!(naming_variants("process"), vec!["Process"]);
        assert!(naming_variants("").is_empty());
    }
}
