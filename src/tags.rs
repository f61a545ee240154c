use std::collections::HashMap;

pub const TAG_ENVIRONMENT: &str = "Environment";
pub const TAG_MANAGED_BY: &str = "ManagedBy";
pub const TAG_PROJECT: &str = "Project";

/// Tag value every managed resource must carry under `ManagedBy`.
pub const MANAGED_BY_VALUE: &str = "terraform";

/// The tag set a resource must carry, with exact values, to be managed.
///
/// Resources missing any of the required keys (or carrying a different
/// value) are invisible to discovery; extra tags on the resource are
/// ignored.
#[derive(Debug, Clone)]
pub struct RequiredTags {
    required: HashMap<String, String>,
}

impl RequiredTags {
    pub fn new(environment: &str, project: &str) -> Self {
        let mut required = HashMap::new();
        required.insert(TAG_ENVIRONMENT.to_string(), environment.to_string());
        required.insert(TAG_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        required.insert(TAG_PROJECT.to_string(), project.to_string());
        Self { required }
    }

    /// True iff every required key is present in `actual` with an identical
    /// value. No partial or fuzzy matching.
    pub fn matches(&self, actual: &HashMap<String, String>) -> bool {
        self.required
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|actual| actual == value))
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.required
    }
}

/// Normalize a provider's array-of-pairs tag representation into a map.
///
/// Pairs with a missing key or value are dropped.
pub fn tag_pairs_to_map<'a>(
    pairs: impl IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
) -> HashMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| Some((key?.to_string(), value?.to_string())))
        .collect()
}

/// Deterministic resource name used when tag-based discovery comes up empty.
pub fn fallback_name(environment: &str, project: &str, kind: &str, region: &str) -> String {
    format!("{environment}-{project}-{kind}-{region}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actual(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn matches_when_all_required_tags_present() {
        let required = RequiredTags::new("dev", "legitmark");
        assert!(required.matches(&actual(&[
            ("Environment", "dev"),
            ("ManagedBy", "terraform"),
            ("Project", "legitmark"),
        ])));
    }

    #[test]
    fn extra_tags_are_ignored() {
        let required = RequiredTags::new("dev", "legitmark");
        assert!(required.matches(&actual(&[
            ("Environment", "dev"),
            ("ManagedBy", "terraform"),
            ("Project", "legitmark"),
            ("Extra", "x"),
        ])));
    }

    #[test]
    fn any_missing_required_key_fails() {
        let required = RequiredTags::new("dev", "legitmark");
        let full = [
            ("Environment", "dev"),
            ("ManagedBy", "terraform"),
            ("Project", "legitmark"),
        ];
        for dropped in 0..full.len() {
            let partial: Vec<(&str, &str)> = full
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != dropped)
                .map(|(_, pair)| *pair)
                .collect();
            assert!(
                !required.matches(&actual(&partial)),
                "match must fail without {:?}",
                full[dropped].0
            );
        }
    }

    #[test]
    fn mismatched_value_fails() {
        let required = RequiredTags::new("dev", "legitmark");
        assert!(!required.matches(&actual(&[
            ("Environment", "staging"),
            ("ManagedBy", "terraform"),
            ("Project", "legitmark"),
        ])));
    }

    #[test]
    fn tag_pairs_normalize_and_drop_incomplete() {
        let map = tag_pairs_to_map([
            (Some("Environment"), Some("dev")),
            (Some("Orphan"), None),
            (None, Some("value")),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Environment").map(String::as_str), Some("dev"));
    }

    #[test]
    fn fallback_name_follows_template() {
        assert_eq!(
            fallback_name("dev", "legitmark", "db", "eu-west-1"),
            "dev-legitmark-db-eu-west-1"
        );
    }
}
