use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// A case-folded hashtag. Two tags differing only in case are the same tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Case-folds every raw tag and collapses duplicates. Ordering is lexical so
/// pair iteration is deterministic.
pub fn normalize<I, S>(tags: I) -> BTreeSet<Tag>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter().map(|raw| Tag::new(raw.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::{Tag, normalize};

    #[test]
    fn folds_case_and_dedupes() {
        let tags = normalize(["Gretel", "gretel", "AI", "ai", "data"]);
        let names = tags.iter().map(Tag::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["ai", "data", "gretel"]);
    }

    #[test]
    fn empty_input_is_empty_set() {
        let tags = normalize(Vec::<String>::new());
        assert!(tags.is_empty());
    }

    #[test]
    fn folds_non_ascii() {
        assert_eq!(Tag::new("ÜBER").as_str(), "über");
    }
}
