//! Area classification for closed ways.

use std::collections::HashSet;

use osmweave_core::{RawWay, Tag, find_tag};

/// Keys that never make a primitive worth reporting on their own.
pub const IGNORED_KEYS: [&str; 7] = [
    "area",
    "created_by",
    "converted_by",
    "note",
    "todo",
    "fixme",
    "FIXME",
];

/// Whether `key` carries no descriptive meaning.
#[must_use]
pub fn is_ignored_key(key: &str) -> bool {
    IGNORED_KEYS.contains(&key)
}

/// Whether any tag has a key outside [`IGNORED_KEYS`].
#[must_use]
pub fn has_significant_tags(tags: &[Tag]) -> bool {
    tags.iter().any(|tag| !is_ignored_key(&tag.key))
}

/// Decides whether a closed way is a polygon.
///
/// Rules are written as bare keys (`building`) or as `key=value` pairs
/// (`highway=platform`).
#[derive(Debug, Clone, Default)]
pub struct AreaRules {
    keys: HashSet<String>,
    pairs: HashSet<(String, String)>,
}

impl AreaRules {
    /// Parse rule entries.
    #[must_use]
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let (pairs, keys): (Vec<&str>, Vec<&str>) = entries
            .iter()
            .map(AsRef::as_ref)
            .partition(|rule| rule.contains('='));
        Self {
            keys: keys.into_iter().map(str::to_owned).collect(),
            pairs: pairs
                .into_iter()
                .filter_map(|rule| rule.split_once('='))
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        }
    }

    /// Classify `way`. Open ways are never areas.
    ///
    /// # Examples
    /// ```
    /// use osmweave_core::{RawWay, Tag};
    /// use osmweave_data::ways::AreaRules;
    ///
    /// let rules = AreaRules::new(&["building"]);
    /// let way = RawWay {
    ///     id: 1,
    ///     refs: vec![1, 2, 3, 1],
    ///     tags: vec![Tag::new("building", "yes")],
    ///     info: None,
    /// };
    /// assert!(rules.is_area(&way));
    /// ```
    #[must_use]
    pub fn is_area(&self, way: &RawWay) -> bool {
        if !way.is_closed() {
            return false;
        }
        match find_tag(&way.tags, "area") {
            Some("yes") => return true,
            Some("no") => return false,
            _ => {}
        }
        way.tags.iter().any(|tag| {
            self.keys.contains(&tag.key)
                || self
                    .pairs
                    .contains(&(tag.key.clone(), tag.value.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLOSED_WAYS_ARE_POLYGONS;
    use rstest::{fixture, rstest};

    #[fixture]
    fn rules() -> AreaRules {
        AreaRules::new(DEFAULT_CLOSED_WAYS_ARE_POLYGONS)
    }

    fn way(refs: Vec<i64>, tags: &[(&str, &str)]) -> RawWay {
        RawWay {
            id: 1,
            refs,
            tags: tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect(),
            info: None,
        }
    }

    #[rstest]
    #[case::building(&[("building", "yes")], true)]
    #[case::platform(&[("highway", "platform")], true)]
    #[case::road(&[("highway", "residential")], false)]
    #[case::forced_area(&[("highway", "pedestrian"), ("area", "yes")], true)]
    #[case::forced_line(&[("building", "yes"), ("area", "no")], false)]
    #[case::untagged(&[], false)]
    fn closed_ways_follow_rules(
        rules: AreaRules,
        #[case] tags: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        assert_eq!(rules.is_area(&way(vec![1, 2, 3, 1], tags)), expected);
    }

    #[rstest]
    fn open_ways_are_lines(rules: AreaRules) {
        assert!(!rules.is_area(&way(vec![1, 2, 3], &[("area", "yes")])));
    }

    #[rstest]
    fn significance_ignores_bookkeeping_keys() {
        assert!(!has_significant_tags(&[
            Tag::new("created_by", "JOSM"),
            Tag::new("FIXME", "check"),
        ]));
        assert!(has_significant_tags(&[Tag::new("note", "x"), Tag::new("name", "Mill")]));
    }
}
