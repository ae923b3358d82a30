//! Seam between resolved features and downstream record schemas.
//!
//! Field mapping belongs to the consumer. The decoder only hands over the
//! raw id, tags, provenance and area flag through [`TagMapper`].

use crate::{Feature, PrimitiveInfo, Tag};

/// Turns raw feature attributes into a consumer-defined record.
pub trait TagMapper {
    /// Record type produced for each feature.
    type Record;

    /// Map one feature's attributes.
    fn map_tags(
        &self,
        id: i64,
        tags: &[Tag],
        info: Option<&PrimitiveInfo>,
        is_area: bool,
    ) -> Self::Record;

    /// Convenience wrapper that maps a whole [`Feature`].
    fn map_feature(&self, feature: &Feature) -> Self::Record {
        self.map_tags(
            feature.id,
            &feature.tags,
            feature.info.as_ref(),
            feature.is_area,
        )
    }
}

#[cfg(feature = "serde")]
pub use json::JsonTagMapper;

#[cfg(feature = "serde")]
mod json {
    use serde_json::{Map, Value};

    use super::TagMapper;
    use crate::{PrimitiveInfo, Tag, Timestamp};

    /// Pass-through mapper producing a flat JSON object.
    ///
    /// Every tag becomes a string property; the first occurrence of a
    /// duplicated key wins. The source id is stored under `osm_id` and,
    /// when enabled, provenance under `osm_`-prefixed keys.
    ///
    /// # Examples
    /// ```
    /// use osmweave_core::{JsonTagMapper, Tag, TagMapper};
    ///
    /// let mapper = JsonTagMapper::default();
    /// let record = mapper.map_tags(7, &[Tag::new("name", "Mill")], None, false);
    /// assert_eq!(record["osm_id"], 7);
    /// assert_eq!(record["name"], "Mill");
    /// ```
    #[derive(Debug, Clone, Copy, Default)]
    pub struct JsonTagMapper {
        include_info: bool,
    }

    impl JsonTagMapper {
        /// Include provenance fields in the output.
        #[must_use]
        pub const fn with_info(include_info: bool) -> Self {
            Self { include_info }
        }
    }

    impl TagMapper for JsonTagMapper {
        type Record = Map<String, Value>;

        fn map_tags(
            &self,
            id: i64,
            tags: &[Tag],
            info: Option<&PrimitiveInfo>,
            is_area: bool,
        ) -> Self::Record {
            let mut record = Map::new();
            record.insert("osm_id".into(), Value::from(id));
            if is_area {
                record.insert("osm_area".into(), Value::Bool(true));
            }
            for tag in tags {
                if !record.contains_key(&tag.key) {
                    record.insert(tag.key.clone(), Value::String(tag.value.clone()));
                }
            }
            if self.include_info
                && let Some(info) = info
            {
                insert_info(&mut record, info);
            }
            record
        }
    }

    fn insert_info(record: &mut Map<String, Value>, info: &PrimitiveInfo) {
        if let Some(version) = info.version {
            record.insert("osm_version".into(), Value::from(version));
        }
        if let Some(changeset) = info.changeset {
            record.insert("osm_changeset".into(), Value::from(changeset));
        }
        if let Some(uid) = info.uid {
            record.insert("osm_uid".into(), Value::from(uid));
        }
        if let Some(user) = &info.user {
            record.insert("osm_user".into(), Value::String(user.clone()));
        }
        match &info.timestamp {
            Some(Timestamp::Epoch(seconds)) => {
                record.insert("osm_timestamp".into(), Value::from(*seconds));
            }
            Some(Timestamp::Raw(text)) => {
                record.insert("osm_timestamp".into(), Value::String(text.clone()));
            }
            None => {}
        }
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::Timestamp;
    use rstest::rstest;

    #[rstest]
    fn first_duplicate_key_wins() {
        let tags = [Tag::new("name", "first"), Tag::new("name", "second")];
        let record = JsonTagMapper::default().map_tags(1, &tags, None, true);
        assert_eq!(record["name"], "first");
        assert_eq!(record["osm_area"], true);
    }

    #[rstest]
    fn provenance_is_opt_in() {
        let info = PrimitiveInfo {
            version: Some(3),
            user: Some("mapper".into()),
            timestamp: Some(Timestamp::Raw("2024-01-01T00:00:00Z".into())),
            ..PrimitiveInfo::default()
        };
        let plain = JsonTagMapper::default().map_tags(1, &[], Some(&info), false);
        assert!(!plain.contains_key("osm_version"));

        let detailed = JsonTagMapper::with_info(true).map_tags(1, &[], Some(&info), false);
        assert_eq!(detailed["osm_version"], 3);
        assert_eq!(detailed["osm_user"], "mapper");
        assert_eq!(detailed["osm_timestamp"], "2024-01-01T00:00:00Z");
    }
}
