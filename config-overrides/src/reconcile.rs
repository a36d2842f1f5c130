use tracing::instrument;
use url::Url;

use crate::api::OverrideError;
use crate::coercion;
use crate::override_definitions::OverrideSchema;
use crate::override_set::{EffectiveOverrideSet, OverrideEntry, PersistedRecord};

/// Decoded query parameters of a tab URL, in the order they appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn from_url(url: &str) -> Result<QueryParams, OverrideError> {
        let parsed = Url::parse(url).map_err(|source| OverrideError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        Ok(parsed.query_pairs().into_owned().collect())
    }

    /// First value for `name`; later repeats are ignored.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        QueryParams {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Resolves the effective override set for a tab.
///
/// Precedence is URL > stored > default: a parameter on the tab URL is what
/// the page is running with right now, so it always wins and is always
/// enabled. Stored entries are trusted as-is. Parameters that are not in the
/// schema are left alone.
#[instrument(skip_all)]
pub fn reconcile(
    schema: &OverrideSchema,
    stored: Option<&PersistedRecord>,
    query: &QueryParams,
) -> EffectiveOverrideSet {
    let mut effective = EffectiveOverrideSet::defaults(schema);

    if let Some(record) = stored {
        for (key, entry) in record.iter() {
            if let Err(e) = effective.set_entry(key, entry.clone()) {
                // The store already drops non-conforming entries, so this only
                // fires for records built by hand against another schema.
                tracing::warn!("ignoring stored override {}: {}", key, e);
            }
        }
    }

    for definition in schema.definitions() {
        if let Some(raw) = query.get(&definition.key) {
            let value = coercion::parse(raw, definition.override_type);
            tracing::debug!(key = %definition.key, raw, "override set from url");
            if let Err(e) = effective.set_entry(&definition.key, OverrideEntry::new(value, true)) {
                tracing::error!("failed to apply url override {}: {}", definition.key, e);
            }
        }
    }

    effective
}
