use url::{form_urlencoded, Url};

use crate::api::OverrideError;
use crate::coercion;
use crate::override_set::EffectiveOverrideSet;

/// One `name=value` piece of a query string. `raw` is written back untouched
/// unless the override projection has to change it.
#[derive(Debug)]
struct QuerySegment {
    raw: String,
    name: String,
    value: String,
}

impl QuerySegment {
    fn parse(raw: &str) -> Self {
        let (name, value) = form_urlencoded::parse(raw.as_bytes())
            .next()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .unwrap_or_default();

        QuerySegment {
            raw: raw.to_string(),
            name,
            value,
        }
    }

    fn encoded(name: &str, value: &str) -> Self {
        QuerySegment {
            raw: form_urlencoded::Serializer::new(String::new())
                .append_pair(name, value)
                .finish(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Writes `set` onto the query string of `base_url`.
///
/// Enabled overrides replace the first occurrence of their parameter in place
/// (later repeats are dropped) or are appended when missing. Disabled
/// overrides are removed. Everything else in the URL is kept as it was,
/// except that a query left empty is dropped along with its `?`.
pub fn project(base_url: &str, set: &EffectiveOverrideSet) -> Result<String, OverrideError> {
    let mut url = Url::parse(base_url).map_err(|source| OverrideError::InvalidUrl {
        url: base_url.to_string(),
        source,
    })?;

    let mut segments: Vec<QuerySegment> = url
        .query()
        .map(|query| query.split('&').map(QuerySegment::parse).collect())
        .unwrap_or_default();

    for (key, entry) in set.iter() {
        if !entry.enabled() {
            segments.retain(|segment| segment.name != key);
            continue;
        }

        let value = coercion::serialize(entry.value());
        let mut seen = false;
        segments.retain_mut(|segment| {
            if segment.name != key {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            if segment.value != value {
                *segment = QuerySegment::encoded(key, &value);
            }
            true
        });
        if !seen {
            segments.push(QuerySegment::encoded(key, &value));
        }
    }

    let query = segments
        .iter()
        .map(|segment| segment.raw.as_str())
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(if query.is_empty() { None } else { Some(query.as_str()) });

    Ok(url.into())
}
