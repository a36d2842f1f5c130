use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::api::OverrideError;
use crate::coercion::OverrideValue;

/// Every built-in override lives under this prefix. The full key doubles as the
/// query parameter name the storefront plugin reads.
pub const PDP_OPTIONS_PREFIX: &str = "pg_override.serverBehavior.pdp_options.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideType {
    Boolean,
    // Older popup builds wrote "number" and "int" for integer overrides.
    #[serde(alias = "number", alias = "int")]
    Integer,
    Float,
    String,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::Boolean => "boolean",
            OverrideType::Integer => "integer",
            OverrideType::Float => "float",
            OverrideType::String => "string",
        }
    }
}

impl fmt::Display for OverrideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverrideDefinition {
    pub key: String,
    pub override_type: OverrideType,
    pub label: String,
    pub default_value: OverrideValue,
}

impl OverrideDefinition {
    /// Builds a definition, rejecting a default whose type differs from `override_type`.
    pub fn new(
        key: impl Into<String>,
        override_type: OverrideType,
        label: impl Into<String>,
        default_value: OverrideValue,
    ) -> Result<Self, OverrideError> {
        let key = key.into();
        if !default_value.matches(override_type) {
            return Err(OverrideError::TypeMismatch {
                key,
                expected: override_type,
                actual: default_value.override_type(),
            });
        }
        Ok(OverrideDefinition {
            key,
            override_type,
            label: label.into(),
            default_value,
        })
    }
}

/// An ordered, closed catalog of overrides.
#[derive(Debug, Clone)]
pub struct OverrideSchema {
    definitions: Vec<OverrideDefinition>,
    index: HashMap<String, usize>,
}

impl OverrideSchema {
    pub fn new(definitions: Vec<OverrideDefinition>) -> Result<Self, OverrideError> {
        if definitions.is_empty() {
            return Err(OverrideError::InvalidSchema(
                "schema must define at least one override".to_string(),
            ));
        }

        let (index, duplicate) = index_by_key(&definitions);
        if let Some(key) = duplicate {
            return Err(OverrideError::InvalidSchema(format!(
                "duplicate override key {key}"
            )));
        }

        Ok(OverrideSchema { definitions, index })
    }

    /// The catalog shipped with the popup.
    pub fn builtin() -> &'static OverrideSchema {
        &BUILTIN_SCHEMA
    }

    pub fn definitions(&self) -> &[OverrideDefinition] {
        &self.definitions
    }

    pub fn get(&self, key: &str) -> Option<&OverrideDefinition> {
        self.index.get(key).map(|&position| &self.definitions[position])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

pub fn definitions() -> &'static [OverrideDefinition] {
    OverrideSchema::builtin().definitions()
}

static BUILTIN_SCHEMA: Lazy<OverrideSchema> = Lazy::new(|| {
    let pdp = |suffix: &str, override_type, label: &str, default_value| OverrideDefinition {
        key: format!("{PDP_OPTIONS_PREFIX}{suffix}"),
        override_type,
        label: label.to_string(),
        default_value,
    };

    let definitions = vec![
        pdp(
            "pdp_enabled",
            OverrideType::Boolean,
            "PDP Enabled",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "enable_reviews",
            OverrideType::Boolean,
            "Enable Reviews",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "enable_videos",
            OverrideType::Boolean,
            "Enable Videos",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "enable_instagram_reels",
            OverrideType::Boolean,
            "Enable IG Reels",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "enable_instagram_posts",
            OverrideType::Boolean,
            "Enable IG Posts",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "enable_product_qas",
            OverrideType::Boolean,
            "Enable Product Q&As",
            OverrideValue::Boolean(false),
        ),
        pdp(
            "num_cards",
            OverrideType::Integer,
            "Num Cards",
            OverrideValue::Integer(4),
        ),
        pdp(
            "content_spacing",
            OverrideType::Float,
            "Content Spacing",
            OverrideValue::Float(0.0),
        ),
        pdp(
            "banner_card_header_title",
            OverrideType::String,
            "Banner Header Title",
            OverrideValue::String(String::new()),
        ),
    ];

    let (index, duplicate) = index_by_key(&definitions);
    if let Some(key) = duplicate {
        tracing::error!("built-in override catalog repeats {}, keeping the first", key);
    }
    OverrideSchema { definitions, index }
});

/// Maps each key to its first position, along with the first key that repeats.
fn index_by_key(definitions: &[OverrideDefinition]) -> (HashMap<String, usize>, Option<String>) {
    let mut index = HashMap::with_capacity(definitions.len());
    let mut duplicate = None;
    for (position, definition) in definitions.iter().enumerate() {
        if index.contains_key(&definition.key) {
            duplicate.get_or_insert_with(|| definition.key.clone());
            continue;
        }
        index.insert(definition.key.clone(), position);
    }
    (index, duplicate)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_builtin_schema_is_non_empty_and_unique() {
        let defs = definitions();
        assert!(!defs.is_empty());

        let keys: HashSet<&str> = defs.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys.len(), defs.len());
    }

    #[test]
    fn test_builtin_catalog_has_no_repeated_keys() {
        let (index, duplicate) = index_by_key(definitions());
        assert_eq!(duplicate, None);
        assert_eq!(index.len(), OverrideSchema::builtin().len());
    }

    #[test]
    fn test_index_keeps_first_of_repeated_keys() {
        let mut defs = definitions().to_vec();
        defs.push(defs[0].clone());

        let (index, duplicate) = index_by_key(&defs);
        assert_eq!(duplicate.as_deref(), Some(defs[0].key.as_str()));
        assert_eq!(index.get(&defs[0].key), Some(&0));
    }

    #[test]
    fn test_builtin_defaults_match_their_types() {
        for definition in definitions() {
            assert!(
                definition.default_value.matches(definition.override_type),
                "default of {} does not match {}",
                definition.key,
                definition.override_type
            );
            assert!(definition.key.starts_with(PDP_OPTIONS_PREFIX));
        }
    }

    #[test]
    fn test_lookup_by_key() {
        let schema = OverrideSchema::builtin();
        let num_cards = schema
            .get("pg_override.serverBehavior.pdp_options.num_cards")
            .expect("num_cards is part of the builtin schema");
        assert_eq!(num_cards.override_type, OverrideType::Integer);
        assert_eq!(num_cards.default_value, OverrideValue::Integer(4));
        assert!(schema.get("pg_override.unknown").is_none());
    }

    #[test]
    fn test_schema_rejects_duplicates_and_empty() {
        let def = OverrideDefinition::new(
            "a",
            OverrideType::Boolean,
            "A",
            OverrideValue::Boolean(false),
        )
        .unwrap();

        match OverrideSchema::new(vec![def.clone(), def]) {
            Err(OverrideError::InvalidSchema(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("Expected InvalidSchema, got {:?}", other),
        }

        match OverrideSchema::new(vec![]) {
            Err(OverrideError::InvalidSchema(_)) => (),
            other => panic!("Expected InvalidSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_definition_rejects_mistyped_default() {
        match OverrideDefinition::new("a", OverrideType::Integer, "A", OverrideValue::Float(1.5)) {
            Err(OverrideError::TypeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, OverrideType::Integer);
                assert_eq!(actual, OverrideType::Float);
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_type_aliases_deserialize_to_integer() {
        for raw in ["\"integer\"", "\"number\"", "\"int\""] {
            let parsed: OverrideType = serde_json::from_str(raw).unwrap();
            assert_eq!(parsed, OverrideType::Integer);
        }
        assert_eq!(
            serde_json::to_string(&OverrideType::Integer).unwrap(),
            "\"integer\""
        );
    }
}
