use std::collections::{BTreeMap, HashMap};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::api::OverrideError;
use crate::coercion::{self, OverrideValue};
use crate::override_definitions::{OverrideSchema, OverrideType};

/// Runtime state of a single override. `value` always matches `override_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideEntry {
    #[serde(rename = "type")]
    override_type: OverrideType,
    value: OverrideValue,
    enabled: bool,
}

impl OverrideEntry {
    pub fn new(value: OverrideValue, enabled: bool) -> Self {
        OverrideEntry {
            override_type: value.override_type(),
            value,
            enabled,
        }
    }

    pub fn override_type(&self) -> OverrideType {
        self.override_type
    }

    pub fn value(&self) -> &OverrideValue {
        &self.value
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// A change the user makes to one row of the override list.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideEdit {
    SetEnabled(bool),
    Toggle,
    /// Replaces the value; must match the override's type.
    SetValue(OverrideValue),
    /// Replaces the value with raw input text, coerced to the override's type.
    SetRaw(String),
}

/// The resolved override for every key in a schema, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOverrideSet {
    entries: Vec<(String, OverrideEntry)>,
    index: HashMap<String, usize>,
}

impl EffectiveOverrideSet {
    /// Every override at its default value, disabled.
    pub fn defaults(schema: &OverrideSchema) -> Self {
        let entries: Vec<(String, OverrideEntry)> = schema
            .definitions()
            .iter()
            .map(|d| {
                (
                    d.key.clone(),
                    OverrideEntry::new(d.default_value.clone(), false),
                )
            })
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(position, (key, _))| (key.clone(), position))
            .collect();

        EffectiveOverrideSet { entries, index }
    }

    pub fn get(&self, key: &str) -> Option<&OverrideEntry> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverrideEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&str, &OverrideEntry)> {
        self.iter().filter(|(_, entry)| entry.enabled)
    }

    /// Overwrites an entry wholesale. Keys outside the set and values of the
    /// wrong type are rejected so the set stays closed and well-typed.
    pub fn set_entry(&mut self, key: &str, entry: OverrideEntry) -> Result<(), OverrideError> {
        let slot = self.entry_mut(key)?;
        if slot.override_type != entry.override_type {
            return Err(OverrideError::TypeMismatch {
                key: key.to_string(),
                expected: slot.override_type,
                actual: entry.override_type,
            });
        }
        *slot = entry;
        Ok(())
    }

    pub fn apply_edit(
        &mut self,
        key: &str,
        edit: OverrideEdit,
    ) -> Result<&OverrideEntry, OverrideError> {
        let slot = self.entry_mut(key)?;
        match edit {
            OverrideEdit::SetEnabled(enabled) => slot.enabled = enabled,
            OverrideEdit::Toggle => slot.enabled = !slot.enabled,
            OverrideEdit::SetValue(value) => {
                if !value.matches(slot.override_type) {
                    return Err(OverrideError::TypeMismatch {
                        key: key.to_string(),
                        expected: slot.override_type,
                        actual: value.override_type(),
                    });
                }
                slot.value = match value {
                    OverrideValue::Float(f) if f.is_nan() => OverrideValue::Float(0.0),
                    other => other,
                };
            }
            OverrideEdit::SetRaw(raw) => {
                slot.value = coercion::parse(&raw, slot.override_type);
            }
        }
        Ok(slot)
    }

    fn entry_mut(&mut self, key: &str) -> Result<&mut OverrideEntry, OverrideError> {
        match self.index.get(key) {
            Some(&position) => Ok(&mut self.entries[position].1),
            None => Err(OverrideError::UnknownKey(key.to_string())),
        }
    }
}

impl Serialize for EffectiveOverrideSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

/// What the store remembers for one tab. May cover only part of the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PersistedRecord {
    entries: BTreeMap<String, OverrideEntry>,
}

impl PersistedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: OverrideEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&OverrideEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverrideEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&EffectiveOverrideSet> for PersistedRecord {
    fn from(set: &EffectiveOverrideSet) -> Self {
        PersistedRecord {
            entries: set
                .iter()
                .map(|(key, entry)| (key.to_string(), entry.clone()))
                .collect(),
        }
    }
}
