use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::api::StoreError;
use crate::coercion::OverrideValue;
use crate::override_definitions::{OverrideSchema, OverrideType};
use crate::override_set::{EffectiveOverrideSet, OverrideEntry, PersistedRecord};
use crate::tabs::TabId;

pub const DEFAULT_KEY_SUFFIX: &str = "-overrides";

/// Scoped key-value storage offered by the extension host.
#[async_trait]
pub trait StorageClient {
    async fn get(&self, key: String) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: String, value: String) -> Result<(), StoreError>;
}

/// Per-tab override records on top of a `StorageClient`.
#[derive(Clone)]
pub struct OverrideStore {
    client: Arc<dyn StorageClient + Send + Sync>,
    schema: Arc<OverrideSchema>,
    key_suffix: String,
}

impl OverrideStore {
    pub fn new(
        client: Arc<dyn StorageClient + Send + Sync>,
        schema: Arc<OverrideSchema>,
        key_suffix: impl Into<String>,
    ) -> Self {
        OverrideStore {
            client,
            schema,
            key_suffix: key_suffix.into(),
        }
    }

    pub fn storage_key(&self, tab_id: TabId) -> String {
        format!("{}{}", tab_id, self.key_suffix)
    }

    /// Returns the record saved for `tab_id`, or `None` on a tab that never
    /// had overrides applied. A record that is not a JSON object is treated as
    /// missing; individual entries that don't fit the schema are dropped.
    #[instrument(skip_all, fields(tab_id = %tab_id))]
    pub async fn load(&self, tab_id: TabId) -> Result<Option<PersistedRecord>, StoreError> {
        let serialized = match self.client.get(self.storage_key(tab_id)).await? {
            Some(serialized) => serialized,
            None => {
                tracing::debug!("no stored overrides");
                return Ok(None);
            }
        };

        Ok(decode_record(&serialized, &self.schema))
    }

    /// Replaces whatever was stored for `tab_id` with the full set.
    #[instrument(skip_all, fields(tab_id = %tab_id))]
    pub async fn save(&self, tab_id: TabId, set: &EffectiveOverrideSet) -> Result<(), StoreError> {
        let serialized =
            serde_json::to_string(set).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.client.set(self.storage_key(tab_id), serialized).await?;
        tracing::debug!(overrides = set.len(), "saved overrides");
        Ok(())
    }
}

#[derive(Deserialize)]
struct StoredEntry {
    #[serde(rename = "type")]
    override_type: OverrideType,
    value: Value,
    enabled: bool,
}

pub fn decode_record(serialized: &str, schema: &OverrideSchema) -> Option<PersistedRecord> {
    let parsed: Value = match serde_json::from_str(serialized) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("stored overrides are not valid json, ignoring them: {}", e);
            return None;
        }
    };

    let Value::Object(entries) = parsed else {
        tracing::warn!("stored overrides are not an object, ignoring them");
        return None;
    };

    let mut record = PersistedRecord::new();
    for (key, raw_entry) in entries {
        match decode_entry(schema, &key, raw_entry) {
            Ok(entry) => record.insert(key, entry),
            Err(reason) => tracing::warn!(key = %key, reason = %reason, "skipping stored override"),
        }
    }
    Some(record)
}

fn decode_entry(schema: &OverrideSchema, key: &str, raw: Value) -> Result<OverrideEntry, String> {
    let definition = schema
        .get(key)
        .ok_or_else(|| "key is not in the schema".to_string())?;

    let stored: StoredEntry = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    if stored.override_type != definition.override_type {
        return Err(format!(
            "stored type {} does not match {}",
            stored.override_type, definition.override_type
        ));
    }

    let value = OverrideValue::from_json(&stored.value, definition.override_type)
        .ok_or_else(|| format!("value {} is not a {}", stored.value, definition.override_type))?;

    Ok(OverrideEntry::new(value, stored.enabled))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Get(String),
    Set(String, String),
}

/// In-process storage. Failures can be scripted and every call is recorded,
/// which is what the session tests lean on.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    values: Arc<Mutex<HashMap<String, String>>>,
    get_error: Option<StoreError>,
    set_error: Option<StoreError>,
    calls: Arc<Mutex<Vec<StorageCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        lock(&*self.values).insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn get_error(mut self, err: StoreError) -> Self {
        self.get_error = Some(err);
        self
    }

    pub fn set_error(mut self, err: StoreError) -> Self {
        self.set_error = Some(err);
        self
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&*self.values).get(key).cloned()
    }

    pub fn get_calls(&self) -> Vec<StorageCall> {
        lock(&*self.calls).clone()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn get(&self, key: String) -> Result<Option<String>, StoreError> {
        lock(&*self.calls).push(StorageCall::Get(key.clone()));
        if let Some(err) = &self.get_error {
            return Err(err.clone());
        }
        Ok(lock(&*self.values).get(&key).cloned())
    }

    async fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        lock(&*self.calls).push(StorageCall::Set(key.clone(), value.clone()));
        if let Some(err) = &self.set_error {
            return Err(err.clone());
        }
        lock(&*self.values).insert(key, value);
        Ok(())
    }
}
