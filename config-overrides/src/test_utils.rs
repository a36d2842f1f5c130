use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rand::Rng;

use crate::api::TabError;
use crate::override_definitions::OverrideSchema;
use crate::tabs::{ActiveTab, TabId, TabNavigator, TabQuery};

pub const PDP_ENABLED: &str = "pg_override.serverBehavior.pdp_options.pdp_enabled";
pub const NUM_CARDS: &str = "pg_override.serverBehavior.pdp_options.num_cards";
pub const CONTENT_SPACING: &str = "pg_override.serverBehavior.pdp_options.content_spacing";
pub const TITLE: &str = "pg_override.serverBehavior.pdp_options.banner_card_header_title";

pub fn random_tab_id() -> TabId {
    TabId(rand::thread_rng().gen_range(1..10_000_000))
}

pub fn test_schema() -> OverrideSchema {
    OverrideSchema::builtin().clone()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scripted active-tab lookup. Clones share the same tab, so a test can
/// switch tabs under a running session.
#[derive(Clone)]
pub struct MockTabs {
    active: Arc<Mutex<Result<Option<ActiveTab>, TabError>>>,
}

impl MockTabs {
    pub fn with_tab(id: i64, url: &str) -> Self {
        Self::from_result(Ok(Some(ActiveTab {
            id: TabId(id),
            url: Some(url.to_string()),
        })))
    }

    pub fn empty() -> Self {
        Self::from_result(Ok(None))
    }

    pub fn unavailable() -> Self {
        Self::from_result(Err(TabError::Unavailable))
    }

    fn from_result(result: Result<Option<ActiveTab>, TabError>) -> Self {
        MockTabs {
            active: Arc::new(Mutex::new(result)),
        }
    }

    pub fn set_active(&self, tab: Option<ActiveTab>) {
        *lock(&*self.active) = Ok(tab);
    }
}

#[async_trait]
impl TabQuery for MockTabs {
    async fn active_tab(&self) -> Result<Option<ActiveTab>, TabError> {
        lock(&*self.active).clone()
    }
}

/// Records navigations; optionally fails every one of them.
#[derive(Clone, Default)]
pub struct MockNavigator {
    error: Option<TabError>,
    calls: Arc<Mutex<Vec<(TabId, String)>>>,
}

impl MockNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(mut self, err: TabError) -> Self {
        self.error = Some(err);
        self
    }

    pub fn get_calls(&self) -> Vec<(TabId, String)> {
        lock(&*self.calls).clone()
    }
}

#[async_trait]
impl TabNavigator for MockNavigator {
    async fn update(&self, tab_id: TabId, url: &str) -> Result<(), TabError> {
        lock(&*self.calls).push((tab_id, url.to_string()));
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
