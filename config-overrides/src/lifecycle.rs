use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::instrument;

use crate::api::{OverrideError, StoreError, TabError};
use crate::config::Config;
use crate::override_definitions::OverrideSchema;
use crate::override_set::{EffectiveOverrideSet, OverrideEdit, OverrideEntry};
use crate::projection::project;
use crate::reconcile::{reconcile, QueryParams};
use crate::redis::RedisStorage;
use crate::store::OverrideStore;
use crate::tabs::{ActiveTab, TabId, TabNavigator, TabQuery};

pub const SESSION_EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No tab is known; the overrides are all defaults.
    Idle,
    Loading,
    Ready { tab_id: TabId, url: String },
    /// Pins the tab being written so a tab switch can't redirect the save.
    Applying { tab_id: TabId, url: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Ready { .. } => "ready",
            SessionState::Applying { .. } => "applying",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A message for the person using the popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub tab_id: TabId,
    pub url: String,
    /// Problems that did not stop the navigation, e.g. a failed save.
    pub warnings: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TabActivated,
    Edit { key: String, edit: OverrideEdit },
    Apply,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Overrides were applied and the popup should close.
    Applied(ApplyOutcome),
    Closed,
}

pub fn event_channel() -> (mpsc::Sender<SessionEvent>, mpsc::Receiver<SessionEvent>) {
    mpsc::channel(SESSION_EVENT_BUFFER)
}

/// One popup session bound to the active tab.
pub struct TabSession {
    schema: Arc<OverrideSchema>,
    tabs: Arc<dyn TabQuery + Send + Sync>,
    navigator: Arc<dyn TabNavigator + Send + Sync>,
    store: OverrideStore,
    state: SessionState,
    overrides: EffectiveOverrideSet,
    notices: Vec<Notice>,
    reported_unavailable: bool,
}

impl TabSession {
    pub fn new(
        schema: Arc<OverrideSchema>,
        tabs: Arc<dyn TabQuery + Send + Sync>,
        navigator: Arc<dyn TabNavigator + Send + Sync>,
        store: OverrideStore,
    ) -> Self {
        let overrides = EffectiveOverrideSet::defaults(&schema);
        TabSession {
            schema,
            tabs,
            navigator,
            store,
            state: SessionState::Idle,
            overrides,
            notices: Vec::new(),
            reported_unavailable: false,
        }
    }

    /// A session over the built-in schema with redis-backed storage.
    pub fn from_config(
        config: &Config,
        tabs: Arc<dyn TabQuery + Send + Sync>,
        navigator: Arc<dyn TabNavigator + Send + Sync>,
    ) -> Result<Self, OverrideError> {
        let schema = Arc::new(OverrideSchema::builtin().clone());
        let storage = RedisStorage::from_config(config)?;
        let store = OverrideStore::new(
            Arc::new(storage),
            schema.clone(),
            config.storage_key_suffix.clone(),
        );

        Ok(Self::new(schema, tabs, navigator, store))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn overrides(&self) -> &EffectiveOverrideSet {
        &self.overrides
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Rebuilds the overrides for whatever tab is active now.
    ///
    /// Never fails: without a usable tab the session drops back to idle with
    /// every override at its default.
    #[instrument(skip_all)]
    pub async fn activate(&mut self) -> &EffectiveOverrideSet {
        self.state = SessionState::Loading;

        let (tab_id, url) = match self.tabs.active_tab().await {
            Ok(Some(ActiveTab {
                id,
                url: Some(url),
            })) => (id, url),
            Ok(Some(ActiveTab { id, url: None })) => {
                tracing::info!(tab_id = %id, "active tab has no readable url");
                return self.reset();
            }
            Ok(None) => {
                tracing::info!("no active tab");
                return self.reset();
            }
            Err(TabError::Unavailable) => {
                self.report_unavailable("tabs");
                return self.reset();
            }
            Err(e) => {
                tracing::warn!("failed to query active tab: {}", e);
                self.notices
                    .push(Notice::warning(format!("Could not read the active tab: {e}")));
                return self.reset();
            }
        };

        let stored = match self.store.load(tab_id).await {
            Ok(stored) => stored,
            Err(StoreError::Unavailable) => {
                self.report_unavailable("storage");
                return self.reset();
            }
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, "failed to load stored overrides: {}", e);
                self.notices
                    .push(Notice::warning(format!("Saved overrides could not be loaded: {e}")));
                None
            }
        };

        let query = QueryParams::from_url(&url).unwrap_or_else(|e| {
            tracing::warn!("could not parse tab url, ignoring its parameters: {}", e);
            QueryParams::default()
        });

        self.overrides = reconcile(&self.schema, stored.as_ref(), &query);
        tracing::debug!(
            tab_id = %tab_id,
            enabled = self.overrides.enabled().count(),
            "overrides loaded"
        );
        self.state = SessionState::Ready { tab_id, url };
        &self.overrides
    }

    pub fn edit(&mut self, key: &str, edit: OverrideEdit) -> Result<&OverrideEntry, OverrideError> {
        if !matches!(self.state, SessionState::Ready { .. }) {
            return Err(OverrideError::InvalidState {
                operation: "edit overrides",
                state: self.state.name(),
            });
        }
        self.overrides.apply_edit(key, edit)
    }

    /// Saves the overrides for the tab and navigates it to the projected URL.
    ///
    /// A failed save is reported as a warning and does not block navigation.
    /// A failed navigation returns the session to `Ready` so it can be retried.
    #[instrument(skip_all)]
    pub async fn apply(&mut self) -> Result<ApplyOutcome, OverrideError> {
        let (tab_id, url) = match &self.state {
            SessionState::Ready { tab_id, url } => (*tab_id, url.clone()),
            other => {
                tracing::warn!("no active tab to apply overrides to");
                return Err(OverrideError::InvalidState {
                    operation: "apply overrides",
                    state: other.name(),
                });
            }
        };
        self.state = SessionState::Applying {
            tab_id,
            url: url.clone(),
        };

        let target = match project(&url, &self.overrides) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(tab_id = %tab_id, "failed to build override url: {}", e);
                self.notices
                    .push(Notice::error(format!("Cannot apply changes: {e}")));
                self.state = SessionState::Ready { tab_id, url };
                return Err(e);
            }
        };

        let mut warnings = Vec::new();
        if let Err(e) = self.store.save(tab_id, &self.overrides).await {
            tracing::warn!(tab_id = %tab_id, "failed to save overrides: {}", e);
            let notice = Notice::warning(format!("Overrides were applied but not saved: {e}"));
            self.notices.push(notice.clone());
            warnings.push(notice);
        }

        match self.navigator.update(tab_id, &target).await {
            Ok(()) => {
                tracing::info!(tab_id = %tab_id, url = %target, "applied overrides");
                self.state = SessionState::Idle;
                Ok(ApplyOutcome {
                    tab_id,
                    url: target,
                    warnings,
                })
            }
            Err(source) => {
                tracing::error!(tab_id = %tab_id, "failed to update tab: {}", source);
                self.notices
                    .push(Notice::error(format!("Failed to update tab: {source}")));
                self.state = SessionState::Ready { tab_id, url };
                Err(OverrideError::Navigation { tab_id, source })
            }
        }
    }

    /// Handles events one at a time until the popup closes.
    ///
    /// An activation that arrives while an apply is in flight waits in the
    /// channel until the apply has finished.
    pub async fn run(&mut self, events: &mut mpsc::Receiver<SessionEvent>) -> SessionExit {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::TabActivated => {
                    self.activate().await;
                }
                SessionEvent::Edit { key, edit } => {
                    if let Err(e) = self.edit(&key, edit) {
                        tracing::warn!("rejected edit of {}: {}", key, e);
                    }
                }
                SessionEvent::Apply => match self.apply().await {
                    Ok(outcome) => return SessionExit::Applied(outcome),
                    Err(e) => tracing::warn!("apply failed: {}", e),
                },
                SessionEvent::Close => return SessionExit::Closed,
            }
        }
        SessionExit::Closed
    }

    fn reset(&mut self) -> &EffectiveOverrideSet {
        self.overrides = EffectiveOverrideSet::defaults(&self.schema);
        self.state = SessionState::Idle;
        &self.overrides
    }

    fn report_unavailable(&mut self, collaborator: &str) {
        tracing::warn!("{} api is not available", collaborator);
        if !self.reported_unavailable {
            self.reported_unavailable = true;
            self.notices.push(Notice::warning(format!(
                "Browser {collaborator} are not available; showing default overrides"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coercion::OverrideValue;
    use crate::store::{MemoryStorage, StorageCall, DEFAULT_KEY_SUFFIX};
    use crate::test_utils::{test_schema, MockNavigator, MockTabs, NUM_CARDS, PDP_ENABLED};

    fn session(tabs: &MockTabs, navigator: &MockNavigator, storage: &MemoryStorage) -> TabSession {
        let schema = Arc::new(test_schema());
        let store = OverrideStore::new(Arc::new(storage.clone()), schema.clone(), DEFAULT_KEY_SUFFIX);
        TabSession::new(
            schema,
            Arc::new(tabs.clone()),
            Arc::new(navigator.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn test_from_config_starts_idle_with_builtin_defaults() {
        let session = TabSession::from_config(
            &Config::default_test_config(),
            Arc::new(MockTabs::empty()),
            Arc::new(MockNavigator::new()),
        )
        .unwrap();

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(
            session.overrides(),
            &EffectiveOverrideSet::defaults(OverrideSchema::builtin())
        );
    }

    #[tokio::test]
    async fn test_activate_reaches_ready() {
        let tabs = MockTabs::with_tab(7, &format!("https://store.example/p?{NUM_CARDS}=7"));
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);
        assert_eq!(session.state(), &SessionState::Idle);

        let overrides = session.activate().await;
        assert_eq!(
            overrides.get(NUM_CARDS),
            Some(&OverrideEntry::new(OverrideValue::Integer(7), true))
        );
        assert_eq!(session.state().name(), "ready");
        assert!(session.notices().is_empty());
    }

    #[tokio::test]
    async fn test_activate_without_tab_falls_back_to_defaults() {
        let tabs = MockTabs::with_tab(7, &format!("https://store.example/p?{NUM_CARDS}=7"));
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);
        session.activate().await;

        tabs.set_active(None);
        let overrides = session.activate().await.clone();
        assert_eq!(overrides, EffectiveOverrideSet::defaults(&test_schema()));
        assert_eq!(session.state(), &SessionState::Idle);

        tabs.set_active(Some(ActiveTab {
            id: TabId(8),
            url: None,
        }));
        session.activate().await;
        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.notices().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_host_is_reported_once() {
        let tabs = MockTabs::unavailable();
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);

        session.activate().await;
        session.activate().await;

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.notices().len(), 1);
        assert_eq!(session.notices()[0].level, NoticeLevel::Warning);
        assert!(storage.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_still_uses_url() {
        let tabs = MockTabs::with_tab(7, &format!("https://store.example/p?{NUM_CARDS}=3"));
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new().get_error(StoreError::Timeout);
        let mut session = session(&tabs, &navigator, &storage);

        let overrides = session.activate().await;
        assert_eq!(
            overrides.get(NUM_CARDS),
            Some(&OverrideEntry::new(OverrideValue::Integer(3), true))
        );
        assert_eq!(session.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_storage_falls_back_to_defaults() {
        let tabs = MockTabs::with_tab(8, &format!("https://store.example/p?{NUM_CARDS}=7"));
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new().get_error(StoreError::Unavailable);
        let mut session = session(&tabs, &navigator, &storage);

        let overrides = session.activate().await.clone();
        assert_eq!(overrides, EffectiveOverrideSet::defaults(&test_schema()));
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.notices().len(), 1);

        // reported once across activations
        session.activate().await;
        assert_eq!(session.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_and_apply_outside_ready_are_rejected() {
        let tabs = MockTabs::empty();
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);

        match session.edit(NUM_CARDS, OverrideEdit::Toggle) {
            Err(OverrideError::InvalidState { state, .. }) => assert_eq!(state, "idle"),
            other => panic!("Expected InvalidState, got {:?}", other),
        }
        match session.apply().await {
            Err(OverrideError::InvalidState { state, .. }) => assert_eq!(state, "idle"),
            other => panic!("Expected InvalidState, got {:?}", other),
        }
        assert!(navigator.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_saves_then_navigates() {
        let tabs = MockTabs::with_tab(5, "https://store.example/product#reviews");
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);
        session.activate().await;

        session
            .edit(PDP_ENABLED, OverrideEdit::SetValue(OverrideValue::Boolean(true)))
            .unwrap();
        session
            .edit(PDP_ENABLED, OverrideEdit::SetEnabled(true))
            .unwrap();

        let outcome = session.apply().await.unwrap();
        let expected = format!("https://store.example/product?{PDP_ENABLED}=true#reviews");
        assert_eq!(outcome.url, expected);
        assert!(outcome.warnings.is_empty());
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(navigator.get_calls(), vec![(TabId(5), expected)]);
        assert!(storage.value("5-overrides").is_some());
    }

    #[tokio::test]
    async fn test_save_failure_does_not_block_navigation() {
        let tabs = MockTabs::with_tab(5, "https://store.example/product");
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new().set_error(StoreError::Backend("quota".to_string()));
        let mut session = session(&tabs, &navigator, &storage);
        session.activate().await;

        let outcome = session.apply().await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].level, NoticeLevel::Warning);
        assert_eq!(navigator.get_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_returns_to_ready() {
        let tabs = MockTabs::with_tab(5, "https://store.example/product");
        let navigator = MockNavigator::new().fail_with(TabError::Failed("tab closed".to_string()));
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);
        session.activate().await;
        session.edit(NUM_CARDS, OverrideEdit::Toggle).unwrap();

        match session.apply().await {
            Err(OverrideError::Navigation { tab_id, .. }) => assert_eq!(tab_id, TabId(5)),
            other => panic!("Expected Navigation error, got {:?}", other),
        }
        assert_eq!(session.state().name(), "ready");
        assert_eq!(session.notices().last().unwrap().level, NoticeLevel::Error);
        // the in-memory edits survive for a retry
        assert!(session.overrides().get(NUM_CARDS).unwrap().enabled());
    }

    #[tokio::test]
    async fn test_activation_queued_behind_apply_saves_to_original_tab() {
        let tabs = MockTabs::with_tab(1, "https://store.example/one");
        let navigator = MockNavigator::new().fail_with(TabError::Failed("busy".to_string()));
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);
        session.activate().await;

        // the user switches tabs while the apply is being processed
        tabs.set_active(Some(ActiveTab {
            id: TabId(2),
            url: Some("https://store.example/two".to_string()),
        }));

        let (tx, mut rx) = event_channel();
        tx.send(SessionEvent::Apply).await.unwrap();
        tx.send(SessionEvent::TabActivated).await.unwrap();
        drop(tx);

        assert_eq!(session.run(&mut rx).await, SessionExit::Closed);

        let calls = storage.get_calls();
        let save_position = calls
            .iter()
            .position(|call| matches!(call, StorageCall::Set(key, _) if key == "1-overrides"))
            .expect("apply saved to the first tab");
        let load_position = calls
            .iter()
            .position(|call| call == &StorageCall::Get("2-overrides".to_string()))
            .expect("activation loaded the second tab");
        assert!(save_position < load_position);
        assert!(storage.value("2-overrides").is_none());
        assert_eq!(
            session.state(),
            &SessionState::Ready {
                tab_id: TabId(2),
                url: "https://store.example/two".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_run_exits_after_successful_apply() {
        let tabs = MockTabs::with_tab(4, "https://store.example/product");
        let navigator = MockNavigator::new();
        let storage = MemoryStorage::new();
        let mut session = session(&tabs, &navigator, &storage);

        let (tx, mut rx) = event_channel();
        tx.send(SessionEvent::TabActivated).await.unwrap();
        tx.send(SessionEvent::Edit {
            key: NUM_CARDS.to_string(),
            edit: OverrideEdit::SetRaw("8".to_string()),
        })
        .await
        .unwrap();
        tx.send(SessionEvent::Edit {
            key: NUM_CARDS.to_string(),
            edit: OverrideEdit::SetEnabled(true),
        })
        .await
        .unwrap();
        tx.send(SessionEvent::Apply).await.unwrap();
        tx.send(SessionEvent::TabActivated).await.unwrap();

        match session.run(&mut rx).await {
            SessionExit::Applied(outcome) => {
                assert_eq!(
                    outcome.url,
                    format!("https://store.example/product?{NUM_CARDS}=8")
                );
            }
            other => panic!("Expected Applied, got {:?}", other),
        }
        // the trailing activation is left for whoever opens the popup next
        assert!(rx.try_recv().is_ok());
    }
}
