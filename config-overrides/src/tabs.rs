use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::TabError;

/// Browser-assigned tab handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTab {
    pub id: TabId,
    /// Missing for pages the extension may not read, e.g. the browser's own pages.
    pub url: Option<String>,
}

/// Looks up the tab the popup was opened on.
#[async_trait]
pub trait TabQuery {
    async fn active_tab(&self) -> Result<Option<ActiveTab>, TabError>;
}

/// Points a tab at a new URL.
#[async_trait]
pub trait TabNavigator {
    async fn update(&self, tab_id: TabId, url: &str) -> Result<(), TabError>;
}
