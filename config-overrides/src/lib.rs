pub mod api;
pub mod coercion;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod override_definitions;
pub mod override_set;
pub mod projection;
pub mod reconcile;
pub mod redis;
pub mod store;
pub mod tabs;

// Kept public so the integration tests in tests/ can share the mocks.
pub mod test_utils;
