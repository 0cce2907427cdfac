//! Core cross-component plumbing

mod event_bus;

pub use event_bus::{AuthSignal, EventBus, EventBusStats, SignalEvent, LOGOUT, TOKEN_REFRESHED};
