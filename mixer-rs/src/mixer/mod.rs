//! Core mixer engine: catalog, matching, state, control and scheduling.

pub mod catalog;
pub mod controller;
pub mod deferred;
pub mod matcher;
pub mod reconcile;
pub mod store;

pub use catalog::{EndpointCatalog, EndpointReport, SessionReport};
pub use controller::{Controller, Reassert};
pub use deferred::DeferredQueue;
pub use matcher::SessionMatcher;
pub use reconcile::{CancelToken, ReconcileSchedule, TickKind};
pub use store::{ChannelEntry, ChannelSnapshot, ChannelStore, MixerSnapshot, PendingRestoreTable};
